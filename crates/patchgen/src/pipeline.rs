use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::mpsc::{Receiver, Sender};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use patch::{Patch, SampleLocation};
use train_record::ShardedRecordWriter;

use crate::backend::{CollectionRef, PatchRequest, RasterBackend, SessionFactory};
use crate::error::FetchError;
use crate::retry::{RetryPolicy, COMPUTE_BUDGET};
use crate::split::{Split, SplitCounts, SplitRatios, SplitSampler};
use crate::validate;
use crate::{Error, Result};

/// How patch pixels are obtained from the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FetchMode {
    /// Neighborhood download, the bulk path.
    #[default]
    Download,
    /// Synchronous pixel computation, lower latency but a tighter quota.
    Compute,
}

/// Configuration of one patch dataset export.
#[derive(Clone, Debug)]
pub struct PatchPipelineOptions {
    pub collection: CollectionRef,
    pub image: String,
    /// Feature band names, already window suffixed.
    pub features: Vec<String>,
    pub label: String,
    pub scale_m: f64,
    pub patch_size: usize,
    /// Indices enumerated past the reported collection size, slack for
    /// imprecise remote size reporting.
    pub grace: u64,
    pub ratios: SplitRatios,
    /// Seed for reproducible split draws, entropy seeded when absent.
    pub seed: Option<u64>,
    pub fetch_mode: FetchMode,
    pub retry: RetryPolicy,
    pub output: PathBuf,
    pub dataset_name: String,
    pub records_per_shard: u64,
    pub threads: Option<usize>,
}

impl PatchPipelineOptions {
    pub fn new(
        collection: CollectionRef,
        image: impl Into<String>,
        output: impl Into<PathBuf>,
        dataset_name: impl Into<String>,
    ) -> PatchPipelineOptions {
        PatchPipelineOptions {
            collection,
            image: image.into(),
            features: Vec::new(),
            label: "class".to_string(),
            scale_m: 10.0,
            patch_size: 128,
            grace: 10,
            ratios: SplitRatios::default(),
            seed: None,
            fetch_mode: FetchMode::default(),
            retry: RetryPolicy::download(),
            output: output.into(),
            dataset_name: dataset_name.into(),
            records_per_shard: 256,
            threads: None,
        }
    }

    /// Every band fetched per sample: the features plus the label.
    pub fn selectors(&self) -> Vec<String> {
        let mut selectors = self.features.clone();
        selectors.push(self.label.clone());
        selectors
    }

    pub fn split_dir(&self, split: Split) -> PathBuf {
        self.output
            .join(format!("{}_{}", self.dataset_name, split.role()))
    }

    fn validate(&self) -> Result {
        if self.features.is_empty() {
            return Err(Error::InvalidArgument(
                "No feature bands configured".to_string(),
            ));
        }
        if self.features.contains(&self.label) {
            return Err(Error::InvalidArgument(format!(
                "Label band {} also appears as a feature",
                self.label
            )));
        }
        if self.patch_size == 0 {
            return Err(Error::InvalidArgument(
                "Patch size has to be positive".to_string(),
            ));
        }
        if !(self.scale_m > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "Scale has to be positive, not {}",
                self.scale_m
            )));
        }
        if self.records_per_shard == 0 {
            return Err(Error::InvalidArgument(
                "records_per_shard has to be positive".to_string(),
            ));
        }
        if self.dataset_name.is_empty() {
            return Err(Error::InvalidArgument("Empty dataset name".to_string()));
        }

        self.ratios.validate()
    }

    /// The compute path answers synchronously, so its element budget is
    /// capped lower than the download default.
    fn fetch_policy(&self) -> RetryPolicy {
        match self.fetch_mode {
            FetchMode::Download => self.retry,
            FetchMode::Compute => RetryPolicy {
                budget: COMPUTE_BUDGET.min(self.retry.budget),
                ..self.retry
            },
        }
    }

    pub fn run<F: SessionFactory>(&self, factory: &F) -> Result<DatasetReport> {
        self.run_with_progress(factory, |_, _| ())
    }

    /// Export the dataset, drawing each sample's split locally.
    ///
    /// `progress` is called after every finished element with the number of
    /// elements done and the total enumerated.
    pub fn run_with_progress<F: SessionFactory>(
        &self,
        factory: &F,
        progress: impl Fn(u64, u64) + Sync,
    ) -> Result<DatasetReport> {
        self.validate()?;
        let start = Instant::now();
        let selectors = self.selectors();

        let control = factory.open_session()?;
        check_bands(&control, &self.image, &selectors)?;
        let samples = control.collection_size(&self.collection)?;
        drop(control);

        let sampler = SplitSampler::new(&self.ratios, self.seed)?;
        let total = samples + self.grace;
        log::info!(
            "Exporting {} samples (+{} grace) from {} as {}",
            samples,
            self.grace,
            self.collection.collection,
            self.dataset_name
        );

        let counters = Counters::default();
        let pool = create_scoped_thread_pool(self.threads)?;
        let (tx, rx) = mpsc::channel();
        let writer_thread = self.spawn_writer(rx);

        let ctx = ElementContext {
            factory,
            image: &self.image,
            collection: &self.collection,
            selectors: &selectors,
            scale_m: self.scale_m,
            patch_size: self.patch_size,
            fetch_mode: self.fetch_mode,
            policy: self.fetch_policy(),
            validate_values: true,
            counters: &counters,
        };
        let assignment = SplitAssignment::Sampled(&sampler);

        pool.install(|| {
            (0..total).into_par_iter().for_each_init(
                || (None::<F::Backend>, tx.clone()),
                |(session, tx), index| {
                    process_element(&ctx, session, tx, index, &assignment);
                    let done = counters.done.fetch_add(1, Ordering::Relaxed) + 1;
                    progress(done, total);
                },
            );
        });

        drop(tx);
        let written = join_writer(writer_thread)?;

        let mut report = counters.report();
        report.samples = samples;
        report.enumerated = total;
        report.written = written;
        report.elapsed = start.elapsed();
        log::info!("{}", report);

        Ok(report)
    }

    /// Export against a pre-partitioned collection: every split enumerates
    /// its own random column range of the collection and writes straight to
    /// its role, no local split draws and no value filter.
    pub fn run_presplit<F: SessionFactory>(
        &self,
        factory: &F,
        progress: impl Fn(u64, u64) + Sync,
    ) -> Result<DatasetReport> {
        self.validate()?;
        let seed = self.seed.ok_or_else(|| {
            Error::InvalidArgument(
                "Pre-partitioned runs need a seed for the random column".to_string(),
            )
        })?;

        let start = Instant::now();
        let selectors = self.selectors();

        let control = factory.open_session()?;
        check_bands(&control, &self.image, &selectors)?;

        let mut views = Vec::with_capacity(Split::ALL.len());
        for split in Split::ALL {
            let view = self
                .collection
                .clone()
                .with_filter(self.ratios.random_filter(split, seed));
            let size = control.collection_size(&view)?;
            log::info!("{}: {} samples in {}", split, size, view.collection);
            views.push((split, view, size));
        }
        drop(control);

        let samples: u64 = views.iter().map(|(_, _, size)| *size).sum();
        let grand_total = samples + Split::ALL.len() as u64 * self.grace;

        let counters = Counters::default();
        let pool = create_scoped_thread_pool(self.threads)?;
        let (tx, rx) = mpsc::channel();
        let writer_thread = self.spawn_writer(rx);

        pool.install(|| {
            for (split, view, size) in &views {
                let ctx = ElementContext {
                    factory,
                    image: &self.image,
                    collection: view,
                    selectors: &selectors,
                    scale_m: self.scale_m,
                    patch_size: self.patch_size,
                    fetch_mode: self.fetch_mode,
                    policy: self.fetch_policy(),
                    validate_values: false,
                    counters: &counters,
                };
                let assignment = SplitAssignment::Fixed(*split);
                let total = size + self.grace;

                (0..total).into_par_iter().for_each_init(
                    || (None::<F::Backend>, tx.clone()),
                    |(session, tx), index| {
                        process_element(&ctx, session, tx, index, &assignment);
                        let done = counters.done.fetch_add(1, Ordering::Relaxed) + 1;
                        progress(done, grand_total);
                    },
                );
            }
        });

        drop(tx);
        let written = join_writer(writer_thread)?;

        let mut report = counters.report();
        report.samples = samples;
        report.enumerated = grand_total;
        report.written = written;
        report.elapsed = start.elapsed();
        log::info!("{}", report);

        Ok(report)
    }

    fn spawn_writer(
        &self,
        rx: Receiver<(Split, Vec<u8>)>,
    ) -> std::thread::JoinHandle<Result<SplitCounts>> {
        let directories = Split::ALL.map(|split| self.split_dir(split));
        let records_per_shard = self.records_per_shard;
        std::thread::spawn(move || write_split_records(directories, records_per_shard, rx))
    }
}

/// Outcome summary of one export run.
#[derive(Clone, Debug, Default)]
pub struct DatasetReport {
    /// Collection size reported by the backend.
    pub samples: u64,
    /// Indices enumerated, including grace overshoot.
    pub enumerated: u64,
    pub exported: u64,
    /// Patches rejected by the value filter.
    pub rejected: u64,
    /// Indices past the true collection end.
    pub out_of_range: u64,
    pub coordinate_failures: u64,
    pub fetch_failures: u64,
    pub contract_failures: u64,
    pub retries: u64,
    pub written: SplitCounts,
    pub elapsed: Duration,
}

impl DatasetReport {
    /// Elements that produced no record for a reason other than running
    /// past the collection end.
    pub fn dropped(&self) -> u64 {
        self.rejected + self.coordinate_failures + self.fetch_failures + self.contract_failures
    }
}

impl std::fmt::Display for DatasetReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Exported {}/{} samples in {:.1?} ({}); {} rejected, {} fetch failures, \
             {} coordinate failures, {} contract violations, {} past the end, {} retries",
            self.exported,
            self.samples,
            self.elapsed,
            self.written,
            self.rejected,
            self.fetch_failures,
            self.coordinate_failures,
            self.contract_failures,
            self.out_of_range,
            self.retries
        )
    }
}

#[derive(Default)]
struct Counters {
    done: AtomicU64,
    exported: AtomicU64,
    rejected: AtomicU64,
    out_of_range: AtomicU64,
    coordinate_failures: AtomicU64,
    fetch_failures: AtomicU64,
    contract_failures: AtomicU64,
    retries: AtomicU64,
}

impl Counters {
    fn report(&self) -> DatasetReport {
        DatasetReport {
            exported: self.exported.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            out_of_range: self.out_of_range.load(Ordering::Relaxed),
            coordinate_failures: self.coordinate_failures.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            contract_failures: self.contract_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            ..DatasetReport::default()
        }
    }
}

enum SplitAssignment<'a> {
    Sampled(&'a SplitSampler),
    Fixed(Split),
}

impl SplitAssignment<'_> {
    fn assign(&self, index: u64) -> Split {
        match self {
            SplitAssignment::Sampled(sampler) => sampler.assign(index),
            SplitAssignment::Fixed(split) => *split,
        }
    }
}

struct ElementContext<'a, F: SessionFactory> {
    factory: &'a F,
    image: &'a str,
    collection: &'a CollectionRef,
    selectors: &'a [String],
    scale_m: f64,
    patch_size: usize,
    fetch_mode: FetchMode,
    policy: RetryPolicy,
    validate_values: bool,
    counters: &'a Counters,
}

/// One unit of parallel work. Never fails the job: every failure is logged,
/// counted and drops only this element.
fn process_element<F: SessionFactory>(
    ctx: &ElementContext<'_, F>,
    session: &mut Option<F::Backend>,
    tx: &Sender<(Split, Vec<u8>)>,
    index: u64,
    assignment: &SplitAssignment<'_>,
) {
    let counters = ctx.counters;

    if session.is_none() {
        match ctx.factory.open_session() {
            Ok(backend) => *session = Some(backend),
            Err(err) => {
                log::warn!("Dropping sample {}, no backend session: {}", index, err);
                counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
    }
    let backend = match session.as_ref() {
        Some(backend) => backend,
        None => return,
    };

    let location = match backend.sample_coordinate(ctx.collection, index) {
        Ok(coordinate) => SampleLocation::new(index, coordinate),
        Err(FetchError::OutOfRange { .. }) => {
            log::debug!("No sample at index {}", index);
            counters.out_of_range.fetch_add(1, Ordering::Relaxed);
            return;
        }
        Err(err) => {
            log::warn!("Dropping sample {}, coordinate lookup failed: {}", index, err);
            counters.coordinate_failures.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    let request = PatchRequest {
        coordinate: location.coordinate,
        bands: ctx.selectors.to_vec(),
        scale_m: ctx.scale_m,
        size: ctx.patch_size,
    };

    let fetched = ctx.policy.run(
        FetchError::is_transient,
        |attempt, delay, err| {
            counters.retries.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "Retrying sample {} (attempt {}, backing off {:?}): {}",
                index,
                attempt,
                delay,
                err
            );
        },
        || match ctx.fetch_mode {
            FetchMode::Download => backend.fetch_patch(ctx.image, &request),
            FetchMode::Compute => backend.compute_patch(ctx.image, &request),
        },
    );
    let patch = match fetched {
        Ok(patch) => patch,
        Err(err) => {
            log::warn!("Dropping sample {}: {}", index, err);
            counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    if ctx.validate_values && !validate::has_finite_values(&patch) {
        log::debug!("Rejecting sample {}, non finite values", index);
        counters.rejected.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let record = match serialize_patch(&patch, ctx.selectors) {
        Ok(record) => record,
        Err(err) => {
            log::error!("Sample {} breaks the record contract: {}", index, err);
            counters.contract_failures.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    if tx.send((assignment.assign(index), record)).is_err() {
        // Writer already failed, the job error surfaces on join.
        return;
    }
    counters.exported.fetch_add(1, Ordering::Relaxed);
}

/// One float feature per band, values in plane order. The band names of the
/// patch have to match the requested selectors exactly.
fn serialize_patch(patch: &Patch, selectors: &[String]) -> Result<Vec<u8>> {
    if patch.band_names() != selectors {
        return Err(Error::Runtime(format!(
            "Patch bands {:?} do not match the requested selectors {:?}",
            patch.band_names(),
            selectors
        )));
    }

    let features: Vec<(&str, &[f32])> = selectors
        .iter()
        .enumerate()
        .map(|(index, name)| (name.as_str(), patch.band_values(index)))
        .collect();

    Ok(train_record::encode_example(&features))
}

/// The writer thread is the only holder of file handles. Workers feed it
/// over the channel, a writer error fails the job.
fn write_split_records(
    directories: [PathBuf; 3],
    records_per_shard: u64,
    rx: Receiver<(Split, Vec<u8>)>,
) -> Result<SplitCounts> {
    let mut writers = Vec::with_capacity(directories.len());
    for (split, directory) in Split::ALL.into_iter().zip(directories) {
        writers.push(ShardedRecordWriter::create(
            directory,
            split.role(),
            records_per_shard,
        )?);
    }

    let mut counts = SplitCounts::default();
    for (split, record) in rx {
        writers[split.index()].write_record(&record)?;
        counts.add(split, 1);
    }

    for writer in writers {
        writer.finish()?;
    }

    Ok(counts)
}

fn join_writer(handle: std::thread::JoinHandle<Result<SplitCounts>>) -> Result<SplitCounts> {
    handle
        .join()
        .map_err(|_| Error::Runtime("Record writer thread panicked".to_string()))?
}

pub(crate) fn check_bands<B: RasterBackend>(backend: &B, image: &str, selectors: &[String]) -> Result {
    let available = backend.image_bands(image)?;
    for name in selectors {
        if !available.contains(name) {
            return Err(Error::InvalidArgument(format!(
                "Band {} is not part of image {}",
                name, image
            )));
        }
    }

    Ok(())
}

fn create_scoped_thread_pool(thread_count: Option<usize>) -> Result<rayon::ThreadPool> {
    let mut pool_builder = rayon::ThreadPoolBuilder::new();
    if let Some(count) = thread_count {
        pool_builder = pool_builder.num_threads(count);
    }
    pool_builder
        .build()
        .map_err(|e| Error::Runtime(format!("Failed to create threadpool: {e}")))
}
