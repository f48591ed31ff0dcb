use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ndarray::Array3;
use patch::{Coordinate, Patch, RegionBounds};
use patchgen::backend::{
    CollectionRef, PatchRequest, PointQuery, PointRow, RasterBackend, RegionStats, SessionFactory,
    StratifiedQuery,
};
use patchgen::{
    Error, FetchError, FetchMode, PatchPipelineOptions, RetryPolicy, Split, SplitRatios,
};
use train_record::decode_example;

const BANDS: [&str; 2] = ["B_before", "G_before"];
const LABEL: &str = "class";
const PATCH_SIZE: usize = 4;

/// Shared state behind every fake session, so counters survive the
/// per-worker session openings.
#[derive(Default)]
struct BackendState {
    samples: Vec<Coordinate>,
    /// Sample indices answered with a NaN poisoned patch.
    poisoned: BTreeSet<u64>,
    /// Fetches answered with a rate limit before the first success.
    rate_limited_fetches: u64,
    /// Answer patches whose band names do not match the request.
    mismatched_bands: bool,
    fetch_calls: AtomicU64,
    compute_calls: AtomicU64,
    sessions_opened: AtomicU64,
}

struct FakeBackend {
    state: Arc<BackendState>,
}

impl FakeBackend {
    /// The fake keys patches on the longitude, which carries the sample
    /// index (see [`FakeFactory::with_samples`]).
    fn sample_index(&self, coordinate: Coordinate) -> u64 {
        coordinate.longitude.round() as u64
    }

    fn patch_for(&self, index: u64, bands: &[String], size: usize) -> Patch {
        let mut planes = Array3::from_shape_fn((bands.len(), size, size), |(band, row, col)| {
            (index * 100 + band as u64 * 10) as f32 + (row * size + col) as f32
        });
        if self.state.poisoned.contains(&index) {
            planes[[0, size / 2, size / 2]] = f32::NAN;
        }

        let mut names = bands.to_vec();
        if self.state.mismatched_bands {
            names.reverse();
        }

        Patch::new(names, planes).expect("fake patch construction")
    }
}

impl RasterBackend for FakeBackend {
    fn collection_size(&self, _collection: &CollectionRef) -> Result<u64, FetchError> {
        Ok(self.state.samples.len() as u64)
    }

    fn sample_coordinate(
        &self,
        _collection: &CollectionRef,
        index: u64,
    ) -> Result<Coordinate, FetchError> {
        self.state
            .samples
            .get(index as usize)
            .copied()
            .ok_or(FetchError::OutOfRange {
                index,
                size: self.state.samples.len() as u64,
            })
    }

    fn fetch_patch(&self, _image: &str, request: &PatchRequest) -> Result<Patch, FetchError> {
        let call = self.state.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.state.rate_limited_fetches {
            return Err(FetchError::RateLimited("quota exceeded".to_string()));
        }

        let index = self.sample_index(request.coordinate);
        Ok(self.patch_for(index, &request.bands, request.size))
    }

    fn compute_patch(&self, _image: &str, request: &PatchRequest) -> Result<Patch, FetchError> {
        self.state.compute_calls.fetch_add(1, Ordering::SeqCst);
        let index = self.sample_index(request.coordinate);
        Ok(self.patch_for(index, &request.bands, request.size))
    }

    fn image_bands(&self, _image: &str) -> Result<Vec<String>, FetchError> {
        let mut bands: Vec<String> = BANDS.iter().map(|band| band.to_string()).collect();
        bands.push(LABEL.to_string());
        Ok(bands)
    }

    fn region_stats(
        &self,
        _image: &str,
        _bounds: &RegionBounds,
        _scale_m: f64,
    ) -> Result<RegionStats, FetchError> {
        Ok(RegionStats::default())
    }

    fn sample_points(&self, _image: &str, _query: &PointQuery) -> Result<Vec<PointRow>, FetchError> {
        Ok(Vec::new())
    }

    fn stratified_sample(
        &self,
        _image: &str,
        _query: &StratifiedQuery,
    ) -> Result<String, FetchError> {
        Err(FetchError::Payload("sampling not served".to_string()))
    }
}

struct FakeFactory {
    state: Arc<BackendState>,
    /// Sessions failing to open before the first working one.
    failing_sessions: Mutex<u64>,
}

impl FakeFactory {
    /// Samples are spaced along the equator with the index as longitude, so
    /// a fetched coordinate maps back to its sample.
    fn with_samples(count: u64) -> FakeFactory {
        FakeFactory {
            state: Arc::new(BackendState {
                samples: (0..count).map(|i| Coordinate::latlon(0.0, i as f64)).collect(),
                ..BackendState::default()
            }),
            failing_sessions: Mutex::new(0),
        }
    }

    fn poisoned(mut self, indices: &[u64]) -> FakeFactory {
        Arc::get_mut(&mut self.state).expect("state not shared yet").poisoned =
            indices.iter().copied().collect();
        self
    }

    fn rate_limited_fetches(mut self, count: u64) -> FakeFactory {
        Arc::get_mut(&mut self.state)
            .expect("state not shared yet")
            .rate_limited_fetches = count;
        self
    }

    fn mismatched_bands(mut self) -> FakeFactory {
        Arc::get_mut(&mut self.state)
            .expect("state not shared yet")
            .mismatched_bands = true;
        self
    }
}

impl SessionFactory for FakeFactory {
    type Backend = FakeBackend;

    fn open_session(&self) -> Result<FakeBackend, FetchError> {
        let mut failing = self.failing_sessions.lock().expect("lock");
        if *failing > 0 {
            *failing -= 1;
            return Err(FetchError::Transport("connect refused".to_string()));
        }

        self.state.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeBackend {
            state: Arc::clone(&self.state),
        })
    }
}

fn options(output: &std::path::Path) -> PatchPipelineOptions {
    let mut options = PatchPipelineOptions::new(
        CollectionRef::named("samples"),
        "composite",
        output,
        "burn_4x4_before",
    );
    options.features = BANDS.iter().map(|band| band.to_string()).collect();
    options.label = LABEL.to_string();
    options.patch_size = PATCH_SIZE;
    options.scale_m = 10.0;
    options.grace = 3;
    options.seed = Some(100);
    options.records_per_shard = 4;
    options.threads = Some(4);
    options.retry = RetryPolicy {
        budget: Duration::from_millis(200),
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        multiplier: 2,
    };
    options
}

fn read_all_splits(options: &PatchPipelineOptions) -> Vec<Vec<u8>> {
    let mut records = Vec::new();
    for split in Split::ALL {
        let dir = options.split_dir(split);
        if dir.exists() {
            records.append(&mut train_record::read_dataset(&dir, split.role()).expect("read split"));
        }
    }
    records
}

#[test_log::test]
fn poisoned_patch_never_reaches_the_output() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FakeFactory::with_samples(10).poisoned(&[3]);
    let options = options(dir.path());

    let report = options.run(&factory).unwrap();

    assert_eq!(report.samples, 10);
    assert_eq!(report.enumerated, 13);
    assert_eq!(report.exported, 9);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.out_of_range, 3);
    assert_eq!(report.fetch_failures, 0);
    assert_eq!(report.written.total(), 9);

    let records = read_all_splits(&options);
    assert_eq!(records.len(), 9);

    let mut seen_indices = BTreeSet::new();
    for record in &records {
        let example = decode_example(record).unwrap();
        let names: Vec<&str> = example.feature_names().collect();
        assert_eq!(names, vec!["B_before", "G_before", "class"]);

        let first = example.float_feature("B_before").unwrap();
        assert_eq!(first.len(), PATCH_SIZE * PATCH_SIZE);
        assert!(first.iter().all(|value| value.is_finite()));

        // First value of the first band encodes the sample index.
        seen_indices.insert((first[0] / 100.0).round() as u64);
    }

    let expected: BTreeSet<u64> = (0..10).filter(|index| *index != 3).collect();
    assert_eq!(seen_indices, expected);
}

#[test]
fn band_values_survive_the_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FakeFactory::with_samples(2);
    let mut options = options(dir.path());
    options.grace = 0;
    // Everything in one stream so the lookup below is deterministic.
    options.ratios = SplitRatios::new(0.0, 0.0).unwrap();

    options.run(&factory).unwrap();

    let records =
        train_record::read_dataset(&options.split_dir(Split::Training), "training").unwrap();
    assert_eq!(records.len(), 2);

    for record in &records {
        let example = decode_example(record).unwrap();
        let b = example.float_feature("B_before").unwrap();
        let g = example.float_feature("G_before").unwrap();
        let index = (b[0] / 100.0).round();

        // Row major values as produced by the fake: base + row * size + col.
        for (position, value) in b.iter().enumerate() {
            assert_eq!(*value, index * 100.0 + position as f32);
        }
        for (position, value) in g.iter().enumerate() {
            assert_eq!(*value, index * 100.0 + 10.0 + position as f32);
        }
    }
}

#[test]
fn rate_limited_fetches_are_retried_within_the_budget() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FakeFactory::with_samples(3).rate_limited_fetches(2);
    let mut options = options(dir.path());
    options.grace = 0;

    let report = options.run(&factory).unwrap();

    assert_eq!(report.exported, 3);
    assert_eq!(report.fetch_failures, 0);
    assert_eq!(report.retries, 2);
}

#[test_log::test]
fn exhausted_retry_budget_drops_only_the_failing_elements() {
    let dir = tempfile::tempdir().unwrap();
    // More rate limits than any element's budget can absorb.
    let factory = FakeFactory::with_samples(2).rate_limited_fetches(u64::MAX);
    let mut options = options(dir.path());
    options.grace = 0;
    options.retry = RetryPolicy {
        budget: Duration::from_millis(10),
        initial_backoff: Duration::from_millis(4),
        max_backoff: Duration::from_millis(4),
        multiplier: 2,
    };

    let report = options.run(&factory).unwrap();

    assert_eq!(report.exported, 0);
    assert_eq!(report.fetch_failures, 2);
    assert!(report.retries > 0);
    assert_eq!(read_all_splits(&options).len(), 0);
}

#[test_log::test]
fn mismatched_band_names_count_as_contract_violations() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FakeFactory::with_samples(3).mismatched_bands();
    let mut options = options(dir.path());
    options.grace = 0;

    let report = options.run(&factory).unwrap();

    // The elements are dropped and counted as logic bugs, the job succeeds.
    assert_eq!(report.exported, 0);
    assert_eq!(report.contract_failures, 3);
    assert_eq!(report.rejected, 0);
    assert_eq!(report.fetch_failures, 0);
    assert_eq!(read_all_splits(&options).len(), 0);
}

#[test]
fn compute_mode_routes_through_the_compute_path() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FakeFactory::with_samples(5);
    let mut options = options(dir.path());
    options.grace = 0;
    options.fetch_mode = FetchMode::Compute;

    let report = options.run(&factory).unwrap();

    assert_eq!(report.exported, 5);
    assert_eq!(factory.state.compute_calls.load(Ordering::SeqCst), 5);
    assert_eq!(factory.state.fetch_calls.load(Ordering::SeqCst), 0);
    assert_eq!(read_all_splits(&options).len(), 5);
}

#[test]
fn unknown_band_aborts_before_any_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FakeFactory::with_samples(5);
    let mut options = options(dir.path());
    options.features.push("R_before".to_string());

    let result = options.run(&factory);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert_eq!(factory.state.fetch_calls.load(Ordering::SeqCst), 0);
    assert!(!options.split_dir(Split::Training).exists());
}

#[test]
fn failed_control_session_is_job_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FakeFactory::with_samples(4);
    *factory.failing_sessions.lock().unwrap() = 1;
    let mut options = options(dir.path());
    options.grace = 0;

    assert!(options.run(&factory).is_err());
    assert_eq!(factory.state.fetch_calls.load(Ordering::SeqCst), 0);
    assert!(!options.split_dir(Split::Training).exists());
}

#[test]
fn every_worker_opens_its_own_session() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FakeFactory::with_samples(12);
    let mut options = options(dir.path());
    options.grace = 0;
    options.threads = Some(3);

    options.run(&factory).unwrap();

    // One control session plus at least one per busy worker.
    let sessions = factory.state.sessions_opened.load(Ordering::SeqCst);
    assert!(sessions >= 2, "expected worker sessions, got {sessions}");
}

#[test]
fn seeded_runs_land_every_sample_in_the_same_split() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let first = options(dir_a.path());
    first.run(&FakeFactory::with_samples(10)).unwrap();
    let second = options(dir_b.path());
    second.run(&FakeFactory::with_samples(10)).unwrap();

    for split in Split::ALL {
        let indices = |options: &PatchPipelineOptions| -> BTreeSet<u64> {
            let dir = options.split_dir(split);
            if !dir.exists() {
                return BTreeSet::new();
            }
            train_record::read_dataset(&dir, split.role())
                .unwrap()
                .iter()
                .map(|record| {
                    let example = decode_example(record).unwrap();
                    (example.float_feature("B_before").unwrap()[0] / 100.0).round() as u64
                })
                .collect()
        };

        assert_eq!(indices(&first), indices(&second), "{split} split differs");
    }
}

#[test]
fn presplit_run_writes_each_view_to_its_role() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FakeFactory::with_samples(6);
    let mut options = options(dir.path());
    options.grace = 0;

    // The fake serves the same collection for every filter, so each split
    // stream receives the full view.
    let report = options.run_presplit(&factory, |_, _| ()).unwrap();

    assert_eq!(report.samples, 18);
    assert_eq!(report.written.training, 6);
    assert_eq!(report.written.validation, 6);
    assert_eq!(report.written.test, 6);

    for split in Split::ALL {
        let records =
            train_record::read_dataset(&options.split_dir(split), split.role()).unwrap();
        assert_eq!(records.len(), 6);
    }
}
