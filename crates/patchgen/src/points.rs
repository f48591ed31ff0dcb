use std::path::PathBuf;
use std::time::{Duration, Instant};

use train_record::ShardedRecordWriter;

use crate::backend::{CollectionRef, PointQuery, PointRow, RasterBackend, SessionFactory};
use crate::pipeline::check_bands;
use crate::split::{Split, SplitCounts, SplitRatios};
use crate::{Error, Result};

/// Configuration of one point dataset export.
///
/// Points carry a single band value per property instead of a spatial
/// neighborhood. The collection is pre-partitioned through its server side
/// random column, one query per split, so no local split draws happen.
#[derive(Clone, Debug)]
pub struct PointPipelineOptions {
    pub collection: CollectionRef,
    pub image: String,
    /// Property band names sampled per point.
    pub properties: Vec<String>,
    pub label: String,
    pub scale_m: f64,
    pub ratios: SplitRatios,
    /// Seed of the server side random column.
    pub seed: u64,
    pub output: PathBuf,
    pub dataset_name: String,
    pub records_per_shard: u64,
}

impl PointPipelineOptions {
    pub fn new(
        collection: CollectionRef,
        image: impl Into<String>,
        output: impl Into<PathBuf>,
        dataset_name: impl Into<String>,
    ) -> PointPipelineOptions {
        PointPipelineOptions {
            collection,
            image: image.into(),
            properties: Vec::new(),
            label: "class".to_string(),
            scale_m: 10.0,
            ratios: SplitRatios::default(),
            seed: 100,
            output: output.into(),
            dataset_name: dataset_name.into(),
            records_per_shard: 1024,
        }
    }

    /// Every property sampled per point: the configured ones plus the label.
    pub fn selectors(&self) -> Vec<String> {
        let mut selectors = self.properties.clone();
        selectors.push(self.label.clone());
        selectors
    }

    pub fn split_dir(&self, split: Split) -> PathBuf {
        self.output
            .join(format!("{}_{}", self.dataset_name, split.role()))
    }

    fn validate(&self) -> Result {
        if self.properties.is_empty() {
            return Err(Error::InvalidArgument(
                "No point properties configured".to_string(),
            ));
        }
        if self.properties.contains(&self.label) {
            return Err(Error::InvalidArgument(format!(
                "Label band {} also appears as a property",
                self.label
            )));
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

    /// Export per point band values, one sharded record stream per split.
    pub fn run<F: SessionFactory>(&self, factory: &F) -> Result<PointReport> {
        self.validate()?;
        let start = Instant::now();
        let selectors = self.selectors();

        let backend = factory.open_session()?;
        check_bands(&backend, &self.image, &selectors)?;

        let mut report = PointReport::default();
        for split in Split::ALL {
            let view = self
                .collection
                .clone()
                .with_filter(self.ratios.random_filter(split, self.seed));
            let query = PointQuery {
                collection: view,
                properties: selectors.clone(),
                scale_m: self.scale_m,
            };

            let rows = backend.sample_points(&self.image, &query)?;
            log::info!("{}: {} points from {}", split, rows.len(), self.collection.collection);
            report.samples += rows.len() as u64;

            let mut writer =
                ShardedRecordWriter::create(self.split_dir(split), split.role(), self.records_per_shard)?;
            for row in &rows {
                match serialize_row(row, &selectors) {
                    Ok(record) => {
                        writer.write_record(&record)?;
                        report.exported += 1;
                    }
                    Err(err) => {
                        log::error!("Point row breaks the record contract: {}", err);
                        report.contract_failures += 1;
                    }
                }
            }

            let set = writer.finish()?;
            report.written.add(split, set.records);
        }

        report.elapsed = start.elapsed();
        log::info!("{}", report);
        Ok(report)
    }
}

/// One scalar float feature per property, named after it.
fn serialize_row(row: &PointRow, selectors: &[String]) -> Result<Vec<u8>> {
    if row.values.len() != selectors.len() {
        return Err(Error::Runtime(format!(
            "Point row holds {} values for {} properties",
            row.values.len(),
            selectors.len()
        )));
    }

    let features: Vec<(&str, &[f32])> = selectors
        .iter()
        .zip(row.values.chunks_exact(1))
        .map(|(name, value)| (name.as_str(), value))
        .collect();

    Ok(train_record::encode_example(&features))
}

/// Outcome summary of one point export run.
#[derive(Clone, Debug, Default)]
pub struct PointReport {
    /// Rows returned by the backend over all splits.
    pub samples: u64,
    pub exported: u64,
    pub contract_failures: u64,
    pub written: SplitCounts,
    pub elapsed: Duration,
}

impl std::fmt::Display for PointReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Exported {}/{} points in {:.1?} ({}); {} contract violations",
            self.exported, self.samples, self.elapsed, self.written, self.contract_failures
        )
    }
}
