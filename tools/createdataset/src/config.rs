use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use patch::{expand_band_names, CompositeWindow, RegionBounds};
use patchgen::backend::{CollectionRef, StratifiedQuery};
use patchgen::{BackendConfig, FetchMode, PatchPipelineOptions, PointPipelineOptions, SplitRatios};

/// Job description read from the `--config` file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub backend: BackendSection,
    pub dataset: DatasetSection,
    /// Optional preflight: log per band statistics over a region before
    /// exporting anything.
    #[serde(default)]
    pub stats: Option<StatsSection>,
    pub sample_source: SampleSource,
}

impl JobConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<JobConfig> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("Cannot read config {}: {}", path.display(), err))?;
        let config: JobConfig = serde_json::from_str(&raw)
            .map_err(|err| anyhow::anyhow!("Malformed config {}: {}", path.display(), err))?;
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendSection {
    pub endpoint: String,
    #[serde(default)]
    pub high_volume_endpoint: Option<String>,
    #[serde(default)]
    pub use_high_volume: bool,
    #[serde(default)]
    pub credentials: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl BackendSection {
    pub fn backend_config(&self) -> BackendConfig {
        let mut config = BackendConfig::for_endpoint(&self.endpoint);
        config.high_volume_endpoint = self.high_volume_endpoint.clone();
        config.use_high_volume = self.use_high_volume;
        config.credentials = self.credentials.clone();
        config.request_timeout = Duration::from_secs(self.request_timeout_secs);
        config
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetSection {
    pub prefix: String,
    pub output: PathBuf,
    pub image: String,
    /// Base band names, expanded across the composite windows.
    pub bands: Vec<String>,
    #[serde(default)]
    pub windows: Vec<String>,
    #[serde(default = "default_label")]
    pub label: String,
    pub scale_m: f64,
    pub patch_size: usize,
    #[serde(default = "default_grace")]
    pub grace: u64,
    pub validation_ratio: f64,
    pub test_ratio: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_records_per_shard")]
    pub records_per_shard: u64,
    #[serde(default)]
    pub fetch_mode: FetchModeConfig,
}

impl DatasetSection {
    pub fn windows(&self) -> anyhow::Result<Vec<CompositeWindow>> {
        self.windows
            .iter()
            .map(|window| {
                window
                    .parse::<CompositeWindow>()
                    .map_err(|err| anyhow::anyhow!("{}", err))
            })
            .collect()
    }

    /// Feature band names with their window suffixes, label excluded.
    pub fn features(&self) -> anyhow::Result<Vec<String>> {
        Ok(expand_band_names(&self.bands, &self.windows()?)?)
    }

    /// Dataset directory stem, e.g. `burn_128x128_before-after`.
    pub fn dataset_name(&self) -> String {
        let mut name = format!("{}_{}x{}", self.prefix, self.patch_size, self.patch_size);
        if !self.windows.is_empty() {
            name.push('_');
            name.push_str(&self.windows.join("-"));
        }
        name
    }

    pub fn ratios(&self) -> anyhow::Result<SplitRatios> {
        Ok(SplitRatios::new(self.validation_ratio, self.test_ratio)?)
    }

    pub fn patch_options(
        &self,
        collection: CollectionRef,
    ) -> anyhow::Result<PatchPipelineOptions> {
        let mut options = PatchPipelineOptions::new(
            collection,
            &self.image,
            &self.output,
            self.dataset_name(),
        );
        options.features = self.features()?;
        options.label = self.label.clone();
        options.scale_m = self.scale_m;
        options.patch_size = self.patch_size;
        options.grace = self.grace;
        options.ratios = self.ratios()?;
        options.seed = self.seed;
        options.fetch_mode = self.fetch_mode.into();
        options.records_per_shard = self.records_per_shard;
        Ok(options)
    }

    pub fn point_options(
        &self,
        collection: CollectionRef,
    ) -> anyhow::Result<PointPipelineOptions> {
        let mut options = PointPipelineOptions::new(
            collection,
            &self.image,
            &self.output,
            self.dataset_name(),
        );
        options.properties = self.features()?;
        options.label = self.label.clone();
        options.scale_m = self.scale_m;
        options.ratios = self.ratios()?;
        options.seed = self.seed.unwrap_or(100);
        options.records_per_shard = self.records_per_shard;
        Ok(options)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchModeConfig {
    #[default]
    Download,
    Compute,
}

impl From<FetchModeConfig> for FetchMode {
    fn from(mode: FetchModeConfig) -> FetchMode {
        match mode {
            FetchModeConfig::Download => FetchMode::Download,
            FetchModeConfig::Compute => FetchMode::Compute,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionSection {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl RegionSection {
    pub fn bounds(&self) -> RegionBounds {
        RegionBounds {
            west: self.west,
            south: self.south,
            east: self.east,
            north: self.north,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatsSection {
    pub region: RegionSection,
    pub scale_m: f64,
}

/// Where the labeled sample points come from: an existing collection or a
/// stratified sample generated server side before the run.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    Collection(String),
    Stratified(StratifiedSection),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StratifiedSection {
    pub class_band: String,
    pub points_per_class: u64,
    pub scale_m: f64,
    #[serde(default)]
    pub region: Option<RegionSection>,
    #[serde(default = "default_stratified_seed")]
    pub seed: u64,
}

impl StratifiedSection {
    pub fn query(&self) -> StratifiedQuery {
        StratifiedQuery {
            class_band: self.class_band.clone(),
            points_per_class: self.points_per_class,
            scale_m: self.scale_m,
            region: self.region.as_ref().map(RegionSection::bounds),
            seed: self.seed,
        }
    }
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_label() -> String {
    "class".to_string()
}

fn default_grace() -> u64 {
    10
}

fn default_records_per_shard() -> u64 {
    256
}

fn default_stratified_seed() -> u64 {
    100
}
