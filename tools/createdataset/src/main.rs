use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use env_logger::{Env, TimestampPrecision};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;

use patchgen::backend::{CollectionRef, RasterBackend};
use patchgen::{HttpSessionFactory, SessionFactory};

use crate::config::{JobConfig, SampleSource};

pub type Result<T> = anyhow::Result<T>;

mod config;

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Mode {
    /// Fetch patches and draw every sample's split locally.
    Patch,
    /// Fetch patches from a pre-partitioned collection, one view per split.
    PatchPresplit,
    /// Export per point band values instead of patches.
    Points,
}

#[derive(Parser, Debug)]
#[clap(name = "createdataset", about = "Generate training datasets from remote imagery")]
pub struct Opt {
    #[arg(long = "config", short = 'c')]
    pub config: PathBuf,

    #[arg(long = "mode", short = 'm', value_enum, default_value = "patch")]
    pub mode: Mode,

    #[arg(long = "threads", short = 't')]
    pub threads: Option<usize>,

    /// Override the output directory from the config file.
    #[arg(long = "output", short = 'o')]
    pub output: Option<PathBuf>,

    #[arg(long = "noprogress")]
    pub no_progress: bool,
}

fn resolve_collection<B: RasterBackend>(
    backend: &B,
    image: &str,
    source: &SampleSource,
) -> Result<CollectionRef> {
    match source {
        SampleSource::Collection(name) => Ok(CollectionRef::named(name.clone())),
        SampleSource::Stratified(section) => {
            let collection = backend.stratified_sample(image, &section.query())?;
            log::info!("Generated stratified sample collection {}", collection);
            Ok(CollectionRef::named(collection))
        }
    }
}

fn log_region_stats<B: RasterBackend>(
    backend: &B,
    image: &str,
    stats: &config::StatsSection,
) -> Result<()> {
    let summary = backend.region_stats(image, &stats.region.bounds(), stats.scale_m)?;
    for (band, values) in &summary.bands {
        log::info!(
            "{}/{}: min {:.4} max {:.4} mean {:.4}",
            image,
            band,
            values.min,
            values.max,
            values.mean
        );
    }

    Ok(())
}

fn main() -> Result<()> {
    let opt = Opt::parse();

    let logger = env_logger::Builder::from_env(Env::default().default_filter_or("warn"))
        .format_timestamp(Some(TimestampPrecision::Millis))
        .build();

    let multi = MultiProgress::new();
    let level = logger.filter();
    LogWrapper::new(multi.clone(), logger).try_init().expect("logger init");
    log::set_max_level(level);

    let config = JobConfig::from_file(&opt.config)?;
    let factory = HttpSessionFactory::new(config.backend.backend_config());

    // Preflight on a control session: fail on bad credentials and resolve
    // the sample source before any parallel work.
    let session = factory.open_session()?;
    if let Some(stats) = &config.stats {
        log_region_stats(&session, &config.dataset.image, stats)?;
    }
    let collection = resolve_collection(&session, &config.dataset.image, &config.sample_source)?;
    drop(session);

    let progress = multi.add(ProgressBar::new(0));
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} samples {elapsed}")
            .expect("progress template"),
    );
    if opt.no_progress {
        progress.finish_and_clear();
    }
    let report_progress = {
        let progress = progress.clone();
        let visible = !opt.no_progress;
        move |done: u64, total: u64| {
            if visible {
                progress.set_length(total);
                progress.set_position(done);
            }
        }
    };

    match opt.mode {
        Mode::Patch | Mode::PatchPresplit => {
            let mut options = config.dataset.patch_options(collection)?;
            options.threads = opt.threads;
            if let Some(output) = opt.output {
                options.output = output;
            }

            let report = match opt.mode {
                Mode::Patch => options.run_with_progress(&factory, report_progress)?,
                _ => options.run_presplit(&factory, report_progress)?,
            };
            progress.finish_and_clear();
            println!("{}", report);
        }
        Mode::Points => {
            let mut options = config.dataset.point_options(collection)?;
            if let Some(output) = opt.output {
                options.output = output;
            }

            let report = options.run(&factory)?;
            progress.finish_and_clear();
            println!("{}", report);
        }
    }

    Ok(())
}
