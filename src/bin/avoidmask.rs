use anyhow::{bail, Context, Result};
use avoidmask::core::{AvoidMaskPipeline, RegionDriver};
use avoidmask::io::{build_density_mosaic, GeoTiffStore, MosaicConfig, RunConfig};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::info;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "avoidmask")]
#[command(about = "Road-density and urban-buffer avoidance masks per region")]
#[command(version)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Round, zero-fill and mosaic per-HUC line-density rasters
    DensityMosaic {
        /// Mosaic configuration (JSON)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Compute the 0-3 avoidance score for every configured region
    AvoidMask {
        /// Run configuration (JSON)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Process regions concurrently
        #[arg(long)]
        parallel: bool,

        /// Write the run summary (JSON) here
        #[arg(long, value_name = "FILE")]
        summary: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    match args.command {
        Command::DensityMosaic { config } => density_mosaic(config),
        Command::AvoidMask {
            config,
            parallel,
            summary,
        } => avoid_mask(config, parallel, summary),
    }
}

fn density_mosaic(config_path: PathBuf) -> Result<()> {
    let config = MosaicConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let report = build_density_mosaic(&config)?;
    info!(
        "Mosaic written to {}: {} sub-units used, {} skipped",
        config.output.display(),
        report.subunits_used.len(),
        report.subunits_skipped.len()
    );
    Ok(())
}

fn avoid_mask(config_path: PathBuf, parallel: bool, summary_path: Option<PathBuf>) -> Result<()> {
    let config = RunConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let mut store = GeoTiffStore::new(&config)?;
    let driver = RegionDriver::new(AvoidMaskPipeline::new(config.params.clone()));
    let region_ids = config.region_ids();

    let summary = if parallel {
        run_parallel(&driver, &region_ids, &mut store)
    } else {
        let source = store.clone();
        driver.run(&region_ids[..], &source, &mut store)
    };

    if let Some(path) = summary_path {
        summary
            .write_json(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Run summary written to {}", path.display());
    }

    if summary.failed() > 0 {
        let failed: Vec<&str> = summary.failures().map(|r| r.region_id.as_str()).collect();
        bail!("{} of {} regions failed: {}", failed.len(), summary.regions.len(), failed.join(", "));
    }
    Ok(())
}

#[cfg(feature = "parallel")]
fn run_parallel(
    driver: &RegionDriver,
    region_ids: &[&str],
    store: &mut GeoTiffStore,
) -> avoidmask::RunSummary {
    let source = store.clone();
    driver.run_parallel(region_ids, &source, store)
}

#[cfg(not(feature = "parallel"))]
fn run_parallel(
    driver: &RegionDriver,
    region_ids: &[&str],
    store: &mut GeoTiffStore,
) -> avoidmask::RunSummary {
    log::warn!("Built without the parallel feature; processing regions sequentially");
    let source = store.clone();
    driver.run(region_ids, &source, store)
}
