//! Per-region processing loop
//!
//! Each region is loaded, processed and stored inside one isolation
//! boundary. A failing region is logged and reported; the run moves on.

use crate::core::avoid_mask::{
    AvoidMaskPipeline, AvoidMaskProducts, AvoidMaskStats, IntermediateGrid, RegionGrids,
};
use crate::types::{AvoidResult, AvoidanceScore, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Supplies the input grids of a region
pub trait RegionGridSource {
    fn load_region(&self, region_id: &str) -> AvoidResult<RegionGrids>;
}

/// Receives the outputs of a region
pub trait RegionGridSink {
    fn store_score(&mut self, region_id: &str, score: &AvoidanceScore) -> AvoidResult<()>;

    fn store_intermediate(
        &mut self,
        region_id: &str,
        name: &str,
        grid: &IntermediateGrid,
    ) -> AvoidResult<()>;

    /// Remove whatever was stored for a region whose outputs could not all be written
    fn discard_region(&mut self, region_id: &str) -> AvoidResult<()>;
}

/// Outcome of one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RegionStatus {
    Succeeded { stats: AvoidMaskStats },
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionReport {
    pub region_id: String,
    pub status: RegionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RegionReport {
    pub fn is_success(&self) -> bool {
        matches!(self.status, RegionStatus::Succeeded { .. })
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Reports for every region of a run, in input order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub regions: Vec<RegionReport>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.regions.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.regions.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &RegionReport> {
        self.regions.iter().filter(|r| !r.is_success())
    }

    pub fn report(&self, region_id: &str) -> Option<&RegionReport> {
        self.regions.iter().find(|r| r.region_id == region_id)
    }

    pub fn to_json(&self) -> AvoidResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> AvoidResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// Runs the avoidance-mask pipeline over a list of regions
#[derive(Debug, Clone)]
pub struct RegionDriver {
    pipeline: AvoidMaskPipeline,
}

impl RegionDriver {
    pub fn new(pipeline: AvoidMaskPipeline) -> Self {
        Self { pipeline }
    }

    pub fn standard() -> Self {
        Self::new(AvoidMaskPipeline::standard())
    }

    pub fn pipeline(&self) -> &AvoidMaskPipeline {
        &self.pipeline
    }

    /// Process regions one after another
    pub fn run<S, K, I>(&self, region_ids: &[I], source: &S, sink: &mut K) -> RunSummary
    where
        S: RegionGridSource + ?Sized,
        K: RegionGridSink + ?Sized,
        I: AsRef<str>,
    {
        log::info!("Processing {} regions", region_ids.len());

        let mut summary = RunSummary::default();
        for id in region_ids {
            let region_id = id.as_ref();
            let started_at = Utc::now();
            log::info!("{} started {}", region_id, started_at.format("%H:%M:%S"));

            let outcome = self
                .compute(region_id, source)
                .and_then(|products| store_products(region_id, &products, sink).map(|_| products));

            summary.regions.push(finish(region_id, started_at, outcome));
        }

        log_summary(&summary);
        summary
    }

    /// Compute regions concurrently; outputs are stored in input order
    ///
    /// Regions are computed in batches of one per worker thread and each batch
    /// is stored before the next starts, so at most that many regions' products
    /// are held in memory at once.
    #[cfg(feature = "parallel")]
    pub fn run_parallel<S, K, I>(&self, region_ids: &[I], source: &S, sink: &mut K) -> RunSummary
    where
        S: RegionGridSource + Sync + ?Sized,
        K: RegionGridSink + ?Sized,
        I: AsRef<str> + Sync,
    {
        use rayon::prelude::*;

        let batch_size = rayon::current_num_threads().max(1);
        log::info!(
            "Processing {} regions in parallel, {} at a time",
            region_ids.len(),
            batch_size
        );

        let mut summary = RunSummary::default();
        for batch in region_ids.chunks(batch_size) {
            let computed: Vec<(DateTime<Utc>, AvoidResult<AvoidMaskProducts>)> = batch
                .par_iter()
                .map(|id| {
                    let started_at = Utc::now();
                    (started_at, self.compute(id.as_ref(), source))
                })
                .collect();

            for (id, (started_at, result)) in batch.iter().zip(computed) {
                let region_id = id.as_ref();
                let outcome = result
                    .and_then(|products| store_products(region_id, &products, sink).map(|_| products));
                summary.regions.push(finish(region_id, started_at, outcome));
            }
        }

        log_summary(&summary);
        summary
    }

    fn compute<S>(&self, region_id: &str, source: &S) -> AvoidResult<AvoidMaskProducts>
    where
        S: RegionGridSource + ?Sized,
    {
        let grids = source.load_region(region_id)?;
        self.pipeline.process(&grids)
    }
}

/// Store every output of a region, or none of them
fn store_products<K>(region_id: &str, products: &AvoidMaskProducts, sink: &mut K) -> AvoidResult<()>
where
    K: RegionGridSink + ?Sized,
{
    let stored = sink.store_score(region_id, &products.score).and_then(|_| {
        products
            .intermediates
            .iter()
            .try_for_each(|(name, grid)| sink.store_intermediate(region_id, name, grid))
    });

    if stored.is_err() {
        if let Err(e) = sink.discard_region(region_id) {
            log::warn!("{}: could not discard partial outputs: {}", region_id, e);
        }
    }
    stored
}

fn finish(
    region_id: &str,
    started_at: DateTime<Utc>,
    outcome: AvoidResult<AvoidMaskProducts>,
) -> RegionReport {
    let finished_at = Utc::now();
    let status = match outcome {
        Ok(products) => {
            log::info!("{} finished {}", region_id, finished_at.format("%H:%M:%S"));
            RegionStatus::Succeeded {
                stats: products.stats,
            }
        }
        Err(e) => {
            log::error!("{} failed: {}", region_id, e);
            RegionStatus::Failed {
                kind: e.kind(),
                message: e.to_string(),
            }
        }
    };

    RegionReport {
        region_id: region_id.to_string(),
        status,
        started_at,
        finished_at,
    }
}

fn log_summary(summary: &RunSummary) {
    log::info!(
        "Run complete: {} succeeded, {} failed",
        summary.succeeded(),
        summary.failed()
    );
}
