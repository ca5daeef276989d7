//! End-to-end run: validate, aggregate, resolve candidates, fetch routes.

use std::collections::HashMap;

use thiserror::Error;

use crate::http::CancelToken;
use crate::model::{Centroid, CentroidId, Facility, Point, RawPoint, SkipReason, validate};
use crate::nearest::{CandidateList, FacilityIndex};
use crate::scheduler::{Progress, RouteResult, RouteTask, Scheduler, SchedulerConfig, SchedulerError};
use crate::traits::{AggregationError, PointAggregator, RoutingError, RoutingService};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Aggregation radius in meters; grid cells are twice as wide.
    pub radius_m: f64,
    /// Candidate facilities per centroid.
    pub k: usize,
    pub scheduler: SchedulerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            radius_m: 150.0,
            k: 3,
            scheduler: SchedulerConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no valid input points")]
    EmptyInput,
    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),
    #[error("routing service is not ready: {0}")]
    RoutingUnavailable(#[from] RoutingError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Every centroid, ordered by id.
    pub centroids: Vec<Centroid>,
    pub candidates: CandidateList,
    /// One entry per centroid, including failed tasks.
    pub results: HashMap<CentroidId, RouteResult>,
    pub progress: Progress,
    pub skipped_points: Vec<(RawPoint, SkipReason)>,
    pub skipped_facilities: Vec<(RawPoint, SkipReason)>,
}

impl PipelineOutput {
    pub fn result_for(&self, centroid_id: CentroidId) -> Option<&RouteResult> {
        self.results.get(&centroid_id)
    }

    /// Centroids paired with their route outcome, ordered by centroid id.
    pub fn rows(&self) -> impl Iterator<Item = (&Centroid, Option<&RouteResult>)> {
        self.centroids
            .iter()
            .map(|c| (c, self.results.get(&c.id)))
    }
}

/// Runs the whole pipeline.
///
/// Invalid points and facilities are dropped and reported in the output.
/// Individual route failures never abort the run; every centroid gets a
/// result. The routing service is probed at the first centroid before any
/// task starts. Setting `cancel` stops new batches from starting.
pub fn run<A, R>(
    raw_points: &[RawPoint],
    raw_facilities: &[RawPoint],
    aggregator: &A,
    routing: &R,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<PipelineOutput, PipelineError>
where
    A: PointAggregator + ?Sized,
    R: RoutingService,
{
    let points = validate::<Point>(raw_points);
    if points.items.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    let facilities = validate::<Facility>(raw_facilities);
    if facilities.items.is_empty() {
        tracing::warn!("no valid facilities; every route task will fail");
    }

    let mut centroids = aggregator.aggregate(&points.items, config.radius_m)?;
    centroids.sort_by_key(|c| c.id);

    let index = FacilityIndex::build(facilities.items);
    let candidates = index.resolve(&centroids, config.k);

    let tasks: Vec<RouteTask> = centroids
        .iter()
        .map(|c| RouteTask {
            centroid: *c,
            candidates: candidates.get(&c.id).cloned().unwrap_or_default(),
        })
        .collect();

    if let Some(first) = centroids.first().filter(|_| !cancel.is_cancelled()) {
        routing.ready(first.coordinate())?;
    }

    let report = Scheduler::new(config.scheduler.clone()).run(&tasks, &index, routing, cancel)?;

    tracing::info!(
        points = points.items.len(),
        skipped_points = points.skipped.len(),
        skipped_facilities = facilities.skipped.len(),
        centroids = centroids.len(),
        succeeded = report.progress.succeeded,
        failed = report.progress.failed,
        success_rate = report.progress.success_rate(),
        "pipeline finished"
    );

    Ok(PipelineOutput {
        centroids,
        candidates,
        results: report.results,
        progress: report.progress,
        skipped_points: points.skipped,
        skipped_facilities: facilities.skipped,
    })
}
