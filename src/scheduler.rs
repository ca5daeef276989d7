//! Route task scheduler.
//!
//! Each centroid becomes one [`RouteTask`]. A task asks the routing service
//! for a duration table against its candidate facilities, picks the fastest
//! one, then fetches the detailed route to it. Tasks are grouped in batches;
//! a bounded worker pool runs whole batches, one task after another inside
//! a batch, so the number of requests in flight never exceeds the pool
//! width. Finished batches flow over a channel to a single collector that
//! owns the results and progress counters.

use std::collections::HashMap;
use std::sync::mpsc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::CancelToken;
use crate::model::{Centroid, CentroidId, Coordinate, PointId};
use crate::nearest::FacilityIndex;
use crate::polyline::Polyline;
use crate::traits::RoutingService;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker pool width.
    pub workers: usize,
    /// Upper bound on tasks per batch.
    pub max_batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            max_batch_size: 20,
        }
    }
}

impl SchedulerConfig {
    /// Tasks per batch: enough to give each worker about one batch, capped
    /// at `max_batch_size`, never zero.
    pub fn batch_size(&self, tasks: usize) -> usize {
        (tasks / self.workers.max(1))
            .max(1)
            .min(self.max_batch_size.max(1))
    }
}

/// One centroid and its candidate facilities, nearest first.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteTask {
    pub centroid: Centroid,
    pub candidates: Vec<PointId>,
}

/// Terminal state of a route task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteStatus {
    Completed,
    /// None of the candidate ids resolved to a known facility.
    CandidateLookupFailed,
    /// The table query failed or produced no usable duration.
    TableFailed,
    /// The route query to the chosen facility failed.
    RouteFailed,
    /// The run was cancelled before the task's batch started.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    pub centroid_id: CentroidId,
    pub facility_id: Option<PointId>,
    pub duration_s: Option<f64>,
    pub distance_m: Option<f64>,
    pub geometry: Option<Polyline>,
    pub status: RouteStatus,
    pub error: Option<String>,
}

impl RouteResult {
    fn failed(
        centroid_id: CentroidId,
        status: RouteStatus,
        facility_id: Option<PointId>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            centroid_id,
            facility_id,
            duration_s: None,
            distance_m: None,
            geometry: None,
            status,
            error: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RouteStatus::Completed
    }
}

/// Running success/failure counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

impl Progress {
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Share of completed tasks that succeeded, in `[0, 1]`.
    pub fn success_rate(&self) -> f64 {
        match self.completed() {
            0 => 0.0,
            done => self.succeeded as f64 / done as f64,
        }
    }

    fn record(&mut self, result: &RouteResult) {
        if result.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleReport {
    pub results: HashMap<CentroidId, RouteResult>,
    pub progress: Progress,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Drives one task through lookup, table and route queries.
pub fn execute_task<R: RoutingService>(
    task: &RouteTask,
    facilities: &FacilityIndex,
    routing: &R,
) -> RouteResult {
    let centroid_id = task.centroid.id;
    let targets: Vec<_> = task
        .candidates
        .iter()
        .filter_map(|id| facilities.get(*id))
        .collect();
    if targets.is_empty() {
        return RouteResult::failed(
            centroid_id,
            RouteStatus::CandidateLookupFailed,
            None,
            "no facility coordinates found",
        );
    }

    let source = task.centroid.coordinate();
    let destinations: Vec<Coordinate> = targets.iter().map(|f| f.coordinate()).collect();
    let durations = match routing.table(source, &destinations) {
        Ok(durations) => durations,
        Err(err) => {
            return RouteResult::failed(
                centroid_id,
                RouteStatus::TableFailed,
                None,
                format!("table query failed: {}", err),
            );
        }
    };
    let usable = &durations[..durations.len().min(targets.len())];
    let Some((best, _)) = fastest(usable) else {
        return RouteResult::failed(
            centroid_id,
            RouteStatus::TableFailed,
            None,
            "table query returned no usable duration",
        );
    };
    let chosen = targets[best];

    match routing.route(source, chosen.coordinate()) {
        Ok(leg) => RouteResult {
            centroid_id,
            facility_id: Some(chosen.id),
            duration_s: Some(leg.duration_s),
            distance_m: Some(leg.distance_m),
            geometry: Some(leg.geometry),
            status: RouteStatus::Completed,
            error: None,
        },
        Err(err) => RouteResult::failed(
            centroid_id,
            RouteStatus::RouteFailed,
            Some(chosen.id),
            format!("route query failed: {}", err),
        ),
    }
}

/// Index and value of the smallest finite duration; the first one wins ties.
fn fastest(durations: &[Option<f64>]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, duration) in durations.iter().enumerate() {
        let Some(d) = duration.filter(|d| d.is_finite()) else {
            continue;
        };
        if best.is_none_or(|(_, current)| d < current) {
            best = Some((idx, d));
        }
    }
    best
}

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn run<R: RoutingService>(
        &self,
        tasks: &[RouteTask],
        facilities: &FacilityIndex,
        routing: &R,
        cancel: &CancelToken,
    ) -> Result<ScheduleReport, SchedulerError> {
        self.run_with_progress(tasks, facilities, routing, cancel, |_| {})
    }

    /// Runs every task and returns one result per centroid.
    ///
    /// `on_progress` is called on the calling thread as each result is
    /// collected. Once `cancel` is set, batches that have not started yet are
    /// reported as [`RouteStatus::Cancelled`] without touching the network.
    pub fn run_with_progress<R, P>(
        &self,
        tasks: &[RouteTask],
        facilities: &FacilityIndex,
        routing: &R,
        cancel: &CancelToken,
        mut on_progress: P,
    ) -> Result<ScheduleReport, SchedulerError>
    where
        R: RoutingService,
        P: FnMut(&Progress),
    {
        let batch_size = self.config.batch_size(tasks.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .thread_name(|i| format!("route-worker-{}", i))
            .build()?;

        tracing::info!(
            tasks = tasks.len(),
            batch_size,
            workers = self.config.workers,
            "starting route tasks"
        );

        let mut results = HashMap::with_capacity(tasks.len());
        let mut progress = Progress {
            total: tasks.len(),
            ..Progress::default()
        };
        let (tx, rx) = mpsc::channel::<Vec<RouteResult>>();

        pool.in_place_scope(|scope| {
            for batch in tasks.chunks(batch_size) {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let outcomes = if cancel.is_cancelled() {
                        batch
                            .iter()
                            .map(|task| {
                                RouteResult::failed(
                                    task.centroid.id,
                                    RouteStatus::Cancelled,
                                    None,
                                    "run cancelled before batch started",
                                )
                            })
                            .collect()
                    } else {
                        batch
                            .iter()
                            .map(|task| execute_task(task, facilities, routing))
                            .collect()
                    };
                    // The collector outlives every batch; a send cannot fail.
                    let _ = tx.send(outcomes);
                });
            }
            drop(tx);

            for outcomes in rx {
                for result in outcomes {
                    progress.record(&result);
                    if let Some(reason) = result.error.as_deref() {
                        tracing::warn!(
                            centroid_id = result.centroid_id,
                            status = ?result.status,
                            reason,
                            "route task failed"
                        );
                    }
                    results.insert(result.centroid_id, result);
                    on_progress(&progress);
                }
                tracing::info!(
                    succeeded = progress.succeeded,
                    failed = progress.failed,
                    total = progress.total,
                    "route progress"
                );
            }
        });

        tracing::info!(
            succeeded = progress.succeeded,
            failed = progress.failed,
            success_rate = progress.success_rate(),
            "route tasks finished"
        );

        Ok(ScheduleReport { results, progress })
    }
}
