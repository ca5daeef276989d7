//! Seams between the pipeline and its external collaborators.
//!
//! Aggregation may run in-process ([`crate::grid::GridAggregator`]) or on a
//! remote service ([`crate::aggregation_client::AggregationClient`]). Routing is
//! always a black-box service; [`crate::osrm::OsrmClient`] is the production
//! implementation.

use thiserror::Error;

use crate::http::HttpError;
use crate::model::{Centroid, Coordinate, Point};
use crate::polyline::Polyline;

/// Reduces a point cloud to cell centroids.
pub trait PointAggregator {
    fn aggregate(&self, points: &[Point], radius_m: f64) -> Result<Vec<Centroid>, AggregationError>;
}

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("aggregation radius must be a positive finite number of meters, got {0}")]
    InvalidRadius(f64),
    #[error("aggregation service at {0} is not healthy")]
    Unhealthy(String),
    #[error("aggregation service reported an error: {0}")]
    Service(String),
    #[error("aggregation service returned a malformed centroid id {0:?}")]
    MalformedId(String),
    #[error(transparent)]
    Http(#[from] HttpError),
}

/// A single detailed route between two points.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteLeg {
    pub duration_s: f64,
    pub distance_m: f64,
    pub geometry: Polyline,
}

/// A travel-time service able to answer one-to-many duration queries and
/// point-to-point route queries.
///
/// Implementations are shared by all scheduler workers and must be `Sync`.
pub trait RoutingService: Sync {
    /// Travel durations in seconds from `source` to each destination, in
    /// destination order. `None` marks an unreachable destination.
    fn table(
        &self,
        source: Coordinate,
        destinations: &[Coordinate],
    ) -> Result<Vec<Option<f64>>, RoutingError>;

    /// Full route geometry, duration and distance between two points.
    fn route(&self, from: Coordinate, to: Coordinate) -> Result<RouteLeg, RoutingError>;

    /// Blocks until the service can answer queries around `probe`.
    fn ready(&self, _probe: Coordinate) -> Result<(), RoutingError> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("routing service returned {code}: {message}")]
    Api { code: String, message: String },
    #[error("routing service returned no {0}")]
    Empty(&'static str),
    #[error(transparent)]
    Http(#[from] HttpError),
}
