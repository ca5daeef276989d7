//! Grid-based spatial aggregation.
//!
//! Points are projected into a single local plane (anchored at the mean of
//! the whole input), bucketed into square cells of edge `2 * radius`, and
//! each occupied cell is reduced to one centroid.

use std::collections::HashMap;

use geo::{Area, ConvexHull, MultiPoint};
use serde::{Deserialize, Serialize};

use crate::geodesy::LocalFrame;
use crate::model::{Centroid, CentroidId, Coordinate, Point, PointId};
use crate::traits::{AggregationError, PointAggregator};

/// Hull area (m²) at or below which a hull is treated as degenerate.
const DEGENERATE_AREA_M2: f64 = 1e-9;

/// Integer grid coordinate of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub column: i64,
    pub row: i64,
}

/// Why a cell centroid fell back to the arithmetic mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeanReason {
    /// Fewer than three members.
    TooFewPoints,
    /// Members are coincident or collinear.
    DegenerateHull,
}

/// How a cell centroid was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CentroidMethod {
    /// Mean of the convex hull vertices.
    Hull { vertices: usize },
    /// Mean of all members.
    Mean { reason: MeanReason },
}

/// One occupied cell and the centroid it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub key: CellKey,
    pub members: Vec<PointId>,
    pub centroid: Centroid,
    pub method: CentroidMethod,
}

#[derive(Debug, Clone)]
pub struct GridAggregator {
    radius_m: f64,
}

impl GridAggregator {
    pub fn new(radius_m: f64) -> Result<Self, AggregationError> {
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(AggregationError::InvalidRadius(radius_m));
        }
        Ok(Self { radius_m })
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }

    /// Cell edge length in meters.
    pub fn edge_m(&self) -> f64 {
        2.0 * self.radius_m
    }

    /// Aggregates `points` into cells. Cells are numbered 1..=N in order of
    /// first appearance in the input.
    pub fn cells(&self, points: &[Point]) -> Vec<Cell> {
        let Some(frame) = LocalFrame::centered_on(points.iter().map(Point::coordinate)) else {
            return Vec::new();
        };

        let projected: Vec<(f64, f64)> = points
            .iter()
            .map(|p| frame.project(p.coordinate()))
            .collect();

        let edge = self.edge_m();
        let origin = projected
            .iter()
            .fold((f64::INFINITY, f64::INFINITY), |(mx, my), &(x, y)| {
                (mx.min(x), my.min(y))
            });

        let mut slot_of: HashMap<CellKey, usize> = HashMap::new();
        let mut groups: Vec<(CellKey, Vec<usize>)> = Vec::new();
        for (idx, &(x, y)) in projected.iter().enumerate() {
            // Keyed from the minimum corner, not the frame origin: the origin sits
            // at the data mean and would split a cluster narrower than one cell.
            let key = CellKey {
                column: ((x - origin.0) / edge).floor() as i64,
                row: ((y - origin.1) / edge).floor() as i64,
            };
            let slot = *slot_of.entry(key).or_insert_with(|| {
                groups.push((key, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(idx);
        }

        let cells: Vec<Cell> = groups
            .into_iter()
            .enumerate()
            .map(|(slot, (key, indices))| {
                let coords: Vec<Coordinate> =
                    indices.iter().map(|&i| points[i].coordinate()).collect();
                let planar: Vec<(f64, f64)> = indices.iter().map(|&i| projected[i]).collect();
                let (position, method) = centroid_of(&coords, &planar, &frame);
                Cell {
                    key,
                    members: indices.iter().map(|&i| points[i].id).collect(),
                    centroid: Centroid::new(slot as CentroidId + 1, position.lon, position.lat),
                    method,
                }
            })
            .collect();

        tracing::info!(
            input = points.len(),
            output = cells.len(),
            radius_m = self.radius_m,
            "grid aggregation finished"
        );

        cells
    }

    pub fn aggregate(&self, points: &[Point]) -> Vec<Centroid> {
        self.cells(points).into_iter().map(|cell| cell.centroid).collect()
    }
}

impl PointAggregator for GridAggregator {
    fn aggregate(&self, points: &[Point], radius_m: f64) -> Result<Vec<Centroid>, AggregationError> {
        if radius_m == self.radius_m {
            Ok(GridAggregator::aggregate(self, points))
        } else {
            Ok(GridAggregator::new(radius_m)?.aggregate(points))
        }
    }
}

/// Aggregates `points` with cells of edge `2 * radius_m`.
pub fn aggregate(points: &[Point], radius_m: f64) -> Result<Vec<Centroid>, AggregationError> {
    Ok(GridAggregator::new(radius_m)?.aggregate(points))
}

/// Computes the representative location of one cell.
///
/// `coords` and `planar` describe the same members, in degrees and in the
/// local plane of `frame`. Three or more members use the mean of the convex
/// hull vertices; anything else, or a hull without area, uses the plain mean.
pub fn centroid_of(
    coords: &[Coordinate],
    planar: &[(f64, f64)],
    frame: &LocalFrame,
) -> (Coordinate, CentroidMethod) {
    if coords.len() < 3 {
        return (
            mean(coords),
            CentroidMethod::Mean {
                reason: MeanReason::TooFewPoints,
            },
        );
    }

    match hull_vertices(planar) {
        Some(vertices) => {
            let n = vertices.len() as f64;
            let (sx, sy) = vertices
                .iter()
                .fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + x, sy + y));
            (
                frame.unproject(sx / n, sy / n),
                CentroidMethod::Hull {
                    vertices: vertices.len(),
                },
            )
        }
        None => (
            mean(coords),
            CentroidMethod::Mean {
                reason: MeanReason::DegenerateHull,
            },
        ),
    }
}

/// Convex hull vertices without the closing duplicate, or `None` if the hull
/// has no area.
fn hull_vertices(planar: &[(f64, f64)]) -> Option<Vec<(f64, f64)>> {
    let multi: MultiPoint<f64> = planar
        .iter()
        .map(|&(x, y)| geo::Point::new(x, y))
        .collect();
    let hull = multi.convex_hull();
    if hull.unsigned_area() <= DEGENERATE_AREA_M2 {
        return None;
    }

    let mut ring: Vec<(f64, f64)> = hull.exterior().coords().map(|c| (c.x, c.y)).collect();
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    ring.dedup();
    (ring.len() >= 3).then_some(ring)
}

fn mean(coords: &[Coordinate]) -> Coordinate {
    let n = coords.len() as f64;
    let (lon, lat) = coords
        .iter()
        .fold((0.0, 0.0), |(lon, lat), c| (lon + c.lon, lat + c.lat));
    Coordinate::new(lon / n, lat / n)
}
