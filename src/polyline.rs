//! Polyline representation for route geometries.
//!
//! Routes arrive from the routing service as GeoJSON `[lon, lat]` pairs and
//! leave through the GeoJSON export in the same order. In between they are
//! held as decoded coordinates.

use serde::{Deserialize, Serialize};

use crate::geodesy::haversine_m;
use crate::model::Coordinate;

/// A route geometry as an ordered list of coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    points: Vec<Coordinate>,
}

impl Polyline {
    pub fn new(points: Vec<Coordinate>) -> Self {
        Self { points }
    }

    /// Builds a polyline from GeoJSON-ordered `[lon, lat]` pairs.
    pub fn from_lon_lat(pairs: &[[f64; 2]]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|&[lon, lat]| Coordinate::new(lon, lat))
                .collect(),
        )
    }

    pub fn points(&self) -> &[Coordinate] {
        &self.points
    }

    pub fn into_points(self) -> Vec<Coordinate> {
        self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// GeoJSON-ordered `[lon, lat]` pairs.
    pub fn to_lon_lat(&self) -> Vec<[f64; 2]> {
        self.points.iter().map(|c| [c.lon, c.lat]).collect()
    }

    /// Great-circle length along the vertices, in meters.
    pub fn length_m(&self) -> f64 {
        self.points
            .windows(2)
            .map(|pair| haversine_m(pair[0], pair[1]))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_lon_lat_keeps_axis_order() {
        let polyline = Polyline::from_lon_lat(&[[135.5, 34.7], [135.6, 34.8]]);
        assert_eq!(polyline.points()[0], Coordinate::new(135.5, 34.7));
        assert_eq!(polyline.to_lon_lat(), vec![[135.5, 34.7], [135.6, 34.8]]);
    }

    #[test]
    fn test_into_points() {
        let points = vec![Coordinate::new(-120.2, 38.5), Coordinate::new(-120.95, 40.7)];
        let polyline = Polyline::new(points.clone());
        assert_eq!(polyline.into_points(), points);
    }

    #[test]
    fn test_empty_polyline() {
        let polyline = Polyline::new(vec![]);
        assert!(polyline.is_empty());
        assert_eq!(polyline.length_m(), 0.0);
    }

    #[test]
    fn test_length_sums_segments() {
        let a = Coordinate::new(135.50, 34.70);
        let b = Coordinate::new(135.51, 34.70);
        let c = Coordinate::new(135.51, 34.71);
        let polyline = Polyline::new(vec![a, b, c]);
        let expected = haversine_m(a, b) + haversine_m(b, c);
        assert!((polyline.length_m() - expected).abs() < 1e-9);
    }
}
