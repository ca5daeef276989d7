//! Point, facility and centroid values shared by every stage.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Object id of an input point or facility.
pub type PointId = i64;

/// Sequential id assigned to a centroid at aggregation time (1..=N).
pub type CentroidId = u64;

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinate {
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// True when both components are finite and inside the WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.lon.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lon)
            && (-90.0..=90.0).contains(&self.lat)
    }
}

/// A building (or any demand location) to be aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: PointId,
    pub lon: f64,
    pub lat: f64,
}

impl Point {
    pub const fn new(id: PointId, lon: f64, lat: f64) -> Self {
        Self { id, lon, lat }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lon, self.lat)
    }
}

/// A candidate destination such as a shelter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    pub id: PointId,
    pub lon: f64,
    pub lat: f64,
}

impl Facility {
    pub const fn new(id: PointId, lon: f64, lat: f64) -> Self {
        Self { id, lon, lat }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lon, self.lat)
    }
}

impl From<Point> for Facility {
    fn from(point: Point) -> Self {
        Self::new(point.id, point.lon, point.lat)
    }
}

/// Representative location of one occupied grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub id: CentroidId,
    pub lon: f64,
    pub lat: f64,
}

impl Centroid {
    pub const fn new(id: CentroidId, lon: f64, lat: f64) -> Self {
        Self { id, lon, lat }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lon, self.lat)
    }
}

/// An unvalidated record as read from a data store. Any field may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    pub id: Option<PointId>,
    pub lon: Option<f64>,
    pub lat: Option<f64>,
}

impl RawPoint {
    pub const fn new(id: PointId, lon: f64, lat: f64) -> Self {
        Self {
            id: Some(id),
            lon: Some(lon),
            lat: Some(lat),
        }
    }
}

/// Why a raw record was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingId,
    MissingCoordinate,
    InvalidCoordinate,
    DuplicateId,
}

/// Outcome of validating a batch of raw records.
#[derive(Debug, Clone)]
pub struct Validated<T> {
    pub items: Vec<T>,
    pub skipped: Vec<(RawPoint, SkipReason)>,
}

impl<T> Validated<T> {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Checks a single record in isolation (duplicate ids are detected by [`validate`]).
pub fn check(raw: &RawPoint) -> Result<Point, SkipReason> {
    let id = raw.id.ok_or(SkipReason::MissingId)?;
    let (lon, lat) = match (raw.lon, raw.lat) {
        (Some(lon), Some(lat)) => (lon, lat),
        _ => return Err(SkipReason::MissingCoordinate),
    };
    if !Coordinate::new(lon, lat).is_valid() {
        return Err(SkipReason::InvalidCoordinate);
    }
    Ok(Point::new(id, lon, lat))
}

/// Splits raw records into valid values and rejected ones.
///
/// Input order is preserved. The first occurrence of an id wins; later
/// records with the same id are reported as [`SkipReason::DuplicateId`].
pub fn validate<T: From<Point>>(raw: &[RawPoint]) -> Validated<T> {
    let mut seen = HashSet::with_capacity(raw.len());
    let mut items = Vec::with_capacity(raw.len());
    let mut skipped = Vec::new();

    for record in raw {
        match check(record) {
            Ok(point) if !seen.insert(point.id) => {
                skipped.push((*record, SkipReason::DuplicateId));
            }
            Ok(point) => items.push(T::from(point)),
            Err(reason) => skipped.push((*record, reason)),
        }
    }

    if !skipped.is_empty() {
        tracing::warn!(
            skipped = skipped.len(),
            valid = items.len(),
            "skipped invalid input records"
        );
    }

    Validated { items, skipped }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_records_pass_through_in_order() {
        let raw = vec![
            RawPoint::new(2, 139.7672, 35.6815),
            RawPoint::new(1, 139.7671, 35.6814),
        ];
        let validated: Validated<Point> = validate(&raw);
        assert_eq!(validated.skipped_count(), 0);
        assert_eq!(validated.items.iter().map(|p| p.id).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn test_rejects_malformed_records() {
        let raw = vec![
            RawPoint::new(1, 135.5, 34.7),
            RawPoint { id: None, lon: Some(135.5), lat: Some(34.7) },
            RawPoint { id: Some(3), lon: None, lat: Some(34.7) },
            RawPoint::new(4, f64::NAN, 34.7),
            RawPoint::new(5, 135.5, f64::INFINITY),
            RawPoint::new(6, 200.0, 34.7),
            RawPoint::new(1, 135.6, 34.8),
        ];
        let validated: Validated<Point> = validate(&raw);

        assert_eq!(validated.items.len(), 1);
        let reasons: Vec<SkipReason> = validated.skipped.iter().map(|(_, r)| *r).collect();
        assert_eq!(
            reasons,
            vec![
                SkipReason::MissingId,
                SkipReason::MissingCoordinate,
                SkipReason::InvalidCoordinate,
                SkipReason::InvalidCoordinate,
                SkipReason::InvalidCoordinate,
                SkipReason::DuplicateId,
            ]
        );
    }

    #[test]
    fn test_validate_into_facilities() {
        let raw = vec![RawPoint::new(10, 135.5, 34.7)];
        let validated: Validated<Facility> = validate(&raw);
        assert_eq!(validated.items, vec![Facility::new(10, 135.5, 34.7)]);
    }

    #[test]
    fn test_coordinate_bounds_are_inclusive() {
        assert!(Coordinate::new(180.0, -90.0).is_valid());
        assert!(Coordinate::new(-180.0, 90.0).is_valid());
        assert!(!Coordinate::new(0.0, 90.0001).is_valid());
    }
}
