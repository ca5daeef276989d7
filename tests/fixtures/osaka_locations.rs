//! Real Osaka locations for realistic test fixtures.
//!
//! Coordinates sourced from OpenStreetMap. Shelters are designated wide-area
//! evacuation parks; landmarks seed synthetic building clouds.

use shelter_router::model::{Coordinate, PointId, RawPoint};

/// A named location with coordinates.
#[derive(Debug, Clone)]
pub struct Location {
    pub name: &'static str,
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub const fn new(name: &'static str, lat: f64, lon: f64) -> Self {
        Self { name, lat, lon }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lon, self.lat)
    }
}

// ============================================================================
// Wide-area evacuation sites
// ============================================================================

pub const SHELTERS: &[Location] = &[
    Location::new("Osaka Castle Park", 34.6873, 135.5259),
    Location::new("Utsubo Park", 34.6862, 135.4925),
    Location::new("Nakanoshima Park", 34.6921, 135.5079),
    Location::new("Tennoji Park", 34.6498, 135.5106),
    Location::new("Nagai Park", 34.6145, 135.5172),
    Location::new("Ogimachi Park", 34.7061, 135.5117),
    Location::new("Namba Parks", 34.6617, 135.5020),
];

// ============================================================================
// Dense neighbourhoods
// ============================================================================

pub const LANDMARKS: &[Location] = &[
    Location::new("Osaka Station", 34.7025, 135.4959),
    Location::new("Namba Station", 34.6663, 135.5003),
    Location::new("Tsutenkaku", 34.6525, 135.5063),
    Location::new("Kyobashi Station", 34.6966, 135.5340),
    Location::new("Shin-Osaka Station", 34.7334, 135.5001),
];

const METERS_PER_DEGREE: f64 = 111_320.0;

/// Offsets `origin` by `east_m` and `north_m` meters.
pub fn offset(origin: Coordinate, east_m: f64, north_m: f64) -> Coordinate {
    Coordinate::new(
        origin.lon + east_m / (METERS_PER_DEGREE * origin.lat.to_radians().cos()),
        origin.lat + north_m / METERS_PER_DEGREE,
    )
}

/// Shelters as raw facility records, ids 1..=N in table order.
pub fn shelter_records() -> Vec<RawPoint> {
    SHELTERS
        .iter()
        .enumerate()
        .map(|(i, s)| RawPoint::new(i as PointId + 1, s.lon, s.lat))
        .collect()
}

/// A `side` x `side` block of buildings spaced `spacing_m` apart, starting at
/// `origin` and numbered from `first_id`.
pub fn building_block(origin: Coordinate, side: usize, spacing_m: f64, first_id: PointId) -> Vec<RawPoint> {
    (0..side * side)
        .map(|i| {
            let c = offset(
                origin,
                (i % side) as f64 * spacing_m,
                (i / side) as f64 * spacing_m,
            );
            RawPoint::new(first_id + i as PointId, c.lon, c.lat)
        })
        .collect()
}

/// One building block per landmark, ids unique across blocks.
pub fn city_buildings(side: usize, spacing_m: f64) -> Vec<RawPoint> {
    LANDMARKS
        .iter()
        .enumerate()
        .flat_map(|(block, landmark)| {
            building_block(
                landmark.coordinate(),
                side,
                spacing_m,
                1000 * (block as PointId + 1),
            )
        })
        .collect()
}
