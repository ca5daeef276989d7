//! Spherical helpers: local equirectangular projection, unit-sphere embedding
//! and great-circle distance.
//!
//! The projection is only accurate for extents of a few tens of kilometres
//! around its reference point. That is enough for grid cells a few hundred
//! metres wide.

use crate::model::Coordinate;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A planar frame tangent to the sphere at `reference`.
///
/// `x` grows eastward and `y` northward, both in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    reference: Coordinate,
    cos_ref_lat: f64,
}

impl LocalFrame {
    pub fn new(reference: Coordinate) -> Self {
        Self {
            reference,
            cos_ref_lat: reference.lat.to_radians().cos(),
        }
    }

    /// Frame anchored at the arithmetic mean of `coords`. `None` when empty.
    pub fn centered_on<I>(coords: I) -> Option<Self>
    where
        I: IntoIterator<Item = Coordinate>,
    {
        let (mut lon, mut lat, mut n) = (0.0, 0.0, 0usize);
        for c in coords {
            lon += c.lon;
            lat += c.lat;
            n += 1;
        }
        if n == 0 {
            return None;
        }
        Some(Self::new(Coordinate::new(lon / n as f64, lat / n as f64)))
    }

    pub fn reference(&self) -> Coordinate {
        self.reference
    }

    /// Degrees to local meters.
    pub fn project(&self, c: Coordinate) -> (f64, f64) {
        let x = EARTH_RADIUS_M * (c.lon - self.reference.lon).to_radians() * self.cos_ref_lat;
        let y = EARTH_RADIUS_M * (c.lat - self.reference.lat).to_radians();
        (x, y)
    }

    /// Local meters back to degrees; inverse of [`LocalFrame::project`].
    pub fn unproject(&self, x: f64, y: f64) -> Coordinate {
        let lon = self.reference.lon + (x / (EARTH_RADIUS_M * self.cos_ref_lat)).to_degrees();
        let lat = self.reference.lat + (y / EARTH_RADIUS_M).to_degrees();
        Coordinate::new(lon, lat)
    }
}

/// Projects `point` into the frame tangent at `reference`.
pub fn local_project(point: Coordinate, reference: Coordinate) -> (f64, f64) {
    LocalFrame::new(reference).project(point)
}

/// Embeds a coordinate on the unit sphere.
///
/// Euclidean (chord) distance between embedded points is monotonic in
/// great-circle distance, so a plain 3D nearest-neighbour index ranks
/// facilities correctly.
pub fn to_unit_sphere(c: Coordinate) -> [f64; 3] {
    let lat = c.lat.to_radians();
    let lon = c.lon.to_radians();
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}

/// Great-circle distance in meters (haversine formula).
pub fn haversine_m(from: Coordinate, to: Coordinate) -> f64 {
    let lat1_rad = from.lat.to_radians();
    let lat2_rad = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lon = (to.lon - from.lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKYO_STATION: Coordinate = Coordinate::new(139.7671, 35.6814);
    const OSAKA_STATION: Coordinate = Coordinate::new(135.4959, 34.7025);

    #[test]
    fn test_haversine_same_point() {
        let dist = haversine_m(TOKYO_STATION, TOKYO_STATION);
        assert!(dist < 0.001, "Same point should have ~0 distance");
    }

    #[test]
    fn test_haversine_known_distance() {
        // Tokyo Station to Osaka Station is roughly 400 km in a straight line
        let dist = haversine_m(TOKYO_STATION, OSAKA_STATION);
        assert!(
            dist > 390_000.0 && dist < 410_000.0,
            "Tokyo to Osaka should be ~400km, got {}",
            dist
        );
    }

    #[test]
    fn test_reference_projects_to_origin() {
        let (x, y) = local_project(TOKYO_STATION, TOKYO_STATION);
        assert_eq!((x, y), (0.0, 0.0));
    }

    #[test]
    fn test_projection_matches_haversine_at_small_scale() {
        let nearby = Coordinate::new(139.7700, 35.6830);
        let (x, y) = local_project(nearby, TOKYO_STATION);
        let planar = (x * x + y * y).sqrt();
        let spherical = haversine_m(TOKYO_STATION, nearby);
        assert!(
            (planar - spherical).abs() < 0.5,
            "planar {} vs spherical {}",
            planar,
            spherical
        );
    }

    #[test]
    fn test_unproject_inverts_project() {
        let frame = LocalFrame::new(OSAKA_STATION);
        let p = Coordinate::new(135.5012, 34.6987);
        let (x, y) = frame.project(p);
        let back = frame.unproject(x, y);
        assert!((back.lon - p.lon).abs() < 1e-9);
        assert!((back.lat - p.lat).abs() < 1e-9);
    }

    #[test]
    fn test_centered_on_mean() {
        let frame = LocalFrame::centered_on([
            Coordinate::new(135.0, 34.0),
            Coordinate::new(136.0, 35.0),
        ])
        .expect("non-empty input");
        assert_eq!(frame.reference(), Coordinate::new(135.5, 34.5));
        assert!(LocalFrame::centered_on(std::iter::empty()).is_none());
    }

    #[test]
    fn test_unit_sphere_has_unit_norm() {
        let [x, y, z] = to_unit_sphere(OSAKA_STATION);
        assert!(((x * x + y * y + z * z) - 1.0).abs() < 1e-12);
        assert_eq!(to_unit_sphere(Coordinate::new(0.0, 90.0))[2], 1.0);
    }

    #[test]
    fn test_chord_distance_orders_like_great_circle() {
        let origin = to_unit_sphere(TOKYO_STATION);
        let chord = |c: Coordinate| {
            let p = to_unit_sphere(c);
            (0..3).map(|i| (p[i] - origin[i]).powi(2)).sum::<f64>()
        };
        let near = Coordinate::new(139.80, 35.70);
        let far = Coordinate::new(140.20, 36.00);
        assert!(chord(near) < chord(far));
        assert!(haversine_m(TOKYO_STATION, near) < haversine_m(TOKYO_STATION, far));
    }
}
