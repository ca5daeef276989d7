//! K-nearest facility lookup on the sphere.
//!
//! Facilities are embedded on the unit sphere and bulk-loaded into an R*-tree
//! once. The index is never mutated afterwards and is shared freely between
//! threads.

use std::collections::HashMap;

use rayon::prelude::*;
use rstar::RTree;
use rstar::primitives::GeomWithData;

use crate::geodesy::to_unit_sphere;
use crate::model::{Centroid, CentroidId, Facility, PointId};

/// Embedded facility position tagged with its slot in [`FacilityIndex::facilities`].
type Embedded = GeomWithData<[f64; 3], usize>;

/// Centroid id to facility ids, nearest first.
pub type CandidateList = HashMap<CentroidId, Vec<PointId>>;

pub struct FacilityIndex {
    facilities: Vec<Facility>,
    by_id: HashMap<PointId, usize>,
    tree: RTree<Embedded>,
}

impl FacilityIndex {
    pub fn build(facilities: Vec<Facility>) -> Self {
        let by_id = facilities
            .iter()
            .enumerate()
            .map(|(slot, f)| (f.id, slot))
            .collect();
        let embedded = facilities
            .iter()
            .enumerate()
            .map(|(slot, f)| GeomWithData::new(to_unit_sphere(f.coordinate()), slot))
            .collect();
        let tree = RTree::bulk_load(embedded);

        tracing::debug!(facilities = facilities.len(), "facility index built");

        Self {
            facilities,
            by_id,
            tree,
        }
    }

    pub fn len(&self) -> usize {
        self.facilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facilities.is_empty()
    }

    pub fn facilities(&self) -> &[Facility] {
        &self.facilities
    }

    pub fn get(&self, id: PointId) -> Option<&Facility> {
        self.by_id.get(&id).map(|&slot| &self.facilities[slot])
    }

    /// The `k` facilities closest to `centroid`, nearest first.
    ///
    /// Facilities at exactly the same distance are ordered by id. Returns
    /// every facility when `k` exceeds the index size.
    pub fn nearest(&self, centroid: &Centroid, k: usize) -> Vec<PointId> {
        if k == 0 || self.is_empty() {
            return Vec::new();
        }

        let query = to_unit_sphere(centroid.coordinate());
        let mut hits: Vec<(f64, PointId)> = Vec::with_capacity(k);
        for (item, dist_2) in self.tree.nearest_neighbor_iter_with_distance_2(&query) {
            // Keep pulling past k while the distance ties with the k-th hit.
            if hits.len() >= k && !same_distance(hits[k - 1].0, dist_2) {
                break;
            }
            hits.push((dist_2, self.facilities[item.data].id));
        }

        rank(&mut hits);
        hits.truncate(k);
        hits.into_iter().map(|(_, id)| id).collect()
    }

    /// Candidate lists for every centroid, computed in parallel.
    pub fn resolve(&self, centroids: &[Centroid], k: usize) -> CandidateList {
        centroids
            .par_iter()
            .map(|c| (c.id, self.nearest(c, k)))
            .collect()
    }
}

/// Relative tolerance under which two distances count as equal.
const TIE_TOLERANCE: f64 = 1e-9;

/// Equal up to rounding. Symmetric placements around a centroid differ only
/// in the last bits of their chord length.
fn same_distance(a: f64, b: f64) -> bool {
    (a - b).abs() <= TIE_TOLERANCE * a.abs().max(b.abs())
}

/// Sorts `(distance, id)` pairs by distance, ordering runs of equal
/// distances by id.
fn rank(hits: &mut [(f64, PointId)]) {
    hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    let mut start = 0;
    while start < hits.len() {
        let mut end = start + 1;
        while end < hits.len() && same_distance(hits[start].0, hits[end].0) {
            end += 1;
        }
        hits[start..end].sort_by_key(|&(_, id)| id);
        start = end;
    }
}

/// Builds an index over `facilities` and resolves every centroid against it.
pub fn resolve(centroids: &[Centroid], facilities: Vec<Facility>, k: usize) -> CandidateList {
    FacilityIndex::build(facilities).resolve(centroids, k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::haversine_m;

    fn shelters() -> Vec<Facility> {
        vec![
            Facility::new(101, 135.5000, 34.7000),
            Facility::new(102, 135.5100, 34.7000),
            Facility::new(103, 135.5300, 34.7000),
            Facility::new(104, 135.4700, 34.7100),
            Facility::new(105, 135.5050, 34.6900),
        ]
    }

    #[test]
    fn test_returns_k_nearest_in_distance_order() {
        let centroid = Centroid::new(1, 135.5010, 34.7001);
        let index = FacilityIndex::build(shelters());
        let ids = index.nearest(&centroid, 3);
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], 101);

        let distances: Vec<f64> = ids
            .iter()
            .map(|id| haversine_m(centroid.coordinate(), index.get(*id).unwrap().coordinate()))
            .collect();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]), "{:?}", distances);
    }

    #[test]
    fn test_k_larger_than_facility_count_returns_all() {
        let facilities = shelters()[..3].to_vec();
        let candidates = resolve(&[Centroid::new(1, 135.5, 34.7)], facilities, 5);
        assert_eq!(candidates[&1].len(), 3);
    }

    #[test]
    fn test_empty_facility_set_gives_empty_lists() {
        let centroids = vec![Centroid::new(1, 135.5, 34.7), Centroid::new(2, 135.6, 34.8)];
        let candidates = resolve(&centroids, Vec::new(), 3);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.values().all(Vec::is_empty));
    }

    #[test]
    fn test_ties_prefer_smaller_id() {
        // Two facilities at the same location, inserted with the larger id first.
        let facilities = vec![
            Facility::new(9, 135.51, 34.70),
            Facility::new(3, 135.51, 34.70),
            Facility::new(5, 135.60, 34.70),
        ];
        let index = FacilityIndex::build(facilities);
        let ids = index.nearest(&Centroid::new(1, 135.50, 34.70), 1);
        assert_eq!(ids, vec![3]);
        let ids = index.nearest(&Centroid::new(1, 135.50, 34.70), 3);
        assert_eq!(ids, vec![3, 9, 5]);
    }

    #[test]
    fn test_symmetric_facilities_tie_on_smaller_id() {
        // Same latitude, mirrored in longitude: identical great-circle distance.
        let facilities = vec![
            Facility::new(36, 135.478, 34.651),
            Facility::new(34, 135.452, 34.651),
            Facility::new(40, 135.600, 34.651),
        ];
        let centroid = Centroid::new(1, 135.465, 34.654);
        let index = FacilityIndex::build(facilities);
        assert_eq!(index.nearest(&centroid, 2), vec![34, 36]);
        assert_eq!(index.nearest(&centroid, 1), vec![34]);
    }

    #[test]
    fn test_rank_groups_near_equal_distances() {
        let mut hits = vec![(3.757813055205821e-8, 34), (3.757813055204054e-8, 36), (1.0e-8, 99)];
        rank(&mut hits);
        let ids: Vec<PointId> = hits.iter().map(|&(_, id)| id).collect();
        assert_eq!(ids, vec![99, 34, 36]);
        assert!(same_distance(0.0, 0.0));
        assert!(!same_distance(1.0, 1.0 + 1e-6));
    }

    #[test]
    fn test_resolve_matches_brute_force_great_circle_order() {
        let facilities: Vec<Facility> = (0..60)
            .map(|i| {
                let lon = 135.40 + (i % 10) as f64 * 0.013;
                let lat = 34.60 + (i / 10) as f64 * 0.017;
                Facility::new(i, lon, lat)
            })
            .collect();
        let centroids: Vec<Centroid> = (1..=20)
            .map(|i| Centroid::new(i, 135.41 + i as f64 * 0.005, 34.61 + i as f64 * 0.004))
            .collect();

        let candidates = resolve(&centroids, facilities.clone(), 4);
        for centroid in &centroids {
            let mut brute: Vec<(f64, PointId)> = facilities
                .iter()
                .map(|f| (haversine_m(centroid.coordinate(), f.coordinate()), f.id))
                .collect();
            rank(&mut brute);
            let expected: Vec<PointId> = brute.iter().take(4).map(|(_, id)| *id).collect();
            assert_eq!(candidates[&centroid.id], expected, "centroid {}", centroid.id);
        }
    }

    #[test]
    fn test_lookup_by_id() {
        let index = FacilityIndex::build(shelters());
        assert_eq!(index.get(104).map(|f| f.lon), Some(135.47));
        assert!(index.get(999).is_none());
        assert_eq!(index.len(), 5);
    }
}
