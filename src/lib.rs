//! shelter-router
//!
//! Reduces a dense point cloud (buildings) to grid-cell centroids, ranks the
//! nearest facilities (shelters) for each centroid on the sphere, and fetches
//! travel times and route geometry for every centroid from an OSRM server.

pub mod model;
pub mod geodesy;
pub mod grid;
pub mod nearest;
pub mod traits;
pub mod http;
pub mod osrm;
pub mod aggregation_client;
pub mod polyline;
pub mod scheduler;
pub mod pipeline;
pub mod export;
