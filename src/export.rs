//! GeoJSON layers handed to the persistence side.
//!
//! Two layers: every centroid as a Point feature (route fields null when
//! routing failed) and every successful route as a LineString feature.

use serde_json::{Value, json};

use crate::pipeline::PipelineOutput;

/// Centroid layer. One feature per centroid, ordered by id.
pub fn centroid_layer(output: &PipelineOutput) -> Value {
    let features: Vec<Value> = output
        .rows()
        .map(|(centroid, result)| {
            let routed = result.filter(|r| r.is_success());
            json!({
                "type": "Feature",
                "geometry": {
                    "type": "Point",
                    "coordinates": [centroid.lon, centroid.lat]
                },
                "properties": {
                    "centroid_id": centroid.id,
                    "facility_id": routed.and_then(|r| r.facility_id),
                    "duration_s": routed.and_then(|r| r.duration_s),
                    "distance_m": routed.and_then(|r| r.distance_m),
                    "status": result.map(|r| r.status),
                    "error": result.and_then(|r| r.error.as_deref()),
                }
            })
        })
        .collect();

    feature_collection("centroids", features)
}

/// Route layer. Failed tasks are left out.
pub fn route_layer(output: &PipelineOutput) -> Value {
    let features: Vec<Value> = output
        .rows()
        .filter_map(|(_, result)| result.filter(|r| r.is_success()))
        .filter_map(|result| {
            let geometry = result.geometry.as_ref()?;
            Some(json!({
                "type": "Feature",
                "geometry": {
                    "type": "LineString",
                    "coordinates": geometry.to_lon_lat()
                },
                "properties": {
                    "centroid_id": result.centroid_id,
                    "facility_id": result.facility_id,
                    "duration_s": result.duration_s,
                    "distance_m": result.distance_m,
                }
            }))
        })
        .collect();

    feature_collection("routes", features)
}

fn feature_collection(name: &str, features: Vec<Value>) -> Value {
    json!({
        "type": "FeatureCollection",
        "name": name,
        "crs": { "type": "name", "properties": { "name": "EPSG:4326" }},
        "features": features
    })
}
