//! Client for an external point aggregation service.
//!
//! The service exposes `GET /health` and `POST /aggregate`. The health probe
//! is bounded and never retried: an unhealthy service aborts the run before
//! any expensive work starts. The aggregation call itself may run for a long
//! time and is retried on connection failures only.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::{CallTimeout, CancelToken, HttpClient, HttpError, ReqwestTransport, RetryPolicy, Transport};
use crate::model::{Centroid, CentroidId, Point};
use crate::traits::{AggregationError, PointAggregator};

#[derive(Debug, Clone)]
pub struct AggregationServiceConfig {
    pub base_url: String,
    pub health_timeout_secs: u64,
}

impl Default for AggregationServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            health_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregationClient<T = ReqwestTransport> {
    config: AggregationServiceConfig,
    http: HttpClient<T>,
}

impl AggregationClient {
    pub fn new(
        config: AggregationServiceConfig,
        retry: RetryPolicy,
        cancel: CancelToken,
    ) -> Result<Self, HttpError> {
        Ok(Self::with_http(config, HttpClient::new(retry, cancel)?))
    }
}

impl<T: Transport> AggregationClient<T> {
    pub fn with_http(config: AggregationServiceConfig, http: HttpClient<T>) -> Self {
        Self { config, http }
    }

    /// True when `/health` answers `{"status": "ok"}` within the timeout.
    pub fn is_healthy(&self) -> bool {
        let url = format!("{}/health", self.config.base_url);
        let timeout = CallTimeout::Bounded(Duration::from_secs(self.config.health_timeout_secs));
        match self.http.get_once(&url, timeout) {
            Ok(response) if response.is_success() => {
                serde_json::from_str::<HealthResponse>(&response.body)
                    .is_ok_and(|health| health.status == "ok")
            }
            Ok(response) => {
                tracing::warn!(status = response.status, "aggregation health check failed");
                false
            }
            Err(err) => {
                tracing::warn!(error = %err, "aggregation service unreachable");
                false
            }
        }
    }

    /// Sends `points` for aggregation without checking health first.
    pub fn request_aggregation(
        &self,
        points: &[Point],
        radius_m: f64,
    ) -> Result<Vec<Centroid>, AggregationError> {
        let request = AggregateRequest {
            radius: radius_m,
            points: points
                .iter()
                .map(|p| WirePoint {
                    oid: p.id,
                    lon: p.lon,
                    lat: p.lat,
                })
                .collect(),
        };
        let body = serde_json::to_value(&request).map_err(|err| HttpError::Request(err.to_string()))?;
        let url = format!("{}/aggregate", self.config.base_url);

        let response: AggregateResponse = match self.http.post_json(&url, &body, CallTimeout::Unbounded) {
            Ok(response) => response,
            // Error replies carry the same envelope with a 4xx status.
            Err(HttpError::Status { status, body }) => match serde_json::from_str(&body) {
                Ok(envelope) => envelope,
                Err(_) => return Err(HttpError::Status { status, body }.into()),
            },
            Err(err) => return Err(err.into()),
        };

        if response.status != "success" {
            return Err(AggregationError::Service(
                response
                    .message
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        let mut centroids = Vec::with_capacity(response.aggregated_points.len());
        for (key, point) in response.aggregated_points {
            let id: CentroidId = key
                .parse()
                .map_err(|_| AggregationError::MalformedId(key.clone()))?;
            centroids.push(Centroid::new(id, point.lon, point.lat));
        }
        centroids.sort_by_key(|c| c.id);

        tracing::info!(
            input = response.input_count.unwrap_or(points.len()),
            output = centroids.len(),
            "remote aggregation finished"
        );

        Ok(centroids)
    }
}

impl<T: Transport> PointAggregator for AggregationClient<T> {
    fn aggregate(&self, points: &[Point], radius_m: f64) -> Result<Vec<Centroid>, AggregationError> {
        if !self.is_healthy() {
            return Err(AggregationError::Unhealthy(self.config.base_url.clone()));
        }
        self.request_aggregation(points, radius_m)
    }
}

#[derive(Debug, Serialize)]
struct AggregateRequest {
    radius: f64,
    points: Vec<WirePoint>,
}

#[derive(Debug, Serialize)]
struct WirePoint {
    oid: i64,
    lon: f64,
    lat: f64,
}

#[derive(Debug, Deserialize)]
struct WireCentroid {
    lon: f64,
    lat: f64,
}

#[derive(Debug, Deserialize)]
struct AggregateResponse {
    status: String,
    #[serde(default)]
    input_count: Option<usize>,
    #[serde(default)]
    aggregated_points: BTreeMap<String, WireCentroid>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}
