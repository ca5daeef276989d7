//! OSRM HTTP adapter for duration tables and detailed routes.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::http::{CallTimeout, CancelToken, HttpClient, HttpError, ReqwestTransport, RetryPolicy, Transport};
use crate::model::Coordinate;
use crate::polyline::Polyline;
use crate::traits::{RouteLeg, RoutingError, RoutingService};

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    /// Timeout of the readiness probe. Table and route calls are unbounded.
    pub probe_timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "walking".to_string(),
            probe_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmClient<T = ReqwestTransport> {
    config: OsrmConfig,
    http: HttpClient<T>,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig, retry: RetryPolicy, cancel: CancelToken) -> Result<Self, HttpError> {
        Ok(Self::with_http(config, HttpClient::new(retry, cancel)?))
    }
}

impl<T: Transport> OsrmClient<T> {
    pub fn with_http(config: OsrmConfig, http: HttpClient<T>) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &OsrmConfig {
        &self.config
    }

    pub fn http(&self) -> &HttpClient<T> {
        &self.http
    }

    pub fn table_url(&self, source: Coordinate, destinations: &[Coordinate]) -> String {
        let coords = std::iter::once(source)
            .chain(destinations.iter().copied())
            .map(format_coordinate)
            .collect::<Vec<_>>()
            .join(";");
        let destination_indices = (1..=destinations.len())
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(";");

        format!(
            "{}/table/v1/{}/{}?sources=0&destinations={}&annotations=duration",
            self.config.base_url, self.config.profile, coords, destination_indices
        )
    }

    pub fn route_url(&self, from: Coordinate, to: Coordinate) -> String {
        format!(
            "{}/route/v1/{}/{};{}?overview=full&geometries=geojson",
            self.config.base_url,
            self.config.profile,
            format_coordinate(from),
            format_coordinate(to)
        )
    }

    /// Blocks until the server accepts connections.
    ///
    /// Issues a trivial route query at `probe`, retrying connection failures
    /// under the client's retry policy. Any HTTP answer counts as reachable;
    /// its status is returned.
    pub fn wait_until_ready(&self, probe: Coordinate) -> Result<u16, HttpError> {
        let url = self.route_url(probe, probe);
        let timeout = CallTimeout::Bounded(Duration::from_secs(self.config.probe_timeout_secs));
        let response = self.http.get(&url, timeout)?;
        if response.is_success() {
            tracing::info!(base_url = %self.config.base_url, "routing service is reachable");
        } else {
            tracing::warn!(
                base_url = %self.config.base_url,
                status = response.status,
                "routing service answered the readiness probe with an error status"
            );
        }
        Ok(response.status)
    }

    fn fetch<R>(&self, url: &str) -> Result<R, RoutingError>
    where
        R: DeserializeOwned + OsrmEnvelope,
    {
        let response = self.http.get(url, CallTimeout::Unbounded)?;
        if !response.is_success() {
            // OSRM explains 4xx answers with the same {code, message} envelope.
            return Err(match serde_json::from_str::<OsrmStatus>(&response.body) {
                Ok(status) => RoutingError::Api {
                    code: status.code,
                    message: status.message.unwrap_or_default(),
                },
                Err(_) => HttpError::Status {
                    status: response.status,
                    body: response.body,
                }
                .into(),
            });
        }

        let body: R = serde_json::from_str(&response.body)
            .map_err(|err| HttpError::Decode(err.to_string()))?;
        let status = body.status();
        if status.code != "Ok" {
            return Err(RoutingError::Api {
                code: status.code.clone(),
                message: status.message.clone().unwrap_or_default(),
            });
        }
        Ok(body)
    }
}

impl<T: Transport> RoutingService for OsrmClient<T> {
    fn table(
        &self,
        source: Coordinate,
        destinations: &[Coordinate],
    ) -> Result<Vec<Option<f64>>, RoutingError> {
        if destinations.is_empty() {
            return Ok(Vec::new());
        }

        let body: OsrmTableResponse = self.fetch(&self.table_url(source, destinations))?;
        let row = body
            .durations
            .and_then(|rows| rows.into_iter().next())
            .ok_or(RoutingError::Empty("durations"))?;

        Ok((0..destinations.len())
            .map(|i| row.get(i).copied().flatten().filter(|d| d.is_finite()))
            .collect())
    }

    fn route(&self, from: Coordinate, to: Coordinate) -> Result<RouteLeg, RoutingError> {
        let body: OsrmRouteResponse = self.fetch(&self.route_url(from, to))?;
        let route = body
            .routes
            .and_then(|routes| routes.into_iter().next())
            .ok_or(RoutingError::Empty("routes"))?;

        Ok(RouteLeg {
            duration_s: route.duration,
            distance_m: route.distance,
            geometry: Polyline::from_lon_lat(&route.geometry.coordinates),
        })
    }

    fn ready(&self, probe: Coordinate) -> Result<(), RoutingError> {
        self.wait_until_ready(probe)?;
        Ok(())
    }
}

fn format_coordinate(c: Coordinate) -> String {
    format!("{:.6},{:.6}", c.lon, c.lat)
}

trait OsrmEnvelope {
    fn status(&self) -> &OsrmStatus;
}

#[derive(Debug, Deserialize)]
struct OsrmStatus {
    code: String,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    #[serde(flatten)]
    status: OsrmStatus,
    durations: Option<Vec<Vec<Option<f64>>>>,
}

impl OsrmEnvelope for OsrmTableResponse {
    fn status(&self) -> &OsrmStatus {
        &self.status
    }
}

#[derive(Debug, Deserialize)]
struct OsrmRouteResponse {
    #[serde(flatten)]
    status: OsrmStatus,
    routes: Option<Vec<OsrmRoute>>,
}

impl OsrmEnvelope for OsrmRouteResponse {
    fn status(&self) -> &OsrmStatus {
        &self.status
    }
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    duration: f64,
    distance: f64,
    geometry: OsrmGeometry,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}
