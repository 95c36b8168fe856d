//! OSRM HTTP adapter for the routing backend seam.

use serde::Deserialize;

use crate::model::Point;
use crate::traits::{BackendError, Leg, RoutingBackend, TableResult};

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn coord_path(points: &[Point]) -> String {
        points
            .iter()
            .map(|p| format!("{:.6},{:.6}", p.lng, p.lat))
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl RoutingBackend for OsrmClient {
    fn route(&self, from: Point, to: Point) -> Result<Leg, BackendError> {
        let url = format!(
            "{}/route/v1/{}/{}?overview=false",
            self.config.base_url,
            self.config.profile,
            Self::coord_path(&[from, to])
        );

        let body = self
            .client
            .get(url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json::<OsrmRouteResponse>())?;

        let first = body
            .routes
            .first()
            .ok_or_else(|| BackendError::Malformed("empty routes array".to_string()))?;

        Ok(Leg {
            distance_km: first.distance / 1000.0,
            duration_min: first.duration / 60.0,
        })
    }

    fn table(&self, points: &[Point]) -> Result<TableResult, BackendError> {
        let url = format!(
            "{}/table/v1/{}/{}?annotations=distance,duration",
            self.config.base_url,
            self.config.profile,
            Self::coord_path(points)
        );

        let body = self
            .client
            .get(url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json::<OsrmTableResponse>())?;

        let distances = body
            .distances
            .ok_or_else(|| BackendError::Malformed("missing distances".to_string()))?;
        let durations = body
            .durations
            .ok_or_else(|| BackendError::Malformed("missing durations".to_string()))?;

        let n = points.len();
        if distances.len() != n || durations.len() != n {
            return Err(BackendError::Malformed(format!(
                "expected {}x{} matrices, got {}x{}",
                n,
                n,
                distances.len(),
                durations.len()
            )));
        }

        Ok(TableResult {
            distances_km: distances
                .into_iter()
                .map(|row| row.into_iter().map(|m| m / 1000.0).collect())
                .collect(),
            durations_min: durations
                .into_iter()
                .map(|row| row.into_iter().map(|s| s / 60.0).collect())
                .collect(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OsrmRouteResponse {
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    /// Meters.
    distance: f64,
    /// Seconds.
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    distances: Option<Vec<Vec<f64>>>,
    durations: Option<Vec<Vec<f64>>>,
}
