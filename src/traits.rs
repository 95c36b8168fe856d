//! Consumed seams.
//!
//! These are intentionally minimal: a road-network routing service and a
//! persistence layer. Concrete integrations implement them; the engines
//! never issue raw HTTP calls or queries outside these verbs.

use std::fmt;

use crate::model::{Delivery, Driver, Point, Route};

/// Travel figures for one ordered pair of points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leg {
    pub distance_km: f64,
    pub duration_min: f64,
}

/// Distance and duration matrices indexed by the queried point order.
#[derive(Debug, Clone)]
pub struct TableResult {
    pub distances_km: Vec<Vec<f64>>,
    pub durations_min: Vec<Vec<f64>>,
}

/// Routing backend failure. Never surfaces past the distance provider,
/// which degrades to a corrected straight-line estimate.
#[derive(Debug)]
pub enum BackendError {
    Http(reqwest::Error),
    Malformed(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Http(err) => write!(f, "http: {}", err),
            BackendError::Malformed(msg) => write!(f, "malformed response: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Http(err)
    }
}

/// A road-network routing service.
pub trait RoutingBackend {
    /// Travel figures from one point to another.
    fn route(&self, from: Point, to: Point) -> Result<Leg, BackendError>;

    /// All-pairs travel figures for a set of points, batched.
    fn table(&self, points: &[Point]) -> Result<TableResult, BackendError>;
}

/// Persistence failure, opaque to the engines.
#[derive(Debug, Clone)]
pub struct StoreError(pub String);

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for StoreError {}

/// Read/write surface for Route, Delivery, and Driver records.
pub trait Store {
    fn route(&self, id: &str) -> Result<Option<Route>, StoreError>;
    fn driver(&self, id: &str) -> Result<Option<Driver>, StoreError>;

    /// All deliveries attached to a route, in no particular order.
    fn deliveries_for_route(&self, route_id: &str) -> Result<Vec<Delivery>, StoreError>;

    fn create_route(&self, route: &Route) -> Result<(), StoreError>;
    fn update_route(&self, route: &Route) -> Result<(), StoreError>;
    fn create_delivery(&self, delivery: &Delivery) -> Result<(), StoreError>;
    fn update_delivery(&self, delivery: &Delivery) -> Result<(), StoreError>;
    fn delete_delivery(&self, id: &str) -> Result<(), StoreError>;
}
