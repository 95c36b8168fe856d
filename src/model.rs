//! Plain value entities shared by the engines.
//!
//! Entities are read from and written back to an external store; the engines
//! treat them as value objects plus identity. Coordinate and window bounds
//! are validated at construction so downstream code never re-checks them.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::haversine;

/// A geographic coordinate. Immutable value, compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lng: f64,
}

impl Point {
    pub fn new(lat: f64, lng: f64) -> Result<Self, EngineError> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(EngineError::Validation(format!(
                "latitude out of range: {}",
                lat
            )));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(EngineError::Validation(format!(
                "longitude out of range: {}",
                lng
            )));
        }
        Ok(Self { lat, lng })
    }
}

/// A local time-of-day window in minutes from midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_min: i32,
    pub end_min: i32,
}

impl TimeWindow {
    pub fn new(start_min: i32, end_min: i32) -> Result<Self, EngineError> {
        if !(0..=1440).contains(&start_min) || !(0..=1440).contains(&end_min) {
            return Err(EngineError::Validation(format!(
                "window bounds out of day range: [{}, {}]",
                start_min, end_min
            )));
        }
        if start_min > end_min {
            return Err(EngineError::Validation(format!(
                "window start {} after end {}",
                start_min, end_min
            )));
        }
        Ok(Self { start_min, end_min })
    }

    pub fn contains(&self, minute: i32) -> bool {
        self.start_min <= minute && minute <= self.end_min
    }

    pub fn overlaps(&self, other: TimeWindow) -> bool {
        self.start_min <= other.end_min && other.start_min <= self.end_min
    }
}

/// Delivery urgency tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Processing rank: lower runs first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

/// Lifecycle state of a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    InTransit,
    Arrived,
    Delivered,
    Failed,
    Absent,
    Skipped,
    Cancelled,
}

impl DeliveryStatus {
    /// Delivered and Cancelled stops are immutable facts; they are never
    /// reordered or reassigned.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }

    /// Stops the re-optimizer may still move. Absent means retry-later, so
    /// it stays routable; InTransit/Arrived are in-flight facts and do not.
    pub fn is_reroutable(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Pending | DeliveryStatus::Assigned | DeliveryStatus::Absent
        )
    }
}

/// A single drop-off to be visited on a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: String,
    pub destination: Point,
    pub street: String,
    pub city: String,
    pub neighborhood: String,
    pub postal_code: String,
    pub weight_kg: f64,
    pub volume_units: f64,
    pub priority: Priority,
    pub window: Option<TimeWindow>,
    pub zone_ids: Vec<String>,
    pub status: DeliveryStatus,
    /// Owning route, when assigned.
    pub route_id: Option<String>,
    /// 1-based position within the owning route.
    pub order: Option<u32>,
    pub distance_from_prev_km: f64,
    pub time_from_prev_min: f64,
    /// Populated when the stop is marked Failed (e.g. "address not found").
    pub failure_reason: Option<String>,
}

impl Delivery {
    /// A fresh pending delivery with empty address fields and no window.
    pub fn new(id: impl Into<String>, destination: Point) -> Self {
        Self {
            id: id.into(),
            destination,
            street: String::new(),
            city: String::new(),
            neighborhood: String::new(),
            postal_code: String::new(),
            weight_kg: 0.0,
            volume_units: 0.0,
            priority: Priority::Medium,
            window: None,
            zone_ids: Vec::new(),
            status: DeliveryStatus::Pending,
            route_id: None,
            order: None,
            distance_from_prev_km: 0.0,
            time_from_prev_min: 0.0,
            failure_reason: None,
        }
    }

    /// Window end used for deadline-first ordering; windowless stops sort
    /// last.
    pub fn window_end(&self) -> i32 {
        self.window.map(|w| w.end_min).unwrap_or(i32::MAX)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.id.is_empty() {
            return Err(EngineError::Validation("delivery id is empty".to_string()));
        }
        if self.weight_kg < 0.0 {
            return Err(EngineError::Validation(format!(
                "delivery {} has negative weight",
                self.id
            )));
        }
        if self.volume_units < 0.0 {
            return Err(EngineError::Validation(format!(
                "delivery {} has negative volume",
                self.id
            )));
        }
        Ok(())
    }
}

/// The worker/vehicle that performs deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: String,
    /// Last known position, or the depot origin before the shift starts.
    pub position: Point,
    pub capacity_kg: f64,
    pub capacity_units: f64,
    pub max_radius_km: f64,
    /// Historical on-time/delivered ratio in [0, 1].
    pub reliability_rate: f64,
    pub working_hours: TimeWindow,
    pub preferred_zone_ids: Vec<String>,
}

/// Overall state of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteStatus {
    Planned,
    InProgress,
    Paused,
    Completed,
    Cancelled,
}

impl RouteStatus {
    /// Whether the route still accepts re-optimization events. A paused
    /// route is still live.
    pub fn accepts_events(&self) -> bool {
        matches!(
            self,
            RouteStatus::Planned | RouteStatus::InProgress | RouteStatus::Paused
        )
    }
}

/// An ordered set of deliveries owned by one driver for one planning cycle.
///
/// Stop membership and order live on the `Delivery` records (`route_id` +
/// `order`); the route carries the aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub driver_id: String,
    pub origin: Point,
    pub total_distance_km: f64,
    pub total_time_min: f64,
    pub status: RouteStatus,
}

impl Route {
    pub fn new(id: impl Into<String>, driver_id: impl Into<String>, origin: Point) -> Self {
        Self {
            id: id.into(),
            driver_id: driver_id.into(),
            origin,
            total_distance_km: 0.0,
            total_time_min: 0.0,
            status: RouteStatus::Planned,
        }
    }
}

/// A named service area.
///
/// Membership is tested by, in order of precedence: explicit zone ids on the
/// delivery, postal-code prefix, city name, neighborhood name, then a
/// radius-from-center circle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub postal_prefixes: Vec<String>,
    pub cities: Vec<String>,
    pub neighborhoods: Vec<String>,
    pub center: Option<Point>,
    pub radius_km: Option<f64>,
}

impl Zone {
    pub fn covers(&self, delivery: &Delivery) -> bool {
        if delivery.zone_ids.iter().any(|z| *z == self.id) {
            return true;
        }
        if !delivery.postal_code.is_empty()
            && self
                .postal_prefixes
                .iter()
                .any(|prefix| delivery.postal_code.starts_with(prefix.as_str()))
        {
            return true;
        }
        if !delivery.city.is_empty()
            && self.cities.iter().any(|c| c.eq_ignore_ascii_case(&delivery.city))
        {
            return true;
        }
        if !delivery.neighborhood.is_empty()
            && self
                .neighborhoods
                .iter()
                .any(|n| n.eq_ignore_ascii_case(&delivery.neighborhood))
        {
            return true;
        }
        if let (Some(center), Some(radius_km)) = (self.center, self.radius_km) {
            return haversine::haversine_km(center, delivery.destination) <= radius_km;
        }
        false
    }
}

/// Named coefficients for the assignment score. Supplied as configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub zone: f64,
    pub distance: f64,
    pub capacity: f64,
    pub reliability: f64,
    pub balance: f64,
    pub window: f64,
    pub priority: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            zone: 10.0,
            distance: 1.0,
            capacity: 5.0,
            reliability: 10.0,
            balance: 2.0,
            window: 5.0,
            priority: 8.0,
        }
    }
}
