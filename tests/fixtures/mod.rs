//! Shared test fixtures: entity builders, an in-memory store, and a
//! failing routing backend that forces the haversine fallback.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use fleet_routing::model::{
    Delivery, DeliveryStatus, Driver, Point, Priority, Route, RouteStatus, TimeWindow,
};
use fleet_routing::traits::{
    BackendError, Leg, RoutingBackend, Store, StoreError, TableResult,
};

pub fn point(lat: f64, lng: f64) -> Point {
    Point::new(lat, lng).expect("valid fixture coordinates")
}

/// Builder for test deliveries with sensible defaults.
#[derive(Clone, Debug)]
pub struct DeliveryBuilder {
    inner: Delivery,
}

pub fn delivery(id: &str, lat: f64, lng: f64) -> DeliveryBuilder {
    let mut inner = Delivery::new(id, point(lat, lng));
    inner.weight_kg = 1.0;
    inner.volume_units = 1.0;
    DeliveryBuilder { inner }
}

impl DeliveryBuilder {
    pub fn weight(mut self, kg: f64) -> Self {
        self.inner.weight_kg = kg;
        self
    }

    pub fn volume(mut self, units: f64) -> Self {
        self.inner.volume_units = units;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.inner.priority = priority;
        self
    }

    pub fn window(mut self, start_min: i32, end_min: i32) -> Self {
        self.inner.window = Some(TimeWindow::new(start_min, end_min).expect("valid window"));
        self
    }

    pub fn status(mut self, status: DeliveryStatus) -> Self {
        self.inner.status = status;
        self
    }

    pub fn on_route(mut self, route_id: &str, order: u32) -> Self {
        self.inner.route_id = Some(route_id.to_string());
        self.inner.order = Some(order);
        self
    }

    pub fn postal(mut self, code: &str) -> Self {
        self.inner.postal_code = code.to_string();
        self
    }

    pub fn build(self) -> Delivery {
        self.inner
    }
}

/// Builder for test drivers with sensible defaults.
#[derive(Clone, Debug)]
pub struct DriverBuilder {
    inner: Driver,
}

pub fn driver(id: &str, lat: f64, lng: f64) -> DriverBuilder {
    DriverBuilder {
        inner: Driver {
            id: id.to_string(),
            position: point(lat, lng),
            capacity_kg: 100.0,
            capacity_units: 50.0,
            max_radius_km: 50.0,
            reliability_rate: 0.9,
            working_hours: TimeWindow::new(6 * 60, 20 * 60).expect("valid hours"),
            preferred_zone_ids: Vec::new(),
        },
    }
}

impl DriverBuilder {
    pub fn capacity(mut self, kg: f64, units: f64) -> Self {
        self.inner.capacity_kg = kg;
        self.inner.capacity_units = units;
        self
    }

    pub fn radius(mut self, km: f64) -> Self {
        self.inner.max_radius_km = km;
        self
    }

    pub fn reliability(mut self, rate: f64) -> Self {
        self.inner.reliability_rate = rate;
        self
    }

    pub fn hours(mut self, start_min: i32, end_min: i32) -> Self {
        self.inner.working_hours = TimeWindow::new(start_min, end_min).expect("valid hours");
        self
    }

    pub fn zones(mut self, ids: &[&str]) -> Self {
        self.inner.preferred_zone_ids = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn build(self) -> Driver {
        self.inner
    }
}

/// Routing backend that is always down, so every figure comes from the
/// corrected-haversine fallback. Deterministic and network-free.
pub struct FailingBackend;

impl RoutingBackend for FailingBackend {
    fn route(&self, _from: Point, _to: Point) -> Result<Leg, BackendError> {
        Err(BackendError::Malformed("simulated outage".to_string()))
    }

    fn table(&self, _points: &[Point]) -> Result<TableResult, BackendError> {
        Err(BackendError::Malformed("simulated outage".to_string()))
    }
}

/// In-memory store over locked maps.
#[derive(Default)]
pub struct InMemoryStore {
    routes: Mutex<HashMap<String, Route>>,
    drivers: Mutex<HashMap<String, Driver>>,
    deliveries: Mutex<HashMap<String, Delivery>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_route(&self, route: Route) {
        self.routes.lock().unwrap().insert(route.id.clone(), route);
    }

    pub fn seed_driver(&self, driver: Driver) {
        self.drivers.lock().unwrap().insert(driver.id.clone(), driver);
    }

    pub fn seed_delivery(&self, delivery: Delivery) {
        self.deliveries
            .lock()
            .unwrap()
            .insert(delivery.id.clone(), delivery);
    }

    pub fn get_route(&self, id: &str) -> Option<Route> {
        self.routes.lock().unwrap().get(id).cloned()
    }

    pub fn get_delivery(&self, id: &str) -> Option<Delivery> {
        self.deliveries.lock().unwrap().get(id).cloned()
    }
}

impl Store for InMemoryStore {
    fn route(&self, id: &str) -> Result<Option<Route>, StoreError> {
        Ok(self.routes.lock().unwrap().get(id).cloned())
    }

    fn driver(&self, id: &str) -> Result<Option<Driver>, StoreError> {
        Ok(self.drivers.lock().unwrap().get(id).cloned())
    }

    fn deliveries_for_route(&self, route_id: &str) -> Result<Vec<Delivery>, StoreError> {
        Ok(self
            .deliveries
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.route_id.as_deref() == Some(route_id))
            .cloned()
            .collect())
    }

    fn create_route(&self, route: &Route) -> Result<(), StoreError> {
        let mut routes = self.routes.lock().unwrap();
        if routes.contains_key(&route.id) {
            return Err(StoreError(format!("route {} already exists", route.id)));
        }
        routes.insert(route.id.clone(), route.clone());
        Ok(())
    }

    fn update_route(&self, route: &Route) -> Result<(), StoreError> {
        let mut routes = self.routes.lock().unwrap();
        if !routes.contains_key(&route.id) {
            return Err(StoreError(format!("route {} does not exist", route.id)));
        }
        routes.insert(route.id.clone(), route.clone());
        Ok(())
    }

    fn create_delivery(&self, delivery: &Delivery) -> Result<(), StoreError> {
        let mut deliveries = self.deliveries.lock().unwrap();
        if deliveries.contains_key(&delivery.id) {
            return Err(StoreError(format!(
                "delivery {} already exists",
                delivery.id
            )));
        }
        deliveries.insert(delivery.id.clone(), delivery.clone());
        Ok(())
    }

    fn update_delivery(&self, delivery: &Delivery) -> Result<(), StoreError> {
        let mut deliveries = self.deliveries.lock().unwrap();
        if !deliveries.contains_key(&delivery.id) {
            return Err(StoreError(format!(
                "delivery {} does not exist",
                delivery.id
            )));
        }
        deliveries.insert(delivery.id.clone(), delivery.clone());
        Ok(())
    }

    fn delete_delivery(&self, id: &str) -> Result<(), StoreError> {
        self.deliveries.lock().unwrap().remove(id);
        Ok(())
    }
}
