//! Event-driven re-optimization of live routes.
//!
//! A route that is underway is mutated only through the named scenario
//! handlers here; each one follows the same discipline: load, partition
//! stops into fixed (already acted upon) and mutable (still to visit),
//! transform the mutable set, re-sequence from the driver's current
//! position, persist. Stops already acted upon are immutable facts and are
//! never recomputed or reordered. Validation completes before the first
//! write, so a rejected event leaves every entity unchanged.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::distance::DistanceProvider;
use crate::error::EngineError;
use crate::model::{Delivery, DeliveryStatus, Point, Priority, Route, TimeWindow};
use crate::tour::{TourBuilder, TourOptions};
use crate::traits::{RoutingBackend, Store};

#[derive(Debug, Clone)]
pub struct ReoptOptions {
    /// HeavyTraffic below this multiplier is an explicit no-op.
    pub traffic_threshold: f64,
    /// AccumulatedDelay treats windows expiring within this many minutes as
    /// urgent.
    pub urgency_window_min: i32,
}

impl Default for ReoptOptions {
    fn default() -> Self {
        Self {
            traffic_threshold: 1.3,
            urgency_window_min: 30,
        }
    }
}

/// A real-world event affecting one in-progress route.
///
/// Closed set: every scenario has a distinct recovery policy and its own
/// handler, matched exhaustively.
#[derive(Debug, Clone)]
pub enum RouteEvent {
    /// The recipient cancelled; the stop is removed entirely.
    Cancellation { delivery_id: String },
    /// Congestion on the current hour; payload is the coarse hour/weekday
    /// multiplier supplied by the caller.
    HeavyTraffic { multiplier: f64 },
    /// The route is running late; triage stops by how soon windows expire.
    AccumulatedDelay { now_min: i32 },
    /// Nobody home; retry the stop at the end of the route.
    RecipientAbsent { delivery_id: String },
    /// A new delivery must join the route mid-flight.
    UrgentNewDelivery { delivery: Delivery },
    /// The address cannot be found; flag for manual follow-up.
    BadAddress { delivery_id: String },
    /// The recipient agreed to a new time window.
    Reschedule {
        delivery_id: String,
        window: TimeWindow,
    },
}

impl RouteEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RouteEvent::Cancellation { .. } => EventKind::Cancellation,
            RouteEvent::HeavyTraffic { .. } => EventKind::HeavyTraffic,
            RouteEvent::AccumulatedDelay { .. } => EventKind::AccumulatedDelay,
            RouteEvent::RecipientAbsent { .. } => EventKind::RecipientAbsent,
            RouteEvent::UrgentNewDelivery { .. } => EventKind::UrgentNewDelivery,
            RouteEvent::BadAddress { .. } => EventKind::BadAddress,
            RouteEvent::Reschedule { .. } => EventKind::Reschedule,
        }
    }
}

/// Event discriminant, parseable from the wire name. An unknown name is a
/// caller bug and is rejected, never silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Cancellation,
    HeavyTraffic,
    AccumulatedDelay,
    RecipientAbsent,
    UrgentNewDelivery,
    BadAddress,
    Reschedule,
}

impl FromStr for EventKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CANCELLATION" => Ok(EventKind::Cancellation),
            "HEAVY_TRAFFIC" => Ok(EventKind::HeavyTraffic),
            "ACCUMULATED_DELAY" => Ok(EventKind::AccumulatedDelay),
            "RECIPIENT_ABSENT" => Ok(EventKind::RecipientAbsent),
            "URGENT_NEW_DELIVERY" => Ok(EventKind::UrgentNewDelivery),
            "BAD_ADDRESS" => Ok(EventKind::BadAddress),
            "RESCHEDULE" => Ok(EventKind::Reschedule),
            other => Err(EngineError::Validation(format!(
                "unknown event name: {}",
                other
            ))),
        }
    }
}

/// New aggregates for a route after a handler ran.
#[derive(Debug, Clone)]
pub struct RouteSummary {
    pub route_id: String,
    /// Mutable stops in their new visiting order.
    pub order: Vec<String>,
    pub total_distance_km: f64,
    pub total_time_min: f64,
}

#[derive(Debug, Clone)]
pub enum ReoptOutcome {
    Updated(RouteSummary),
    /// The event did not warrant a change (e.g. traffic below threshold).
    NoChangeNeeded,
}

/// What a scenario decided, before anything is written.
struct Decision {
    /// Mutable stops in final visiting order, statuses already transformed.
    ordered: Vec<Delivery>,
    /// Stops staying on the route but excluded from the active sequence.
    sidelined: Vec<Delivery>,
    /// Stops removed from the route and deleted.
    removed: Vec<String>,
    /// Newly created stops (persisted with create, not update).
    created: HashSet<String>,
    /// Applied to sequenced travel times (HeavyTraffic).
    time_factor: f64,
    /// Re-sequence geometrically via the tour builder instead of keeping
    /// the decided order.
    rebuild: bool,
}

impl Decision {
    fn keep_order(ordered: Vec<Delivery>) -> Self {
        Self {
            ordered,
            sidelined: Vec::new(),
            removed: Vec::new(),
            created: HashSet::new(),
            time_factor: 1.0,
            rebuild: false,
        }
    }

    fn rebuild(ordered: Vec<Delivery>) -> Self {
        Self {
            rebuild: true,
            ..Self::keep_order(ordered)
        }
    }
}

/// Applies scenario handlers to one route at a time.
///
/// Mutations to a single route are serialized through a per-route lock held
/// for the whole load-transform-persist span; different routes proceed in
/// parallel.
pub struct ReoptimizationCoordinator<'a, S, B> {
    store: &'a S,
    provider: &'a DistanceProvider<B>,
    tours: TourBuilder<'a, B>,
    options: ReoptOptions,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<'a, S, B> ReoptimizationCoordinator<'a, S, B>
where
    S: Store,
    B: RoutingBackend + Sync,
{
    pub fn new(
        store: &'a S,
        provider: &'a DistanceProvider<B>,
        tour_options: TourOptions,
        options: ReoptOptions,
    ) -> Self {
        Self {
            store,
            provider,
            tours: TourBuilder::new(provider, tour_options),
            options,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Handles one event against one route.
    pub fn handle(&self, route_id: &str, event: RouteEvent) -> Result<ReoptOutcome, EngineError> {
        let lock = self.route_lock(route_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let route = self
            .store
            .route(route_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "route",
                id: route_id.to_string(),
            })?;
        if !route.status.accepts_events() {
            return Err(EngineError::Constraint(format!(
                "route {} is {:?} and does not accept events",
                route_id, route.status
            )));
        }
        let driver =
            self.store
                .driver(&route.driver_id)?
                .ok_or_else(|| EngineError::NotFound {
                    entity: "driver",
                    id: route.driver_id.clone(),
                })?;

        let stops = self.store.deliveries_for_route(route_id)?;
        let (mut mutable, fixed): (Vec<Delivery>, Vec<Delivery>) =
            stops.into_iter().partition(|d| d.status.is_reroutable());
        mutable.sort_by_key(|d| d.order.unwrap_or(u32::MAX));

        let kind = event.kind();
        let decision = match event {
            RouteEvent::Cancellation { delivery_id } => {
                self.on_cancellation(&mutable, &fixed, &delivery_id)?
            }
            RouteEvent::HeavyTraffic { multiplier } => {
                match self.on_heavy_traffic(mutable, multiplier) {
                    Some(decision) => decision,
                    None => {
                        debug!(route = route_id, multiplier, "traffic below threshold, no change");
                        return Ok(ReoptOutcome::NoChangeNeeded);
                    }
                }
            }
            RouteEvent::AccumulatedDelay { now_min } => self.on_accumulated_delay(mutable, now_min),
            RouteEvent::RecipientAbsent { delivery_id } => {
                self.on_recipient_absent(mutable, &fixed, &delivery_id)?
            }
            RouteEvent::UrgentNewDelivery { delivery } => {
                self.on_urgent_new_delivery(mutable, &fixed, &route, driver.position, delivery)?
            }
            RouteEvent::BadAddress { delivery_id } => {
                self.on_bad_address(mutable, &fixed, &delivery_id)?
            }
            RouteEvent::Reschedule {
                delivery_id,
                window,
            } => self.on_reschedule(mutable, &fixed, &delivery_id, window)?,
        };

        let outcome = self.commit(route, &fixed, driver.position, decision)?;
        if let ReoptOutcome::Updated(summary) = &outcome {
            info!(
                route = route_id,
                event = ?kind,
                stops = summary.order.len(),
                total_km = summary.total_distance_km,
                "route re-optimized"
            );
        }
        Ok(outcome)
    }

    /// Target removed entirely; the rest is re-sequenced geometrically.
    fn on_cancellation(
        &self,
        mutable: &[Delivery],
        fixed: &[Delivery],
        delivery_id: &str,
    ) -> Result<Decision, EngineError> {
        let target = find_target(mutable, fixed, delivery_id)?;
        let remaining: Vec<Delivery> = mutable
            .iter()
            .filter(|d| d.id != target.id)
            .cloned()
            .collect();
        let mut decision = Decision::rebuild(remaining);
        decision.removed.push(target.id.clone());
        Ok(decision)
    }

    /// Earliest window end first; the multiplier inflates travel times.
    /// Below the threshold nothing changes.
    fn on_heavy_traffic(&self, mut mutable: Vec<Delivery>, multiplier: f64) -> Option<Decision> {
        if multiplier < self.options.traffic_threshold {
            return None;
        }
        mutable.sort_by_key(|d| d.window_end());
        let mut decision = Decision::keep_order(mutable);
        decision.time_factor = multiplier;
        Some(decision)
    }

    /// Stops whose window expires within the urgency horizon jump ahead,
    /// ordered by window end; the rest follow, also by window end.
    fn on_accumulated_delay(&self, mutable: Vec<Delivery>, now_min: i32) -> Decision {
        let horizon = now_min + self.options.urgency_window_min;
        let (mut urgent, mut normal): (Vec<Delivery>, Vec<Delivery>) = mutable
            .into_iter()
            .partition(|d| d.window.is_some_and(|w| w.end_min <= horizon));
        urgent.sort_by_key(|d| d.window_end());
        normal.sort_by_key(|d| d.window_end());
        urgent.extend(normal);
        Decision::keep_order(urgent)
    }

    /// Target marked Absent and pushed to the back of the sequence;
    /// it stays on the route for a retry.
    fn on_recipient_absent(
        &self,
        mutable: Vec<Delivery>,
        fixed: &[Delivery],
        delivery_id: &str,
    ) -> Result<Decision, EngineError> {
        find_target(&mutable, fixed, delivery_id)?;
        let (mut rest, mut target): (Vec<Delivery>, Vec<Delivery>) =
            mutable.into_iter().partition(|d| d.id != delivery_id);
        for absent in &mut target {
            absent.status = DeliveryStatus::Absent;
        }
        rest.extend(target);
        Ok(Decision::keep_order(rest))
    }

    /// New stop joins the live route: High priority goes first, anything
    /// else lands at the position adding the least distance.
    fn on_urgent_new_delivery(
        &self,
        mut mutable: Vec<Delivery>,
        fixed: &[Delivery],
        route: &Route,
        origin: Point,
        mut delivery: Delivery,
    ) -> Result<Decision, EngineError> {
        delivery.validate()?;
        let duplicate = mutable.iter().chain(fixed.iter()).any(|d| d.id == delivery.id);
        if duplicate {
            return Err(EngineError::Validation(format!(
                "delivery {} is already on route {}",
                delivery.id, route.id
            )));
        }

        delivery.status = DeliveryStatus::Pending;
        delivery.route_id = Some(route.id.clone());

        let position = if delivery.priority == Priority::High {
            0
        } else {
            self.cheapest_insertion(origin, &mutable, &delivery)
        };

        let mut decision = Decision::keep_order(Vec::new());
        decision.created.insert(delivery.id.clone());
        mutable.insert(position, delivery);
        decision.ordered = mutable;
        Ok(decision)
    }

    /// Target flagged Failed for manual follow-up and excluded from the
    /// active sequence; the route continues without it.
    fn on_bad_address(
        &self,
        mutable: Vec<Delivery>,
        fixed: &[Delivery],
        delivery_id: &str,
    ) -> Result<Decision, EngineError> {
        find_target(&mutable, fixed, delivery_id)?;
        let (rest, mut target): (Vec<Delivery>, Vec<Delivery>) =
            mutable.into_iter().partition(|d| d.id != delivery_id);
        for failed in &mut target {
            failed.status = DeliveryStatus::Failed;
            failed.failure_reason = Some("address not found".to_string());
            failed.order = None;
            failed.distance_from_prev_km = 0.0;
            failed.time_from_prev_min = 0.0;
        }
        let mut decision = Decision::keep_order(rest);
        decision.sidelined = target;
        Ok(decision)
    }

    /// Window replaced; everything re-ordered by the new window ends.
    fn on_reschedule(
        &self,
        mut mutable: Vec<Delivery>,
        fixed: &[Delivery],
        delivery_id: &str,
        window: TimeWindow,
    ) -> Result<Decision, EngineError> {
        find_target(&mutable, fixed, delivery_id)?;
        for stop in &mut mutable {
            if stop.id == delivery_id {
                stop.window = Some(window);
            }
        }
        mutable.sort_by_key(|d| d.window_end());
        Ok(Decision::keep_order(mutable))
    }

    /// Insertion point minimizing added distance: for every slot, the cost
    /// of the removed edge against the two new edges.
    fn cheapest_insertion(&self, origin: Point, pending: &[Delivery], new: &Delivery) -> usize {
        let n = pending.len();
        if n == 0 {
            return 0;
        }

        let mut points = Vec::with_capacity(n + 2);
        points.push(origin);
        points.extend(pending.iter().map(|d| d.destination));
        points.push(new.destination);
        let matrix = self.provider.matrix(&points);
        let dist = &matrix.distance_km;
        let new_idx = n + 1;

        let mut best = (0usize, f64::INFINITY);
        for slot in 0..=n {
            let prev = slot; // 0 is the origin, 1..=n the pending stops
            let added = match pending.get(slot) {
                Some(_) => {
                    let next = slot + 1;
                    dist[prev][new_idx] + dist[new_idx][next] - dist[prev][next]
                }
                None => dist[prev][new_idx],
            };
            if added < best.1 {
                best = (slot, added);
            }
        }
        best.0
    }

    /// Shared tail of every handler: sequence, slot orders around the fixed
    /// stops, persist stops and route aggregates.
    fn commit(
        &self,
        mut route: Route,
        fixed: &[Delivery],
        origin: Point,
        decision: Decision,
    ) -> Result<ReoptOutcome, EngineError> {
        let mut tour = if decision.rebuild {
            self.tours.build(origin, &decision.ordered)
        } else {
            self.tours.sequence(origin, &decision.ordered)
        };
        if decision.time_factor != 1.0 {
            tour.total_time_min *= decision.time_factor;
            for leg in &mut tour.legs {
                leg.duration_min *= decision.time_factor;
            }
        }

        let mut by_id: HashMap<String, Delivery> = decision
            .ordered
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();

        // Fixed stops keep their exact prior order values; the mutable
        // sequence fills the remaining slots in ascending order.
        let fixed_orders: HashSet<u32> = fixed.iter().filter_map(|d| d.order).collect();
        let mut slots = (1u32..).filter(|slot| !fixed_orders.contains(slot));

        for (pos, id) in tour.order.iter().enumerate() {
            let Some(mut stop) = by_id.remove(id) else {
                return Err(EngineError::NotFound {
                    entity: "delivery",
                    id: id.clone(),
                });
            };
            stop.order = slots.next();
            stop.distance_from_prev_km = tour.legs[pos].distance_km;
            stop.time_from_prev_min = tour.legs[pos].duration_min;
            if decision.created.contains(&stop.id) {
                self.store.create_delivery(&stop)?;
            } else {
                self.store.update_delivery(&stop)?;
            }
        }
        for stop in &decision.sidelined {
            self.store.update_delivery(stop)?;
        }
        for id in &decision.removed {
            self.store.delete_delivery(id)?;
        }

        let fixed_km: f64 = fixed.iter().map(|d| d.distance_from_prev_km).sum();
        let fixed_min: f64 = fixed.iter().map(|d| d.time_from_prev_min).sum();
        route.total_distance_km = fixed_km + tour.total_distance_km;
        route.total_time_min = fixed_min + tour.total_time_min;
        self.store.update_route(&route)?;

        Ok(ReoptOutcome::Updated(RouteSummary {
            route_id: route.id,
            order: tour.order,
            total_distance_km: route.total_distance_km,
            total_time_min: route.total_time_min,
        }))
    }

    fn route_lock(&self, route_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(route_id.to_string()).or_default().clone()
    }
}

/// The target must be in the mutable set. A stop already acted upon is a
/// constraint breach, not a missing entity; a stop not on the route at all
/// is NotFound.
fn find_target<'d>(
    mutable: &'d [Delivery],
    fixed: &[Delivery],
    delivery_id: &str,
) -> Result<&'d Delivery, EngineError> {
    if let Some(stop) = mutable.iter().find(|d| d.id == delivery_id) {
        return Ok(stop);
    }
    if let Some(stop) = fixed.iter().find(|d| d.id == delivery_id) {
        return Err(EngineError::Constraint(format!(
            "delivery {} is {:?} and cannot be re-planned",
            delivery_id, stop.status
        )));
    }
    Err(EngineError::NotFound {
        entity: "delivery",
        id: delivery_id.to_string(),
    })
}
