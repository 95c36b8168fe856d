//! Load distribution: scoring and greedy assignment of pending deliveries.
//!
//! Deliveries are processed one at a time in priority order; each is given
//! to the highest-scoring eligible driver, whose running load and position
//! then feed into the next score. The result is a sequential greedy
//! assignment, not a simultaneous optimum: processing order affects the
//! outcome. Capacity and radius act as hard constraints via disqualifying
//! penalties.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::EngineError;
use crate::haversine;
use crate::model::{
    Delivery, DeliveryStatus, Driver, Point, Priority, Route, ScoringWeights, Zone,
};
use crate::tour::TourBuilder;
use crate::traits::{RoutingBackend, Store};

/// Score low enough that no combination of bonuses can lift a disqualified
/// pair above the acceptance floor.
const DISQUALIFYING_PENALTY: f64 = -100_000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignOptions {
    /// Time-of-day the cycle runs, minutes from midnight; drivers outside
    /// their working hours at this minute are ineligible.
    pub at_minute: i32,
    /// Acceptance floor: a delivery is left unassigned unless its best
    /// score exceeds this.
    pub min_score: f64,
    /// When set, a delivery matching none of a driver's zones is penalized
    /// instead of merely missing the zone bonus.
    pub require_zone: bool,
    /// Circuity factor applied to the straight-line scoring distance.
    pub circuity_factor: f64,
}

impl Default for AssignOptions {
    fn default() -> Self {
        Self {
            at_minute: 8 * 60,
            min_score: -500.0,
            require_zone: false,
            circuity_factor: 1.35,
        }
    }
}

/// Per-cycle running state for one driver.
///
/// Constructed fresh for every `assign` call so nothing leaks across
/// planning cycles. The position advances to each assigned destination, so
/// later scores reflect the driver's evolving route.
#[derive(Debug, Clone)]
pub struct DriverLoad {
    pub driver_id: String,
    pub position: Point,
    pub loaded_kg: f64,
    pub loaded_units: f64,
    pub assigned_count: u32,
}

impl DriverLoad {
    fn new(driver: &Driver) -> Self {
        Self {
            driver_id: driver.id.clone(),
            position: driver.position,
            loaded_kg: 0.0,
            loaded_units: 0.0,
            assigned_count: 0,
        }
    }
}

/// Result of one assignment cycle. Unassigned deliveries are part of the
/// success value, not an error.
#[derive(Debug, Clone)]
pub struct AssignmentOutcome {
    pub assignments: HashMap<String, Vec<Delivery>>,
    pub unassigned: Vec<Delivery>,
    /// Final accumulator state per driver, for observability.
    pub loads: Vec<DriverLoad>,
}

/// A persisted route with its sequenced deliveries, as produced by `plan`.
#[derive(Debug, Clone)]
pub struct PlannedRoute {
    pub route: Route,
    pub deliveries: Vec<Delivery>,
}

/// Scores (delivery, driver) pairs and commits greedy assignments.
#[derive(Debug, Clone)]
pub struct AssignmentEngine {
    weights: ScoringWeights,
    options: AssignOptions,
}

impl AssignmentEngine {
    pub fn new(weights: ScoringWeights, options: AssignOptions) -> Self {
        Self { weights, options }
    }

    /// Distributes `deliveries` over `drivers`, best score first.
    ///
    /// Deliveries are processed High, Medium, Low, earliest window end
    /// first within a tier. Zero eligible drivers is not an error: every
    /// delivery comes back unassigned.
    pub fn assign(
        &self,
        deliveries: &[Delivery],
        drivers: &[Driver],
        zones: &[Zone],
    ) -> AssignmentOutcome {
        let eligible: Vec<&Driver> = drivers
            .iter()
            .filter(|d| d.working_hours.contains(self.options.at_minute))
            .collect();

        let mut loads: HashMap<String, DriverLoad> = eligible
            .iter()
            .map(|d| (d.id.clone(), DriverLoad::new(d)))
            .collect();

        let mut ordered: Vec<&Delivery> = deliveries.iter().collect();
        ordered.sort_by_key(|d| (d.priority.rank(), d.window_end()));

        let mut assignments: HashMap<String, Vec<Delivery>> = HashMap::new();
        let mut unassigned = Vec::new();

        for delivery in ordered {
            let mut best: Option<(&Driver, f64)> = None;
            for driver in eligible.iter().copied() {
                let Some(load) = loads.get(&driver.id) else {
                    continue;
                };
                let score = self.score(delivery, driver, load, zones);
                if best.is_none_or(|(_, best_score)| score > best_score) {
                    best = Some((driver, score));
                }
            }

            match best {
                Some((driver, score)) if score > self.options.min_score => {
                    let Some(load) = loads.get_mut(&driver.id) else {
                        unassigned.push(delivery.clone());
                        continue;
                    };
                    load.loaded_kg += delivery.weight_kg;
                    load.loaded_units += delivery.volume_units;
                    load.assigned_count += 1;
                    load.position = delivery.destination;

                    let mut assigned = delivery.clone();
                    assigned.status = DeliveryStatus::Assigned;
                    assignments
                        .entry(driver.id.clone())
                        .or_default()
                        .push(assigned);
                    debug!(delivery = %delivery.id, driver = %driver.id, score, "assigned");
                }
                _ => unassigned.push(delivery.clone()),
            }
        }

        info!(
            assigned = assignments.values().map(Vec::len).sum::<usize>(),
            unassigned = unassigned.len(),
            drivers = eligible.len(),
            "assignment cycle complete"
        );

        AssignmentOutcome {
            assignments,
            unassigned,
            loads: loads.into_values().collect(),
        }
    }

    /// One full planning cycle: assign, sequence each driver's deliveries
    /// with the tour builder, persist one route per driver.
    ///
    /// Route ids are `{cycle_id}-{driver_id}`; the caller owns cycle naming.
    pub fn plan<B, S>(
        &self,
        cycle_id: &str,
        deliveries: &[Delivery],
        drivers: &[Driver],
        zones: &[Zone],
        tours: &TourBuilder<'_, B>,
        store: &S,
    ) -> Result<(Vec<PlannedRoute>, Vec<Delivery>), EngineError>
    where
        B: RoutingBackend + Sync,
        S: Store,
    {
        for delivery in deliveries {
            delivery.validate()?;
        }

        let driver_index: HashMap<&str, &Driver> =
            drivers.iter().map(|d| (d.id.as_str(), d)).collect();
        let outcome = self.assign(deliveries, drivers, zones);

        let mut planned = Vec::with_capacity(outcome.assignments.len());
        for (driver_id, assigned) in outcome.assignments {
            let driver = driver_index
                .get(driver_id.as_str())
                .ok_or_else(|| EngineError::NotFound {
                    entity: "driver",
                    id: driver_id.clone(),
                })?;

            let tour = tours.build(driver.position, &assigned);
            let route_id = format!("{}-{}", cycle_id, driver_id);
            let mut route = Route::new(route_id.clone(), driver_id.clone(), driver.position);
            route.total_distance_km = tour.total_distance_km;
            route.total_time_min = tour.total_time_min;

            let by_id: HashMap<&str, &Delivery> =
                assigned.iter().map(|d| (d.id.as_str(), d)).collect();
            let mut sequenced = Vec::with_capacity(assigned.len());
            for (pos, id) in tour.order.iter().enumerate() {
                let source = by_id
                    .get(id.as_str())
                    .ok_or_else(|| EngineError::NotFound {
                        entity: "delivery",
                        id: id.clone(),
                    })?;
                let mut delivery = (*source).clone();
                delivery.route_id = Some(route_id.clone());
                delivery.order = Some(pos as u32 + 1);
                delivery.distance_from_prev_km = tour.legs[pos].distance_km;
                delivery.time_from_prev_min = tour.legs[pos].duration_min;
                sequenced.push(delivery);
            }

            store.create_route(&route)?;
            for delivery in &sequenced {
                store.update_delivery(delivery)?;
            }

            planned.push(PlannedRoute {
                route,
                deliveries: sequenced,
            });
        }

        Ok((planned, outcome.unassigned))
    }

    /// Weighted score for one (delivery, driver) pair under the current
    /// accumulator state. Hard constraint breaches return a disqualifying
    /// penalty that cannot beat the acceptance floor.
    fn score(
        &self,
        delivery: &Delivery,
        driver: &Driver,
        load: &DriverLoad,
        zones: &[Zone],
    ) -> f64 {
        let w = &self.weights;
        let mut score = 0.0;

        // Zone preference.
        let in_preferred_zone = zones
            .iter()
            .filter(|z| driver.preferred_zone_ids.iter().any(|id| *id == z.id))
            .any(|z| z.covers(delivery));
        if in_preferred_zone {
            score += w.zone;
        } else if self.options.require_zone {
            score -= 2.0 * w.zone;
        }

        // Distance from the driver's evolving position.
        let km = haversine::corrected_km(
            load.position,
            delivery.destination,
            self.options.circuity_factor,
        );
        score -= w.distance * km;
        if km > driver.max_radius_km {
            score += DISQUALIFYING_PENALTY;
        }

        // Capacity is a hard constraint in effect.
        let fits = load.loaded_kg + delivery.weight_kg <= driver.capacity_kg
            && load.loaded_units + delivery.volume_units <= driver.capacity_units;
        if fits {
            score += w.capacity;
        } else {
            score += DISQUALIFYING_PENALTY;
        }

        score += w.reliability * driver.reliability_rate;

        // Already-loaded drivers become progressively less attractive.
        score -= w.balance * f64::from(load.assigned_count);

        score += match delivery.priority {
            Priority::High => w.priority,
            Priority::Medium => 0.4 * w.priority,
            Priority::Low => 0.0,
        };

        // Window still reachable within the driver's remaining shift.
        if let Some(window) = delivery.window {
            let remaining = crate::model::TimeWindow {
                start_min: self.options.at_minute,
                end_min: driver.working_hours.end_min,
            };
            if window.overlaps(remaining) {
                score += w.window;
            }
        }

        score
    }
}
