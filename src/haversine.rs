//! Great-circle distance math (fallback when the routing backend is
//! unavailable).
//!
//! Straight-line estimates ignore the road network, so callers apply an
//! urban-circuity correction factor on top of the raw haversine figure.

use crate::model::Point;

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in kilometers.
pub fn haversine_km(from: Point, to: Point) -> f64 {
    let lat1_rad = from.lat.to_radians();
    let lat2_rad = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lng = (to.lng - from.lng).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Haversine distance scaled by an urban-circuity factor.
///
/// Road distance in a city is empirically 1.3-1.4x the straight line; the
/// exact factor is configuration.
pub fn corrected_km(from: Point, to: Point, circuity_factor: f64) -> f64 {
    haversine_km(from, to) * circuity_factor
}

/// Travel time in minutes for a distance at an assumed average speed.
pub fn km_to_minutes(km: f64, speed_kmh: f64) -> f64 {
    km / speed_kmh * 60.0
}
