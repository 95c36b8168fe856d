//! Distance provider: routing backend first, corrected haversine fallback.
//!
//! Failure is never fatal to the caller. Every lookup resolves to a numeric
//! result: a road-network figure when the backend answers within its
//! timeout, otherwise a great-circle estimate scaled by the urban-circuity
//! factor. Results are memoized for the process lifetime.

use std::collections::HashMap;
use std::sync::RwLock;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::haversine;
use crate::model::Point;
use crate::traits::{Leg, RoutingBackend};

/// Coordinate rounded to 5 decimals, the cache identity for a point.
pub type CoordKey = (i64, i64);

pub fn coord_key(p: Point) -> CoordKey {
    ((p.lat * 1e5).round() as i64, (p.lng * 1e5).round() as i64)
}

#[derive(Debug, Clone)]
pub struct DistanceConfig {
    /// Road distance over straight-line distance in urban areas.
    pub circuity_factor: f64,
    /// Assumed average urban speed for fallback duration estimates.
    pub avg_speed_kmh: f64,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            circuity_factor: 1.35,
            avg_speed_kmh: 30.0,
        }
    }
}

/// Distance and duration matrices indexed by the input point order.
#[derive(Debug, Clone)]
pub struct Matrix {
    pub distance_km: Vec<Vec<f64>>,
    pub duration_min: Vec<Vec<f64>>,
}

impl Matrix {
    fn zeros(n: usize) -> Self {
        Self {
            distance_km: vec![vec![0.0; n]; n],
            duration_min: vec![vec![0.0; n]; n],
        }
    }
}

/// Shared travel-figure resolver with a process-lifetime memo cache.
///
/// The cache is append-mostly and safe for concurrent reads with
/// best-effort writes; a duplicate computation on a race is acceptable.
pub struct DistanceProvider<B> {
    backend: B,
    config: DistanceConfig,
    cache: RwLock<HashMap<(CoordKey, CoordKey), Leg>>,
}

impl<B: RoutingBackend + Sync> DistanceProvider<B> {
    pub fn new(backend: B, config: DistanceConfig) -> Self {
        Self {
            backend,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Travel figures for one ordered pair. Infallible by contract.
    pub fn distance(&self, from: Point, to: Point) -> Leg {
        let key = (coord_key(from), coord_key(to));
        if key.0 == key.1 {
            return Leg {
                distance_km: 0.0,
                duration_min: 0.0,
            };
        }

        if let Some(leg) = self.cache.read().unwrap_or_else(|e| e.into_inner()).get(&key) {
            debug!(from = ?key.0, to = ?key.1, "distance cache hit");
            return *leg;
        }

        let leg = match self.backend.route(from, to) {
            Ok(leg) => leg,
            Err(err) => {
                warn!(%err, "routing backend failed, using corrected haversine");
                self.fallback_leg(from, to)
            }
        };

        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, leg);
        leg
    }

    /// All-pairs travel figures, batched through the backend.
    ///
    /// On backend failure the matrix is filled with fallback estimates,
    /// row-parallel. Either way every pair lands in the memo cache.
    pub fn matrix(&self, points: &[Point]) -> Matrix {
        let n = points.len();
        if n < 2 {
            return Matrix::zeros(n);
        }

        let matrix = match self.backend.table(points) {
            Ok(table) => Matrix {
                distance_km: table.distances_km,
                duration_min: table.durations_min,
            },
            Err(err) => {
                warn!(%err, points = n, "table request failed, filling matrix from haversine");
                let rows: Vec<Vec<Leg>> = points
                    .par_iter()
                    .map(|from| points.iter().map(|to| self.fallback_leg(*from, *to)).collect())
                    .collect();
                Matrix {
                    distance_km: rows
                        .iter()
                        .map(|row| row.iter().map(|leg| leg.distance_km).collect())
                        .collect(),
                    duration_min: rows
                        .iter()
                        .map(|row| row.iter().map(|leg| leg.duration_min).collect())
                        .collect(),
                }
            }
        };

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        for (i, from) in points.iter().enumerate() {
            for (j, to) in points.iter().enumerate() {
                if i != j {
                    let key = (coord_key(*from), coord_key(*to));
                    cache.insert(
                        key,
                        Leg {
                            distance_km: matrix.distance_km[i][j],
                            duration_min: matrix.duration_min[i][j],
                        },
                    );
                }
            }
        }

        matrix
    }

    /// Corrected straight-line estimate used while the backend is degraded.
    pub fn fallback_leg(&self, from: Point, to: Point) -> Leg {
        if coord_key(from) == coord_key(to) {
            return Leg {
                distance_km: 0.0,
                duration_min: 0.0,
            };
        }
        let km = haversine::corrected_km(from, to, self.config.circuity_factor);
        Leg {
            distance_km: km,
            duration_min: haversine::km_to_minutes(km, self.config.avg_speed_kmh),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::traits::{BackendError, TableResult};

    fn p(lat: f64, lng: f64) -> Point {
        Point::new(lat, lng).unwrap()
    }

    /// Backend that always fails, counting how often it was asked.
    struct DownBackend {
        calls: Mutex<u32>,
    }

    impl DownBackend {
        fn new() -> Self {
            Self {
                calls: Mutex::new(0),
            }
        }
    }

    impl RoutingBackend for DownBackend {
        fn route(&self, _from: Point, _to: Point) -> Result<Leg, BackendError> {
            *self.calls.lock().unwrap() += 1;
            Err(BackendError::Malformed("backend down".to_string()))
        }

        fn table(&self, _points: &[Point]) -> Result<TableResult, BackendError> {
            *self.calls.lock().unwrap() += 1;
            Err(BackendError::Malformed("backend down".to_string()))
        }
    }

    /// Backend answering fixed figures, to verify the preferred path.
    struct FixedBackend;

    impl RoutingBackend for FixedBackend {
        fn route(&self, _from: Point, _to: Point) -> Result<Leg, BackendError> {
            Ok(Leg {
                distance_km: 7.5,
                duration_min: 12.0,
            })
        }

        fn table(&self, points: &[Point]) -> Result<TableResult, BackendError> {
            let n = points.len();
            Ok(TableResult {
                distances_km: vec![vec![7.5; n]; n],
                durations_min: vec![vec![12.0; n]; n],
            })
        }
    }

    #[test]
    fn test_fallback_is_positive_and_finite() {
        let provider = DistanceProvider::new(DownBackend::new(), DistanceConfig::default());
        let leg = provider.distance(p(36.17, -115.14), p(36.12, -115.17));
        assert!(leg.distance_km > 0.0 && leg.distance_km.is_finite());
        assert!(leg.duration_min > 0.0 && leg.duration_min.is_finite());
    }

    #[test]
    fn test_fallback_applies_circuity() {
        let provider = DistanceProvider::new(DownBackend::new(), DistanceConfig::default());
        let a = p(36.17, -115.14);
        let b = p(36.12, -115.17);
        let leg = provider.distance(a, b);
        let raw = haversine::haversine_km(a, b);
        assert!((leg.distance_km - raw * 1.35).abs() < 1e-9);
    }

    #[test]
    fn test_repeat_lookup_hits_cache() {
        let backend = DownBackend::new();
        let provider = DistanceProvider::new(backend, DistanceConfig::default());
        let a = p(36.17, -115.14);
        let b = p(36.12, -115.17);
        let first = provider.distance(a, b);
        let second = provider.distance(a, b);
        assert_eq!(first, second);
        // Only the first lookup reaches the backend.
        assert_eq!(*provider.backend.calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_backend_result_preferred() {
        let provider = DistanceProvider::new(FixedBackend, DistanceConfig::default());
        let leg = provider.distance(p(36.17, -115.14), p(36.12, -115.17));
        assert_eq!(leg.distance_km, 7.5);
        assert_eq!(leg.duration_min, 12.0);
    }

    #[test]
    fn test_same_point_is_zero() {
        let provider = DistanceProvider::new(FixedBackend, DistanceConfig::default());
        let leg = provider.distance(p(36.17, -115.14), p(36.17, -115.14));
        assert_eq!(leg.distance_km, 0.0);
    }

    #[test]
    fn test_matrix_shape_and_diagonal() {
        let provider = DistanceProvider::new(DownBackend::new(), DistanceConfig::default());
        let points = vec![p(36.1, -115.1), p(36.2, -115.2), p(36.3, -115.3)];
        let matrix = provider.matrix(&points);
        assert_eq!(matrix.distance_km.len(), 3);
        for i in 0..3 {
            assert_eq!(matrix.distance_km[i][i], 0.0);
            assert_eq!(matrix.duration_min[i][i], 0.0);
        }
        assert!(matrix.distance_km[0][1] > 0.0);
    }

    #[test]
    fn test_matrix_seeds_pair_cache() {
        let backend = DownBackend::new();
        let provider = DistanceProvider::new(backend, DistanceConfig::default());
        let a = p(36.1, -115.1);
        let b = p(36.2, -115.2);
        let matrix = provider.matrix(&[a, b]);
        let calls_after_matrix = *provider.backend.calls.lock().unwrap();
        let leg = provider.distance(a, b);
        assert_eq!(leg.distance_km, matrix.distance_km[0][1]);
        // Pair lookup after the matrix call is a cache hit.
        assert_eq!(*provider.backend.calls.lock().unwrap(), calls_after_matrix);
    }

    #[test]
    fn test_trivial_matrix_sizes() {
        let provider = DistanceProvider::new(DownBackend::new(), DistanceConfig::default());
        assert!(provider.matrix(&[]).distance_km.is_empty());
        let one = provider.matrix(&[p(36.1, -115.1)]);
        assert_eq!(one.distance_km, vec![vec![0.0]]);
    }
}
