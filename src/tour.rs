//! Tour sequencing for a single driver.
//!
//! Two-phase heuristic: nearest-neighbor construction with deadline
//! awareness, then 2-opt local search. All cost evaluations read a distance
//! matrix computed once per build; nothing is re-queried pairwise.

use tracing::debug;

use crate::distance::{DistanceProvider, Matrix};
use crate::model::{Delivery, Point, Priority};
use crate::traits::{Leg, RoutingBackend};

#[derive(Debug, Clone)]
pub struct TourOptions {
    /// Cap on full 2-opt passes, independent of wall-clock time.
    pub max_passes: usize,
    /// Minimum distance gain for accepting a reversal, to avoid churn on
    /// floating-point noise.
    pub min_gain_km: f64,
    /// Distance discount for High-priority stops during construction, so
    /// they win near-ties.
    pub high_priority_discount: f64,
}

impl Default for TourOptions {
    fn default() -> Self {
        Self {
            max_passes: 100,
            min_gain_km: 0.01,
            high_priority_discount: 0.5,
        }
    }
}

/// A sequenced tour: visiting order plus per-leg and total figures.
#[derive(Debug, Clone)]
pub struct Tour {
    /// Delivery ids in visiting order.
    pub order: Vec<String>,
    /// Travel figures from the previous position to each stop, aligned
    /// with `order`.
    pub legs: Vec<Leg>,
    pub total_distance_km: f64,
    pub total_time_min: f64,
}

impl Tour {
    fn empty() -> Self {
        Self {
            order: Vec::new(),
            legs: Vec::new(),
            total_distance_km: 0.0,
            total_time_min: 0.0,
        }
    }
}

/// Builds near-optimal visiting orders over a shared distance provider.
pub struct TourBuilder<'a, B> {
    provider: &'a DistanceProvider<B>,
    options: TourOptions,
}

impl<'a, B: RoutingBackend + Sync> TourBuilder<'a, B> {
    pub fn new(provider: &'a DistanceProvider<B>, options: TourOptions) -> Self {
        Self { provider, options }
    }

    /// Sequences `stops` into a visiting order starting from `origin`.
    ///
    /// Stops carrying a time window are placed first, ascending by window
    /// end; the rest follow by nearest neighbor. 2-opt then reverses
    /// sub-sequences while doing so keeps reducing total distance, so the
    /// final cost is never above the construction-phase cost.
    pub fn build(&self, origin: Point, stops: &[Delivery]) -> Tour {
        if stops.is_empty() {
            return Tour::empty();
        }

        let matrix = self.matrix_for(origin, stops);

        if stops.len() == 1 {
            return finish(stops, vec![1], &matrix);
        }

        let mut order = self.construct(stops, &matrix);
        let passes = self.two_opt(&mut order, &matrix.distance_km);
        debug!(stops = stops.len(), passes, "tour build converged");

        finish(stops, order, &matrix)
    }

    /// Totals and per-leg figures for an externally-imposed order.
    ///
    /// Used by re-optimization scenarios whose ordering rule is explicit
    /// (window-end ordering, retry-at-the-end) rather than geometric.
    pub fn sequence(&self, origin: Point, stops: &[Delivery]) -> Tour {
        if stops.is_empty() {
            return Tour::empty();
        }
        let matrix = self.matrix_for(origin, stops);
        let order = (1..=stops.len()).collect();
        finish(stops, order, &matrix)
    }

    fn matrix_for(&self, origin: Point, stops: &[Delivery]) -> Matrix {
        let mut points = Vec::with_capacity(stops.len() + 1);
        points.push(origin);
        points.extend(stops.iter().map(|s| s.destination));
        self.provider.matrix(&points)
    }

    /// Construction phase. Returns matrix indices (1-based; 0 is origin).
    fn construct(&self, stops: &[Delivery], matrix: &Matrix) -> Vec<usize> {
        let n = stops.len();
        let mut order = Vec::with_capacity(n);
        let mut visited = vec![false; n];
        let mut current = 0usize;

        // Deadline-carrying stops first, earliest window end first.
        let mut windowed: Vec<usize> = (0..n).filter(|&i| stops[i].window.is_some()).collect();
        windowed.sort_by_key(|&i| (stops[i].window_end(), i));
        for i in windowed {
            visited[i] = true;
            order.push(i + 1);
            current = i + 1;
        }

        // Remaining stops by nearest neighbor, discounting High priority.
        while order.len() < n {
            let mut best: Option<(usize, f64)> = None;
            for i in 0..n {
                if visited[i] {
                    continue;
                }
                let mut d = matrix.distance_km[current][i + 1];
                if stops[i].priority == Priority::High {
                    d *= self.options.high_priority_discount;
                }
                if best.is_none_or(|(_, best_d)| d < best_d) {
                    best = Some((i, d));
                }
            }
            let Some((i, _)) = best else { break };
            visited[i] = true;
            order.push(i + 1);
            current = i + 1;
        }

        order
    }

    /// 2-opt local search over an open path. Returns the pass count.
    fn two_opt(&self, order: &mut [usize], dist: &[Vec<f64>]) -> usize {
        let n = order.len();
        if n < 2 {
            return 0;
        }

        let mut passes = 0;
        for _ in 0..self.options.max_passes {
            passes += 1;
            let mut improved = false;
            for i in 0..n - 1 {
                for j in i + 1..n {
                    if two_opt_delta(order, dist, i, j) < -self.options.min_gain_km {
                        order[i..=j].reverse();
                        improved = true;
                    }
                }
            }
            if !improved {
                break;
            }
        }
        passes
    }
}

/// Distance change from reversing `order[i..=j]` on an open path rooted at
/// the origin (matrix index 0). Interior edges flip direction too, which
/// matters when the matrix is asymmetric (road networks usually are).
fn two_opt_delta(order: &[usize], dist: &[Vec<f64>], i: usize, j: usize) -> f64 {
    let prev = if i == 0 { 0 } else { order[i - 1] };
    let next = order.get(j + 1).copied();

    let mut old = dist[prev][order[i]] + next.map_or(0.0, |next| dist[order[j]][next]);
    let mut new = dist[prev][order[j]] + next.map_or(0.0, |next| dist[order[i]][next]);
    for k in i..j {
        old += dist[order[k]][order[k + 1]];
        new += dist[order[k + 1]][order[k]];
    }
    new - old
}

fn finish(stops: &[Delivery], order: Vec<usize>, matrix: &Matrix) -> Tour {
    let mut legs = Vec::with_capacity(order.len());
    let mut total_distance_km = 0.0;
    let mut total_time_min = 0.0;

    let mut prev = 0usize;
    for &idx in &order {
        let leg = Leg {
            distance_km: matrix.distance_km[prev][idx],
            duration_min: matrix.duration_min[prev][idx],
        };
        total_distance_km += leg.distance_km;
        total_time_min += leg.duration_min;
        legs.push(leg);
        prev = idx;
    }

    Tour {
        order: order.iter().map(|&idx| stops[idx - 1].id.clone()).collect(),
        legs,
        total_distance_km,
        total_time_min,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceConfig;
    use crate::model::{Point, TimeWindow};
    use crate::traits::{BackendError, TableResult};

    /// Always-failing backend; tours run on corrected haversine figures.
    struct DownBackend;

    impl RoutingBackend for DownBackend {
        fn route(&self, _from: Point, _to: Point) -> Result<Leg, BackendError> {
            Err(BackendError::Malformed("down".to_string()))
        }

        fn table(&self, _points: &[Point]) -> Result<TableResult, BackendError> {
            Err(BackendError::Malformed("down".to_string()))
        }
    }

    fn provider() -> DistanceProvider<DownBackend> {
        DistanceProvider::new(DownBackend, DistanceConfig::default())
    }

    fn p(lat: f64, lng: f64) -> Point {
        Point::new(lat, lng).unwrap()
    }

    fn stop(id: &str, lat: f64, lng: f64) -> Delivery {
        Delivery::new(id, p(lat, lng))
    }

    #[test]
    fn test_empty_and_single() {
        let provider = provider();
        let builder = TourBuilder::new(&provider, TourOptions::default());
        let origin = p(36.10, -115.10);

        let empty = builder.build(origin, &[]);
        assert!(empty.order.is_empty());
        assert_eq!(empty.total_distance_km, 0.0);

        let one = stop("a", 36.20, -115.20);
        let tour = builder.build(origin, std::slice::from_ref(&one));
        assert_eq!(tour.order, vec!["a".to_string()]);
        let direct = provider.distance(origin, one.destination);
        assert!((tour.total_distance_km - direct.distance_km).abs() < 1e-9);
    }

    #[test]
    fn test_order_is_permutation() {
        let provider = provider();
        let builder = TourBuilder::new(&provider, TourOptions::default());
        let stops = vec![
            stop("a", 36.11, -115.11),
            stop("b", 36.25, -115.05),
            stop("c", 36.18, -115.30),
            stop("d", 36.05, -115.22),
        ];
        let tour = builder.build(p(36.10, -115.10), &stops);
        let mut ids: Vec<_> = tour.order.clone();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_windowed_stops_lead_construction() {
        let provider = provider();
        // Disable 2-opt so the construction order is observable.
        let options = TourOptions {
            max_passes: 0,
            ..TourOptions::default()
        };
        let builder = TourBuilder::new(&provider, options);

        let mut late = stop("late", 36.30, -115.30);
        late.window = Some(TimeWindow::new(600, 900).unwrap());
        let mut early = stop("early", 36.40, -115.40);
        early.window = Some(TimeWindow::new(480, 540).unwrap());
        let free = stop("free", 36.101, -115.101);

        let tour = builder.build(p(36.10, -115.10), &[free.clone(), late, early]);
        // Windowed stops first by window end, even though "free" is nearest.
        assert_eq!(tour.order, vec!["early", "late", "free"]);
    }

    #[test]
    fn test_high_priority_wins_near_tie() {
        let provider = provider();
        let options = TourOptions {
            max_passes: 0,
            ..TourOptions::default()
        };
        let builder = TourBuilder::new(&provider, options);

        // "near" is slightly closer, but "urgent" wins under the 0.5x discount.
        let near = stop("near", 36.150, -115.10);
        let mut urgent = stop("urgent", 36.155, -115.10);
        urgent.priority = Priority::High;

        let tour = builder.build(p(36.10, -115.10), &[near, urgent]);
        assert_eq!(tour.order[0], "urgent");
    }

    #[test]
    fn test_two_opt_never_regresses() {
        let provider = provider();
        let stops = vec![
            stop("a", 36.10, -115.40),
            stop("b", 36.40, -115.10),
            stop("c", 36.10, -115.15),
            stop("d", 36.40, -115.35),
            stop("e", 36.25, -115.25),
        ];
        let origin = p(36.10, -115.10);

        let construction_only = TourBuilder::new(
            &provider,
            TourOptions {
                max_passes: 0,
                ..TourOptions::default()
            },
        )
        .build(origin, &stops);
        let improved =
            TourBuilder::new(&provider, TourOptions::default()).build(origin, &stops);

        assert!(improved.total_distance_km <= construction_only.total_distance_km + 1e-9);
    }

    #[test]
    fn test_sequence_keeps_given_order() {
        let provider = provider();
        let builder = TourBuilder::new(&provider, TourOptions::default());
        let stops = vec![
            stop("far", 36.40, -115.40),
            stop("near", 36.11, -115.11),
        ];
        let tour = builder.sequence(p(36.10, -115.10), &stops);
        assert_eq!(tour.order, vec!["far", "near"]);
        assert_eq!(tour.legs.len(), 2);
        let sum: f64 = tour.legs.iter().map(|l| l.distance_km).sum();
        assert!((sum - tour.total_distance_km).abs() < 1e-9);
    }
}
