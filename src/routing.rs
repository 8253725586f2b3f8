//! Multi-stop route sequencing for pooled rides.
//!
//! Every ride contributes a pickup and a dropoff (or only a dropoff once the
//! passenger is on board). Output orders keep each pickup ahead of its dropoff
//! and visit every stop exactly once.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{
    Coordinates, OptimizedRoute, Ride, RideStatus, RoutePoint, RouteStop, StopKind,
};
use crate::error::{invalid_input, Error};
use crate::geometry::{bearing, bearing_difference, distance_km, eta_minutes};

/// Dropping a passenger straight after pickup is preferred when it costs less
/// than this much extra distance.
pub const DROPOFF_DETOUR_THRESHOLD_KM: f64 = 2.0;

/// Up to this many stops every valid ordering is enumerated.
const LONG_RIDE_KM: f64 = 5.0;
const HIGH_FARE: f64 = 1000.0;

pub const EXHAUSTIVE_STOP_LIMIT: usize = 6;

pub const STOP_DWELL_MINUTES: u32 = 5;

const SIMILAR_DIRECTION_DEGREES: f64 = 45.0;
const EPSILON: f64 = 1e-9;

pub fn urgency(ride: &Ride, now: DateTime<Utc>) -> f64 {
    let age_minutes = (now - ride.created_at).num_seconds().max(0) as f64 / 60.0;
    let fare = ride.estimated_fare.max(0.0);

    (0.5 + (age_minutes / 30.0).min(0.5) + (fare / 2000.0).min(0.3)).min(1.0)
}

/// Stops for the rides a driver carries. Rides already in progress only need
/// their dropoff.
pub fn route_points(rides: &[Ride], now: DateTime<Utc>) -> Vec<RoutePoint> {
    let mut points = Vec::with_capacity(rides.len() * 2);

    for ride in rides {
        let urgency = urgency(ride, now);

        if ride.status != RideStatus::InProgress {
            points.push(RoutePoint {
                coordinates: ride.pickup,
                kind: StopKind::Pickup,
                ride_id: ride.id,
                urgency,
                fare: ride.estimated_fare,
            });
        }

        points.push(RoutePoint {
            coordinates: ride.dropoff,
            kind: StopKind::Dropoff,
            ride_id: ride.id,
            urgency,
            fare: ride.estimated_fare,
        });
    }

    points
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RideSuggestion {
    pub ride_id: Uuid,
    pub priority: f64,
    pub estimated_pickup_minutes: u32,
    pub direction_affinity: f64,
    pub efficiency_rating: f64,
}

#[derive(Clone, Copy, Debug, Default)]
struct Stops {
    pickup: Option<usize>,
    dropoff: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct RouteSequencer {
    average_speed_kmh: f64,
}

impl RouteSequencer {
    pub fn new(average_speed_kmh: f64) -> Self {
        Self { average_speed_kmh }
    }

    /// Orders `points` starting from `start`, or from the first pickup when
    /// the driver's position is unknown.
    #[tracing::instrument(skip(self, points), fields(stops = points.len()))]
    pub fn sequence(
        &self,
        start: Option<Coordinates>,
        points: Vec<RoutePoint>,
    ) -> Result<OptimizedRoute, Error> {
        if points.is_empty() {
            return Ok(OptimizedRoute::empty());
        }

        let stops = index_stops(&points)?;

        let start = match start {
            Some(start) => start,
            None => points
                .iter()
                .find(|point| point.kind == StopKind::Pickup)
                .unwrap_or(&points[0])
                .coordinates,
        };
        start.validate()?;

        let order = if points.len() <= EXHAUSTIVE_STOP_LIMIT {
            exhaustive_order(start, &points, &stops)
        } else {
            nearest_neighbor_order(start, &points, &stops)
        };

        Ok(self.build(start, order.into_iter().map(|i| points[i]).collect()))
    }

    /// Urgency-weighted pickup order (pickups only): the next ride is the one
    /// minimising distance / (urgency + 0.1).
    pub fn pickup_order(&self, start: Coordinates, rides: &[Ride], now: DateTime<Utc>) -> Vec<Uuid> {
        let mut remaining: Vec<(&Ride, f64)> =
            rides.iter().map(|ride| (ride, urgency(ride, now))).collect();
        let mut order = Vec::with_capacity(rides.len());
        let mut current = start;

        while !remaining.is_empty() {
            let mut best = 0;
            let mut best_cost = f64::INFINITY;

            for (i, (ride, urgency)) in remaining.iter().enumerate() {
                let cost = distance_km(current, ride.pickup) / (urgency + 0.1);
                if cost < best_cost - EPSILON {
                    best = i;
                    best_cost = cost;
                }
            }

            let (ride, _) = remaining.remove(best);
            order.push(ride.id);
            current = ride.pickup;
        }

        order
    }

    /// Ranks rides by how attractive they are to serve next.
    pub fn suggest_sequence(
        &self,
        start: Option<Coordinates>,
        rides: &[Ride],
        now: DateTime<Utc>,
    ) -> Vec<RideSuggestion> {
        let mut suggestions: Vec<RideSuggestion> = rides
            .iter()
            .map(|ride| {
                let affinity = direction_affinity(ride, rides);
                let mut priority = 0.0;

                if let Some(start) = start {
                    priority += (1.0 - distance_km(start, ride.pickup) / 20.0).max(0.0) * 0.3;
                }

                priority += (ride.estimated_fare.max(0.0) / 2000.0).min(1.0) * 0.3;

                let age_minutes = (now - ride.created_at).num_seconds().max(0) as f64 / 60.0;
                priority += (1.0 - age_minutes / 60.0).max(0.0) * 0.2;
                priority += affinity * 0.2;

                RideSuggestion {
                    ride_id: ride.id,
                    priority,
                    estimated_pickup_minutes: start
                        .map(|start| {
                            eta_minutes(distance_km(start, ride.pickup), self.average_speed_kmh)
                        })
                        .unwrap_or(15),
                    direction_affinity: affinity,
                    efficiency_rating: efficiency_rating(ride),
                }
            })
            .collect();

        suggestions.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then_with(|| a.ride_id.cmp(&b.ride_id))
        });

        suggestions
    }

    fn build(&self, start: Coordinates, ordered: Vec<RoutePoint>) -> OptimizedRoute {
        let mut stops = Vec::with_capacity(ordered.len());
        let mut current = start;
        let mut total_distance_km = 0.0;
        let mut travel_minutes = 0.0;

        for (i, point) in ordered.iter().enumerate() {
            let leg = distance_km(current, point.coordinates);
            total_distance_km += leg;
            travel_minutes += leg / self.average_speed_kmh.max(1.0) * 60.0;

            stops.push(RouteStop {
                point: *point,
                distance_from_previous_km: leg,
                eta_minutes: (travel_minutes + (i as u32 * STOP_DWELL_MINUTES) as f64).round()
                    as u32,
            });

            current = point.coordinates;
        }

        let mut fares: HashMap<Uuid, f64> = HashMap::new();
        for point in ordered.iter() {
            fares.entry(point.ride_id).or_insert(point.fare);
        }

        OptimizedRoute {
            efficiency: efficiency(start, &ordered),
            total_duration_minutes: (travel_minutes
                + (ordered.len() as u32 * STOP_DWELL_MINUTES) as f64)
                .round() as u32,
            estimated_earnings: fares.values().sum(),
            total_distance_km,
            stops,
        }
    }
}

/// Standalone worth of a ride: long trips and high fares rate better.
pub fn efficiency_rating(ride: &Ride) -> f64 {
    let mut rating: f64 = 0.5;

    if distance_km(ride.pickup, ride.dropoff) > LONG_RIDE_KM {
        rating += 0.2;
    }

    if ride.estimated_fare > HIGH_FARE {
        rating += 0.3;
    }

    rating.min(1.0)
}

/// Sum of each ride's direct distance (start to pickup to dropoff) over the
/// distance actually driven, capped at 1.
pub fn efficiency(start: Coordinates, ordered: &[RoutePoint]) -> f64 {
    let mut route_distance = 0.0;
    let mut current = start;
    for point in ordered {
        route_distance += distance_km(current, point.coordinates);
        current = point.coordinates;
    }

    if route_distance <= EPSILON {
        return 1.0;
    }

    let mut direct_distance = 0.0;
    for point in ordered {
        match point.kind {
            StopKind::Pickup => {
                direct_distance += distance_km(start, point.coordinates);
                if let Some(dropoff) = ordered
                    .iter()
                    .find(|p| p.ride_id == point.ride_id && p.kind == StopKind::Dropoff)
                {
                    direct_distance += distance_km(point.coordinates, dropoff.coordinates);
                }
            }
            StopKind::Dropoff => {
                let picked_up_here = ordered
                    .iter()
                    .any(|p| p.ride_id == point.ride_id && p.kind == StopKind::Pickup);
                if !picked_up_here {
                    direct_distance += distance_km(start, point.coordinates);
                }
            }
        }
    }

    (direct_distance / route_distance).clamp(f64::MIN_POSITIVE, 1.0)
}

/// Share of the other rides heading in roughly the same direction.
pub fn direction_affinity(ride: &Ride, all: &[Ride]) -> f64 {
    if all.len() <= 1 {
        return 1.0;
    }

    let heading = bearing(ride.pickup, ride.dropoff);
    let similar = all
        .iter()
        .filter(|other| other.id != ride.id)
        .filter(|other| {
            bearing_difference(heading, bearing(other.pickup, other.dropoff))
                <= SIMILAR_DIRECTION_DEGREES
        })
        .count();

    similar as f64 / (all.len() - 1) as f64
}

fn index_stops(points: &[RoutePoint]) -> Result<HashMap<Uuid, Stops>, Error> {
    let mut stops: HashMap<Uuid, Stops> = HashMap::new();

    for (i, point) in points.iter().enumerate() {
        point.coordinates.validate()?;

        let entry = stops.entry(point.ride_id).or_default();
        let slot = match point.kind {
            StopKind::Pickup => &mut entry.pickup,
            StopKind::Dropoff => &mut entry.dropoff,
        };

        if slot.replace(i).is_some() {
            return Err(invalid_input(format!(
                "ride {} has more than one {:?} stop",
                point.ride_id, point.kind
            )));
        }
    }

    if let Some((ride_id, _)) = stops.iter().find(|(_, s)| s.dropoff.is_none()) {
        return Err(invalid_input(format!("ride {} has no dropoff stop", ride_id)));
    }

    Ok(stops)
}

fn is_ready(point: &RoutePoint, stops: &HashMap<Uuid, Stops>, visited: &[bool]) -> bool {
    match point.kind {
        StopKind::Pickup => true,
        StopKind::Dropoff => match stops.get(&point.ride_id).and_then(|s| s.pickup) {
            Some(pickup) => visited[pickup],
            None => true,
        },
    }
}

struct Search<'a> {
    points: &'a [RoutePoint],
    stops: &'a HashMap<Uuid, Stops>,
    visited: Vec<bool>,
    path: Vec<usize>,
    best: Option<(f64, f64, Vec<usize>)>,
}

impl<'a> Search<'a> {
    fn run(&mut self, current: Coordinates, distance: f64, lateness: f64) {
        if let Some((best_distance, _, _)) = &self.best {
            if distance > best_distance + EPSILON {
                return;
            }
        }

        if self.path.len() == self.points.len() {
            let better = match &self.best {
                None => true,
                Some((best_distance, best_lateness, _)) => {
                    distance < best_distance - EPSILON
                        || (distance <= best_distance + EPSILON
                            && lateness < best_lateness - EPSILON)
                }
            };

            if better {
                self.best = Some((distance, lateness, self.path.clone()));
            }
            return;
        }

        for i in 0..self.points.len() {
            if self.visited[i] || !is_ready(&self.points[i], self.stops, &self.visited) {
                continue;
            }

            let point = self.points[i];
            let position = self.path.len() as f64;

            self.visited[i] = true;
            self.path.push(i);
            self.run(
                point.coordinates,
                distance + distance_km(current, point.coordinates),
                lateness + position * point.urgency,
            );
            self.path.pop();
            self.visited[i] = false;
        }
    }
}

/// Shortest valid ordering; among equally short ones, the one that reaches
/// urgent stops earliest.
fn exhaustive_order(
    start: Coordinates,
    points: &[RoutePoint],
    stops: &HashMap<Uuid, Stops>,
) -> Vec<usize> {
    let mut search = Search {
        points,
        stops,
        visited: vec![false; points.len()],
        path: Vec::with_capacity(points.len()),
        best: None,
    };
    search.run(start, 0.0, 0.0);

    match search.best {
        Some((_, _, order)) => order,
        None => nearest_neighbor_order(start, points, stops),
    }
}

/// Index of the closest point in `candidates`, preferring more urgent stops on
/// equal distance.
fn nearest(from: Coordinates, points: &[RoutePoint], candidates: &[usize]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;

    for (slot, &i) in candidates.iter().enumerate() {
        let distance = distance_km(from, points[i].coordinates);
        best = match best {
            None => Some((slot, distance)),
            Some((best_slot, best_distance)) => {
                let best_urgency = points[candidates[best_slot]].urgency;
                if distance < best_distance - EPSILON
                    || (distance <= best_distance + EPSILON
                        && points[i].urgency > best_urgency + EPSILON)
                {
                    Some((slot, distance))
                } else {
                    Some((best_slot, best_distance))
                }
            }
        };
    }

    best.map(|(slot, _)| slot)
}

fn should_drop_off_now(
    pickup: &RoutePoint,
    dropoff: &RoutePoint,
    points: &[RoutePoint],
    remaining_pickups: &[usize],
) -> bool {
    let next = match nearest(pickup.coordinates, points, remaining_pickups) {
        Some(slot) => points[remaining_pickups[slot]].coordinates,
        None => return true,
    };

    let detour = distance_km(pickup.coordinates, dropoff.coordinates)
        + distance_km(dropoff.coordinates, next)
        - distance_km(pickup.coordinates, next);

    detour < DROPOFF_DETOUR_THRESHOLD_KM
}

fn nearest_neighbor_order(
    start: Coordinates,
    points: &[RoutePoint],
    stops: &HashMap<Uuid, Stops>,
) -> Vec<usize> {
    let mut remaining_pickups: Vec<usize> = (0..points.len())
        .filter(|&i| points[i].kind == StopKind::Pickup)
        .collect();

    // passengers already on board
    let mut pending_dropoffs: Vec<usize> = (0..points.len())
        .filter(|&i| {
            points[i].kind == StopKind::Dropoff
                && stops
                    .get(&points[i].ride_id)
                    .map_or(true, |s| s.pickup.is_none())
        })
        .collect();

    let mut order = Vec::with_capacity(points.len());
    let mut current = start;

    while let Some(slot) = nearest(current, points, &remaining_pickups) {
        let pickup = remaining_pickups.remove(slot);
        order.push(pickup);
        current = points[pickup].coordinates;

        let dropoff = match stops.get(&points[pickup].ride_id).and_then(|s| s.dropoff) {
            Some(dropoff) => dropoff,
            None => continue,
        };

        if should_drop_off_now(&points[pickup], &points[dropoff], points, &remaining_pickups) {
            order.push(dropoff);
            current = points[dropoff].coordinates;
        } else {
            pending_dropoffs.push(dropoff);
        }
    }

    while let Some(slot) = nearest(current, points, &pending_dropoffs) {
        let dropoff = pending_dropoffs.remove(slot);
        order.push(dropoff);
        current = points[dropoff].coordinates;
    }

    order
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::geometry::{offset_east, offset_north};

    const ORIGIN: Coordinates = Coordinates {
        lat: 6.5244,
        lng: 3.3792,
    };

    fn sequencer() -> RouteSequencer {
        RouteSequencer::new(25.0)
    }

    fn point(ride: u128, kind: StopKind, at: Coordinates, urgency: f64) -> RoutePoint {
        RoutePoint {
            coordinates: at,
            kind,
            ride_id: Uuid::from_u128(ride),
            urgency,
            fare: 1000.0,
        }
    }

    fn pair(ride: u128, from: Coordinates, to: Coordinates) -> [RoutePoint; 2] {
        [
            point(ride, StopKind::Pickup, from, 0.5),
            point(ride, StopKind::Dropoff, to, 0.5),
        ]
    }

    fn assert_integrity(route: &OptimizedRoute, input: &[RoutePoint]) {
        assert_eq!(route.stops.len(), input.len());

        for point in input {
            let count = route.points().filter(|p| *p == point).count();
            assert_eq!(count, 1, "stop {:?} visited {} times", point, count);

            if point.kind == StopKind::Pickup {
                let pickup = route.position(point.ride_id, StopKind::Pickup).unwrap();
                let dropoff = route.position(point.ride_id, StopKind::Dropoff).unwrap();
                assert!(pickup < dropoff, "ride {} dropped before pickup", point.ride_id);
            }
        }

        assert!(route.efficiency > 0.0 && route.efficiency <= 1.0);
    }

    fn random_points(rng: &mut StdRng, rides: u128, onboard: u128) -> Vec<RoutePoint> {
        let mut points = vec![];
        let around = |rng: &mut StdRng| {
            offset_east(
                offset_north(ORIGIN, rng.gen_range(-8.0..8.0)),
                rng.gen_range(-8.0..8.0),
            )
        };

        for ride in 0..rides {
            let urgency = rng.gen_range(0.5..1.0);
            points.push(point(ride, StopKind::Pickup, around(rng), urgency));
            points.push(point(ride, StopKind::Dropoff, around(rng), urgency));
        }

        for ride in rides..rides + onboard {
            points.push(point(ride, StopKind::Dropoff, around(rng), 0.7));
        }

        points
    }

    #[test]
    fn empty_route() {
        let route = sequencer().sequence(Some(ORIGIN), vec![]).unwrap();

        assert!(route.stops.is_empty());
        assert_eq!(route.efficiency, 1.0);
    }

    #[test]
    fn single_ride_is_pickup_then_dropoff() {
        let points = pair(1, offset_north(ORIGIN, 1.0), offset_north(ORIGIN, 6.0)).to_vec();

        let route = sequencer().sequence(Some(ORIGIN), points.clone()).unwrap();

        assert_integrity(&route, &points);
        assert!((route.total_distance_km - 6.0).abs() < 1e-6);
        assert!((route.efficiency - 1.0).abs() < 1e-9);
        assert_eq!(route.estimated_earnings, 1000.0);
        // 6 km at 25 km/h plus two stops
        assert_eq!(route.total_duration_minutes, 14 + 10);
    }

    #[test]
    fn integrity_holds_for_small_and_large_inputs() {
        let mut rng = StdRng::seed_from_u64(7);

        for (rides, onboard) in [(1, 0), (2, 1), (3, 0), (4, 0), (6, 2), (10, 3)] {
            for _ in 0..5 {
                let points = random_points(&mut rng, rides, onboard);
                let route = sequencer().sequence(Some(ORIGIN), points.clone()).unwrap();

                assert_integrity(&route, &points);
            }
        }
    }

    #[test]
    fn exhaustive_beats_or_matches_nearest_neighbor() {
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..20 {
            let points = random_points(&mut rng, 3, 0);
            let stops = index_stops(&points).unwrap();

            let exact: f64 = route_length(ORIGIN, &points, &exhaustive_order(ORIGIN, &points, &stops));
            let greedy: f64 =
                route_length(ORIGIN, &points, &nearest_neighbor_order(ORIGIN, &points, &stops));

            assert!(exact <= greedy + 1e-9);
        }
    }

    fn route_length(start: Coordinates, points: &[RoutePoint], order: &[usize]) -> f64 {
        let mut current = start;
        let mut total = 0.0;
        for &i in order {
            total += distance_km(current, points[i].coordinates);
            current = points[i].coordinates;
        }
        total
    }

    #[test]
    fn short_detour_drops_off_immediately() {
        // ride 1 drops 1 km further along the way to ride 2's pickup
        let points: Vec<RoutePoint> = [
            pair(1, offset_north(ORIGIN, 1.0), offset_north(ORIGIN, 2.0)),
            pair(2, offset_north(ORIGIN, 3.0), offset_north(ORIGIN, 4.0)),
            pair(3, offset_north(ORIGIN, 5.0), offset_north(ORIGIN, 6.0)),
            pair(4, offset_north(ORIGIN, 7.0), offset_north(ORIGIN, 8.0)),
        ]
        .concat();
        let stops = index_stops(&points).unwrap();

        let order = nearest_neighbor_order(ORIGIN, &points, &stops);

        assert_eq!(order, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn long_detour_defers_dropoff() {
        // ride 1 heads 10 km east while ride 2 waits 1 km north
        let points: Vec<RoutePoint> = [
            pair(1, offset_north(ORIGIN, 0.5), offset_east(ORIGIN, 10.0)),
            pair(2, offset_north(ORIGIN, 1.5), offset_north(ORIGIN, 2.5)),
        ]
        .concat();
        let stops = index_stops(&points).unwrap();

        let order = nearest_neighbor_order(ORIGIN, &points, &stops);

        assert_eq!(order[0], 0);
        assert_eq!(order[1], 2);
        assert!(order.iter().position(|&i| i == 1) > order.iter().position(|&i| i == 2));
    }

    #[test]
    fn onboard_passengers_only_need_dropoff() {
        let points = vec![
            point(1, StopKind::Dropoff, offset_north(ORIGIN, 2.0), 0.6),
            point(2, StopKind::Pickup, offset_north(ORIGIN, 1.0), 0.6),
            point(2, StopKind::Dropoff, offset_north(ORIGIN, 3.0), 0.6),
        ];

        let route = sequencer().sequence(Some(ORIGIN), points.clone()).unwrap();

        assert_integrity(&route, &points);
        assert!((route.total_distance_km - 3.0).abs() < 1e-6);
    }

    #[test]
    fn equal_distance_prefers_urgent_pickup() {
        let points = vec![
            point(1, StopKind::Pickup, offset_north(ORIGIN, 1.0), 0.5),
            point(1, StopKind::Dropoff, ORIGIN, 0.5),
            point(2, StopKind::Pickup, offset_north(ORIGIN, -1.0), 0.9),
            point(2, StopKind::Dropoff, ORIGIN, 0.9),
        ];

        let route = sequencer().sequence(Some(ORIGIN), points).unwrap();

        assert_eq!(route.stops[0].point.ride_id, Uuid::from_u128(2));
    }

    #[test]
    fn rejects_pickup_without_dropoff() {
        let points = vec![point(1, StopKind::Pickup, ORIGIN, 0.5)];

        let err = sequencer().sequence(Some(ORIGIN), points).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn rejects_duplicate_stops() {
        let mut points = pair(1, ORIGIN, offset_north(ORIGIN, 1.0)).to_vec();
        points.push(points[1]);

        let err = sequencer().sequence(Some(ORIGIN), points).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn unknown_start_uses_first_pickup() {
        let points = pair(1, offset_north(ORIGIN, 1.0), offset_north(ORIGIN, 4.0)).to_vec();

        let route = sequencer().sequence(None, points).unwrap();

        assert_eq!(route.stops[0].distance_from_previous_km, 0.0);
        assert!((route.total_distance_km - 3.0).abs() < 1e-6);
    }

    #[test]
    fn urgency_grows_with_age_and_fare() {
        let now = Utc::now();
        let fresh = Ride::new(ORIGIN, ORIGIN, 0.0, now).unwrap();
        let old = Ride::new(ORIGIN, ORIGIN, 0.0, now - Duration::minutes(6)).unwrap();
        let rich = Ride::new(ORIGIN, ORIGIN, 5000.0, now - Duration::hours(2)).unwrap();

        assert_eq!(urgency(&fresh, now), 0.5);
        assert!((urgency(&old, now) - 0.7).abs() < 1e-9);
        assert_eq!(urgency(&rich, now), 1.0);
    }

    #[test]
    fn route_points_skip_pickup_for_rides_in_progress() {
        let now = Utc::now();
        let waiting = Ride::new(ORIGIN, offset_north(ORIGIN, 2.0), 900.0, now).unwrap();
        let mut riding = Ride::new(ORIGIN, offset_north(ORIGIN, 3.0), 900.0, now).unwrap();
        riding.status = RideStatus::InProgress;

        let points = route_points(&[waiting.clone(), riding.clone()], now);

        assert_eq!(points.len(), 3);
        assert_eq!(
            points.iter().filter(|p| p.ride_id == riding.id).count(),
            1
        );
    }

    #[test]
    fn pickup_order_favours_close_and_urgent_rides() {
        let now = Utc::now();
        let near = Ride::new(offset_north(ORIGIN, 1.0), ORIGIN, 0.0, now).unwrap();
        let far_urgent =
            Ride::new(offset_north(ORIGIN, 1.5), ORIGIN, 2000.0, now - Duration::hours(1)).unwrap();
        let far = Ride::new(offset_north(ORIGIN, 6.0), ORIGIN, 0.0, now).unwrap();

        let order = sequencer().pickup_order(ORIGIN, &[far.clone(), near.clone(), far_urgent.clone()], now);

        // 1.5 / 1.1 beats 1.0 / 0.6
        assert_eq!(order, vec![far_urgent.id, near.id, far.id]);
    }

    #[test]
    fn suggestions_rank_aligned_rides_higher() {
        let now = Utc::now();
        let north_a = Ride::new(ORIGIN, offset_north(ORIGIN, 5.0), 1000.0, now).unwrap();
        let north_b = Ride::new(offset_east(ORIGIN, 0.2), offset_north(ORIGIN, 6.0), 1000.0, now).unwrap();
        let east = Ride::new(offset_north(ORIGIN, 0.1), offset_east(ORIGIN, 6.0), 1000.0, now).unwrap();
        let rides = vec![east.clone(), north_a.clone(), north_b.clone()];

        let suggestions = sequencer().suggest_sequence(Some(ORIGIN), &rides, now);

        assert_eq!(suggestions.len(), 3);
        assert_eq!(suggestions[2].ride_id, east.id);
        assert_eq!(suggestions[2].direction_affinity, 0.0);
        assert!(suggestions
            .iter()
            .all(|s| s.estimated_pickup_minutes >= crate::geometry::MIN_ETA_MINUTES));
    }

    #[test]
    fn efficiency_rating_rewards_long_and_well_paid_rides() {
        let now = Utc::now();
        let short_cheap = Ride::new(ORIGIN, offset_north(ORIGIN, 2.0), 800.0, now).unwrap();
        let long_cheap = Ride::new(ORIGIN, offset_north(ORIGIN, 7.0), 800.0, now).unwrap();
        let long_dear = Ride::new(ORIGIN, offset_north(ORIGIN, 7.0), 2500.0, now).unwrap();

        assert_eq!(efficiency_rating(&short_cheap), 0.5);
        assert!((efficiency_rating(&long_cheap) - 0.7).abs() < 1e-9);
        assert!((efficiency_rating(&long_dear) - 1.0).abs() < 1e-9);
    }
}
