mod common;

use std::collections::HashSet;

use common::{config, Harness, PICKUP};
use dispatch::api::{RideLifecycleAPI, RouteAPI};
use dispatch::clock::Clock;
use dispatch::config::DispatchMode;
use dispatch::entities::{Ride, StopKind};
use dispatch::geometry::{offset_east, offset_north};
use dispatch::store::FleetRegistry;
use uuid::Uuid;

async fn ride_between(h: &Harness, pickup_km: (f64, f64), dropoff_km: (f64, f64)) -> Uuid {
    let pickup = offset_east(offset_north(PICKUP, pickup_km.0), pickup_km.1);
    let dropoff = offset_east(offset_north(PICKUP, dropoff_km.0), dropoff_km.1);
    let ride = Ride::new(
        pickup,
        dropoff,
        1800.0,
        h.clock.now(),
    )
    .unwrap();

    h.store.insert_ride(&ride).await.unwrap();

    ride.id
}

#[tokio::test]
async fn planned_route_visits_every_stop_in_order() {
    let h = Harness::new(config(DispatchMode::Broadcast));
    let driver_id = h.driver_at(0.0).await;
    let a = ride_between(&h, (1.0, 0.0), (4.0, 1.0)).await;
    let b = ride_between(&h, (2.0, 0.5), (5.0, 0.0)).await;
    let c = ride_between(&h, (0.5, -1.0), (3.0, -2.0)).await;

    let route = h.engine.plan_route(driver_id, vec![a, b, c]).await.unwrap();

    assert_eq!(route.stops.len(), 6);

    let unique: HashSet<(Uuid, StopKind)> =
        route.points().map(|point| (point.ride_id, point.kind)).collect();
    assert_eq!(unique.len(), 6);

    for ride_id in [a, b, c] {
        let pickup = route.position(ride_id, StopKind::Pickup).unwrap();
        let dropoff = route.position(ride_id, StopKind::Dropoff).unwrap();
        assert!(pickup < dropoff);
    }

    assert!(route.efficiency > 0.0 && route.efficiency <= 1.0);
    assert!(route.total_distance_km > 0.0);
    assert!((route.estimated_earnings - 3.0 * 1800.0).abs() < 1e-6);
}

#[tokio::test]
async fn closed_or_unknown_rides_are_rejected() {
    let h = Harness::new(config(DispatchMode::Broadcast));
    let driver_id = h.driver_at(0.0).await;
    let open = ride_between(&h, (1.0, 0.0), (3.0, 0.0)).await;
    let cancelled = ride_between(&h, (2.0, 0.0), (4.0, 0.0)).await;

    h.engine.cancel_ride(cancelled).await.unwrap();

    let err = h
        .engine
        .plan_route(driver_id, vec![open, cancelled])
        .await
        .unwrap_err();
    assert!(err.is_invalid_input());

    let err = h
        .engine
        .plan_route(driver_id, vec![open, Uuid::new_v4()])
        .await
        .unwrap_err();
    assert!(err.is_invalid_input());
}

#[tokio::test]
async fn suggestions_cover_every_ride() {
    let h = Harness::new(config(DispatchMode::Broadcast));
    let driver_id = h.driver_at(0.0).await;
    let a = ride_between(&h, (1.0, 0.0), (4.0, 0.0)).await;
    let b = ride_between(&h, (3.0, 0.0), (6.0, 0.0)).await;

    let suggestions = h.engine.suggest_rides(driver_id, vec![a, b]).await.unwrap();

    let ids: HashSet<Uuid> = suggestions.iter().map(|s| s.ride_id).collect();
    assert_eq!(ids, [a, b].into_iter().collect());
    assert_eq!(suggestions[0].ride_id, a);
}

#[tokio::test]
async fn pickup_order_starts_from_the_driver() {
    let h = Harness::new(config(DispatchMode::Broadcast));
    let driver_id = h.driver_at(0.0).await;
    let far = ride_between(&h, (6.0, 0.0), (8.0, 0.0)).await;
    let near = ride_between(&h, (1.0, 0.0), (3.0, 0.0)).await;
    let mid = ride_between(&h, (3.0, 0.0), (5.0, 0.0)).await;

    let order = h
        .engine
        .pickup_order(driver_id, vec![far, near, mid])
        .await
        .unwrap();

    assert_eq!(order, vec![near, mid, far]);
    assert!(h.engine.pickup_order(driver_id, vec![]).await.unwrap().is_empty());
}
