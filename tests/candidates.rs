mod common;

use std::collections::HashSet;

use chrono::Duration;
use common::{config, Harness, PICKUP};
use dispatch::api::AllocationAPI;
use dispatch::clock::Clock;
use dispatch::config::{Config, DispatchMode};
use dispatch::entities::{DriverLocation, DriverSnapshot, DriverStats, VehicleClass};
use dispatch::geometry::{distance_km, offset_north};
use dispatch::store::{DriverFilter, FleetRegistry, RideStore};
use uuid::Uuid;

fn small_radius() -> Config {
    Config {
        max_search_radius_km: 5.0,
        ..config(DispatchMode::Broadcast)
    }
}

#[tokio::test]
async fn candidates_stay_inside_the_radius() {
    let h = Harness::new(small_radius());
    let near = h.driver_at(1.0).await;
    let mid = h.driver_at(3.0).await;
    let edge = h.driver_at(4.9).await;
    h.driver_at(6.0).await;
    h.driver_at(12.0).await;
    let ride_id = h.ride().await;

    let ranked = h.engine.rank_candidates(ride_id, 10).await.unwrap();

    let ids: Vec<Uuid> = ranked.iter().map(|c| c.driver_id).collect();
    assert_eq!(ids, vec![near, mid, edge]);
    assert!(ranked.iter().all(|c| c.distance_km <= 5.0));
    assert!(ranked.iter().all(|c| (0.0..=1.0).contains(&c.score())));

    let top = h.engine.rank_candidates(ride_id, 1).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].driver_id, near);
}

#[tokio::test]
async fn explicit_radius_is_honoured_and_capped() {
    let h = Harness::new(small_radius());
    let near = h.driver_at(1.0).await;
    h.driver_at(3.0).await;
    h.driver_at(8.0).await;
    let ride_id = h.ride().await;
    let ride = h.store.get(ride_id).await.unwrap().unwrap();
    let none = HashSet::new();

    let within_two = h
        .engine
        .find_candidates(&ride, 2.0, DriverFilter::default(), &none)
        .await
        .unwrap();
    assert_eq!(within_two.len(), 1);
    assert_eq!(within_two[0].driver_id, near);

    let capped = h
        .engine
        .find_candidates(&ride, 100.0, DriverFilter::default(), &none)
        .await
        .unwrap();
    assert_eq!(capped.len(), 2);

    for radius in [0.0, -1.0, f64::NAN] {
        let err = h
            .engine
            .find_candidates(&ride, radius, DriverFilter::default(), &none)
            .await
            .unwrap_err();
        assert!(err.is_invalid_input());
    }

    let excluded: HashSet<Uuid> = [near].into_iter().collect();
    let without_near = h
        .engine
        .find_candidates(&ride, 5.0, DriverFilter::default(), &excluded)
        .await
        .unwrap();
    assert!(without_near.iter().all(|c| c.driver_id != near));
}

#[tokio::test]
async fn drivers_without_a_fresh_fix_are_skipped() {
    let h = Harness::new(small_radius());
    let fresh = h.driver_at(2.0).await;

    let stale = h.driver_at(1.0).await;
    let old_fix = DriverLocation::new(
        offset_north(PICKUP, 1.0),
        h.clock.now() - Duration::minutes(5),
    );
    h.store.update_location(stale, &old_fix).await.unwrap();

    let mut unlocated = DriverSnapshot::new(Uuid::new_v4(), VehicleClass::Economy);
    unlocated.verify();
    unlocated.start().unwrap();
    h.store
        .upsert_driver(&unlocated, &DriverStats::default())
        .await
        .unwrap();

    let mut unverified = DriverSnapshot::new(Uuid::new_v4(), VehicleClass::Economy);
    unverified.start().unwrap();
    h.store
        .upsert_driver(&unverified, &DriverStats::default())
        .await
        .unwrap();
    h.locate(unverified.id, 0.5).await;

    let ride_id = h.ride().await;
    let ranked = h.engine.rank_candidates(ride_id, 10).await.unwrap();

    let ids: Vec<Uuid> = ranked.iter().map(|c| c.driver_id).collect();
    assert_eq!(ids, vec![fresh]);
}

#[tokio::test]
async fn vehicle_filter_narrows_the_search() {
    let h = Harness::new(small_radius());
    h.driver_at(1.0).await;
    let ride_id = h.ride().await;
    let ride = h.store.get(ride_id).await.unwrap().unwrap();

    let premium = DriverFilter {
        vehicle_class: Some(VehicleClass::Premium),
    };
    let found = h
        .engine
        .find_candidates(&ride, 5.0, premium, &HashSet::new())
        .await
        .unwrap();

    assert!(found.is_empty());
}

#[tokio::test]
async fn closer_driver_wins_despite_lower_rating() {
    let h = Harness::new(config(DispatchMode::Broadcast));
    let near = h
        .driver_with(1.0, DriverStats {
            average_rating: Some(4.8),
            total_rides: 100,
            completed_rides: 95,
            acceptance_rate: Some(0.9),
        })
        .await;
    h.driver_with(3.0, DriverStats {
        average_rating: Some(4.0),
        total_rides: 100,
        completed_rides: 80,
        acceptance_rate: Some(0.9),
    })
    .await;
    let far = h
        .driver_with(8.0, DriverStats {
            average_rating: Some(5.0),
            total_rides: 100,
            completed_rides: 100,
            acceptance_rate: Some(0.9),
        })
        .await;
    let ride_id = h.ride().await;

    let ranked = h.engine.rank_candidates(ride_id, 3).await.unwrap();

    assert_eq!(ranked[0].driver_id, near);
    assert_eq!(ranked[2].driver_id, far);
    assert!((ranked[0].distance_km - 1.0).abs() < 1e-6);
    assert!((distance_km(PICKUP, offset_north(PICKUP, 8.0)) - ranked[2].distance_km).abs() < 1e-6);
}

#[tokio::test]
async fn expired_scores_are_purged_by_later_searches() {
    let h = Harness::new(config(DispatchMode::Broadcast));
    let driver_id = h.driver_at(1.0).await;

    let first = h.ride().await;
    h.engine.rank_candidates(first, 5).await.unwrap();
    assert_eq!(h.engine.cached_scores(), 1);

    h.clock.advance(Duration::minutes(6));
    h.locate(driver_id, 1.0).await;

    let second = h.ride().await;
    h.engine.rank_candidates(second, 5).await.unwrap();

    assert_eq!(h.engine.cached_scores(), 1);
}
