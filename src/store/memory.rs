use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{DriverDirectory, DriverFilter, FleetRegistry, LocationStore, RideStore};
use crate::{
    entities::{Coordinates, DriverLocation, DriverSnapshot, DriverStats, Ride, RideStatus},
    error::{invalid_input, Error},
    geometry::distance_km,
};

#[derive(Clone, Debug)]
struct DriverRecord {
    snapshot: DriverSnapshot,
    stats: DriverStats,
}

/// Process-local store. Every compare-and-set runs under the map's per-key
/// write guard, so swaps on the same ride or driver are serialized.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rides: DashMap<Uuid, Ride>,
    drivers: DashMap<Uuid, DriverRecord>,
    locations: DashMap<Uuid, DriverLocation>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RideStore for MemoryStore {
    async fn get(&self, ride_id: Uuid) -> Result<Option<Ride>, Error> {
        Ok(self.rides.get(&ride_id).map(|ride| ride.clone()))
    }

    #[tracing::instrument(skip(self))]
    async fn compare_and_set_status(
        &self,
        ride_id: Uuid,
        expected_status: RideStatus,
        new_status: RideStatus,
        driver_id: Option<Uuid>,
    ) -> Result<bool, Error> {
        let mut ride = match self.rides.get_mut(&ride_id) {
            Some(ride) => ride,
            None => return Ok(false),
        };

        if ride.status != expected_status {
            return Ok(false);
        }

        ride.apply(new_status, driver_id)?;

        Ok(true)
    }
}

#[async_trait]
impl DriverDirectory for MemoryStore {
    async fn find_nearby(
        &self,
        point: Coordinates,
        radius_km: f64,
        filter: DriverFilter,
    ) -> Result<Vec<DriverSnapshot>, Error> {
        let mut drivers = vec![];

        for record in self.drivers.iter() {
            let driver = &record.snapshot;

            if !driver.is_dispatchable() || !filter.matches(driver) {
                continue;
            }

            let within = self
                .locations
                .get(&driver.id)
                .map(|location| distance_km(location.coordinates, point) <= radius_km)
                .unwrap_or(false);

            if within {
                drivers.push(driver.clone());
            }
        }

        Ok(drivers)
    }

    async fn get_driver(&self, driver_id: Uuid) -> Result<Option<DriverSnapshot>, Error> {
        Ok(self
            .drivers
            .get(&driver_id)
            .map(|record| record.snapshot.clone()))
    }

    async fn get_stats(&self, driver_id: Uuid) -> Result<DriverStats, Error> {
        self.drivers
            .get(&driver_id)
            .map(|record| record.stats)
            .ok_or_else(|| invalid_input(format!("unknown driver {}", driver_id)))
    }

    #[tracing::instrument(skip(self))]
    async fn try_assign(&self, driver_id: Uuid, ride_id: Uuid) -> Result<bool, Error> {
        Ok(self
            .drivers
            .get_mut(&driver_id)
            .map(|mut record| record.snapshot.assign(ride_id))
            .unwrap_or(false))
    }

    #[tracing::instrument(skip(self))]
    async fn release(&self, driver_id: Uuid, ride_id: Uuid) -> Result<bool, Error> {
        Ok(self
            .drivers
            .get_mut(&driver_id)
            .map(|mut record| record.snapshot.free(ride_id))
            .unwrap_or(false))
    }
}

#[async_trait]
impl LocationStore for MemoryStore {
    async fn get_current_location(
        &self,
        driver_id: Uuid,
    ) -> Result<Option<DriverLocation>, Error> {
        Ok(self.locations.get(&driver_id).map(|location| *location))
    }
}

#[async_trait]
impl FleetRegistry for MemoryStore {
    async fn insert_ride(&self, ride: &Ride) -> Result<(), Error> {
        self.rides.insert(ride.id, ride.clone());
        Ok(())
    }

    async fn upsert_driver(
        &self,
        driver: &DriverSnapshot,
        stats: &DriverStats,
    ) -> Result<(), Error> {
        self.drivers.insert(
            driver.id,
            DriverRecord {
                snapshot: driver.clone(),
                stats: *stats,
            },
        );
        Ok(())
    }

    async fn update_location(
        &self,
        driver_id: Uuid,
        location: &DriverLocation,
    ) -> Result<(), Error> {
        location.coordinates.validate()?;
        self.locations.insert(driver_id, *location);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::entities::VehicleClass;
    use crate::geometry::offset_north;

    const PICKUP: Coordinates = Coordinates {
        lat: 6.5244,
        lng: 3.3792,
    };

    fn seed(store: &MemoryStore, km: f64, class: VehicleClass) -> Uuid {
        let mut driver = DriverSnapshot::new(Uuid::new_v4(), class);
        driver.verify();
        driver.start().unwrap();

        tokio_test::block_on(async {
            store
                .upsert_driver(&driver, &DriverStats::default())
                .await
                .unwrap();
            store
                .update_location(
                    driver.id,
                    &DriverLocation::new(offset_north(PICKUP, km), Utc::now()),
                )
                .await
                .unwrap();
        });

        driver.id
    }

    #[test]
    fn find_nearby_respects_radius_and_filter() {
        let store = MemoryStore::new();
        let near = seed(&store, 2.0, VehicleClass::Economy);
        let premium = seed(&store, 3.0, VehicleClass::Premium);
        let _far = seed(&store, 20.0, VehicleClass::Premium);

        let all = tokio_test::block_on(store.find_nearby(PICKUP, 15.0, DriverFilter::default()))
            .unwrap();
        let mut ids: Vec<Uuid> = all.iter().map(|d| d.id).collect();
        ids.sort();
        let mut expected = vec![near, premium];
        expected.sort();
        assert_eq!(ids, expected);

        let filtered = tokio_test::block_on(store.find_nearby(
            PICKUP,
            15.0,
            DriverFilter {
                vehicle_class: Some(VehicleClass::Comfort),
            },
        ))
        .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, premium);
    }

    #[test]
    fn assigned_drivers_are_not_nearby() {
        let store = MemoryStore::new();
        let driver_id = seed(&store, 1.0, VehicleClass::Economy);

        assert!(tokio_test::block_on(store.try_assign(driver_id, Uuid::new_v4())).unwrap());

        let nearby = tokio_test::block_on(store.find_nearby(PICKUP, 15.0, DriverFilter::default()))
            .unwrap();
        assert!(nearby.is_empty());
    }

    #[test]
    fn try_assign_is_exclusive() {
        let store = MemoryStore::new();
        let driver_id = seed(&store, 1.0, VehicleClass::Economy);
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(tokio_test::block_on(store.try_assign(driver_id, first)).unwrap());
        assert!(!tokio_test::block_on(store.try_assign(driver_id, second)).unwrap());
        assert!(!tokio_test::block_on(store.release(driver_id, second)).unwrap());
        assert!(tokio_test::block_on(store.release(driver_id, first)).unwrap());
        assert!(tokio_test::block_on(store.try_assign(driver_id, second)).unwrap());
    }

    #[test]
    fn compare_and_set_checks_expected_status() {
        let store = MemoryStore::new();
        let ride = Ride::new(PICKUP, offset_north(PICKUP, 5.0), 1500.0, Utc::now()).unwrap();
        tokio_test::block_on(store.insert_ride(&ride)).unwrap();

        let swapped = tokio_test::block_on(store.compare_and_set_status(
            ride.id,
            RideStatus::Searching,
            RideStatus::Broadcasting,
            None,
        ))
        .unwrap();
        assert!(!swapped);

        let swapped = tokio_test::block_on(store.compare_and_set_status(
            ride.id,
            RideStatus::Requested,
            RideStatus::Searching,
            None,
        ))
        .unwrap();
        assert!(swapped);

        let stored = tokio_test::block_on(store.get(ride.id)).unwrap().unwrap();
        assert_eq!(stored.status, RideStatus::Searching);
    }

    #[test]
    fn compare_and_set_enforces_driver_invariant() {
        let store = MemoryStore::new();
        let ride = Ride::new(PICKUP, offset_north(PICKUP, 5.0), 1500.0, Utc::now()).unwrap();
        tokio_test::block_on(store.insert_ride(&ride)).unwrap();
        tokio_test::block_on(store.compare_and_set_status(
            ride.id,
            RideStatus::Requested,
            RideStatus::Searching,
            None,
        ))
        .unwrap();

        let err = tokio_test::block_on(store.compare_and_set_status(
            ride.id,
            RideStatus::Searching,
            RideStatus::DriverAssigned,
            None,
        ))
        .unwrap_err();

        assert!(err.is_invalid_state());
    }
}
