#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use dispatch::clock::{Clock, ManualClock};
use dispatch::config::{Config, DispatchMode};
use dispatch::engine::{Dependencies, Engine, ManualScheduler};
use dispatch::entities::{
    Coordinates, DriverLocation, DriverSnapshot, DriverStats, Ride, VehicleClass,
};
use dispatch::external::{Notifier, RecordingAuditSink};
use dispatch::geometry::offset_north;
use dispatch::error::Error;
use dispatch::store::{DriverDirectory, DriverFilter, FleetRegistry, MemoryStore, RideStore};
use uuid::Uuid;

pub const PICKUP: Coordinates = Coordinates {
    lat: 6.5244,
    lng: 3.3792,
};

pub fn config(mode: DispatchMode) -> Config {
    Config {
        dispatch_mode: mode,
        reallocation_mode: mode,
        broadcast_fanout: 3,
        offer_ttl: Duration::seconds(30),
        max_reallocation_cycles: 2,
        ..Config::default()
    }
}

/// Collaborators to put in front of the shared memory store.
#[derive(Default)]
pub struct Overrides {
    pub rides: Option<Arc<dyn RideStore>>,
    pub drivers: Option<Arc<dyn DriverDirectory>>,
    pub notifier: Option<Arc<dyn Notifier>>,
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub scheduler: Arc<ManualScheduler>,
    pub audit: Arc<RecordingAuditSink>,
    pub engine: Arc<Engine>,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        Self::build(config, |_, _| Overrides::default())
    }

    pub fn with_notifier(config: Config, notifier: Arc<dyn Notifier>) -> Self {
        Self::build(config, |_, _| Overrides {
            notifier: Some(notifier),
            ..Overrides::default()
        })
    }

    pub fn build(
        config: Config,
        overrides: impl FnOnce(&Arc<MemoryStore>, &Arc<ManualClock>) -> Overrides,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()));
        let scheduler = Arc::new(ManualScheduler::new());
        let audit = Arc::new(RecordingAuditSink::new());

        let mut deps = Dependencies::new(store.clone(), scheduler.clone())
            .with_clock(clock.clone())
            .with_audit(audit.clone());

        let overrides = overrides(&store, &clock);
        if let Some(rides) = overrides.rides {
            deps.rides = rides;
        }
        if let Some(drivers) = overrides.drivers {
            deps.drivers = drivers;
        }
        if let Some(notifier) = overrides.notifier {
            deps = deps.with_notifier(notifier);
        }

        let engine = Arc::new(Engine::new(config, deps).unwrap());

        Self {
            store,
            clock,
            scheduler,
            audit,
            engine,
        }
    }

    /// An online, verified economy driver `km` north of the pickup with a
    /// fresh location fix.
    pub async fn driver_at(&self, km: f64) -> Uuid {
        self.driver_with(km, DriverStats {
            average_rating: Some(4.5),
            total_rides: 100,
            completed_rides: 90,
            acceptance_rate: Some(0.9),
        })
        .await
    }

    pub async fn driver_with(&self, km: f64, stats: DriverStats) -> Uuid {
        let mut driver = DriverSnapshot::new(Uuid::new_v4(), VehicleClass::Economy);
        driver.verify();
        driver.start().unwrap();

        self.store.upsert_driver(&driver, &stats).await.unwrap();
        self.locate(driver.id, km).await;

        driver.id
    }

    pub async fn locate(&self, driver_id: Uuid, km: f64) {
        let location = DriverLocation::new(offset_north(PICKUP, km), self.clock.now());
        self.store.update_location(driver_id, &location).await.unwrap();
    }

    pub async fn ride(&self) -> Uuid {
        let ride = Ride::new(
            PICKUP,
            offset_north(PICKUP, -5.0),
            2400.0,
            self.clock.now(),
        )
        .unwrap();

        self.store.insert_ride(&ride).await.unwrap();

        ride.id
    }

    pub async fn ride_state(&self, ride_id: Uuid) -> Ride {
        self.store.get(ride_id).await.unwrap().unwrap()
    }

    pub async fn driver_state(&self, driver_id: Uuid) -> DriverSnapshot {
        self.store.get_driver(driver_id).await.unwrap().unwrap()
    }
}

/// Driver directory whose listed drivers always lose the reserve, as if
/// another allocation had claimed them between search and reserve.
pub struct ContestedDrivers {
    inner: Arc<MemoryStore>,
    contested: Mutex<Vec<Uuid>>,
}

impl ContestedDrivers {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            contested: Mutex::new(vec![]),
        }
    }

    pub fn contest(&self, driver_id: Uuid) {
        self.contested.lock().unwrap().push(driver_id);
    }
}

#[async_trait]
impl DriverDirectory for ContestedDrivers {
    async fn find_nearby(
        &self,
        point: Coordinates,
        radius_km: f64,
        filter: DriverFilter,
    ) -> Result<Vec<DriverSnapshot>, Error> {
        self.inner.find_nearby(point, radius_km, filter).await
    }

    async fn get_driver(&self, driver_id: Uuid) -> Result<Option<DriverSnapshot>, Error> {
        self.inner.get_driver(driver_id).await
    }

    async fn get_stats(&self, driver_id: Uuid) -> Result<DriverStats, Error> {
        self.inner.get_stats(driver_id).await
    }

    async fn try_assign(&self, driver_id: Uuid, ride_id: Uuid) -> Result<bool, Error> {
        if self.contested.lock().unwrap().contains(&driver_id) {
            return Ok(false);
        }

        self.inner.try_assign(driver_id, ride_id).await
    }

    async fn release(&self, driver_id: Uuid, ride_id: Uuid) -> Result<bool, Error> {
        self.inner.release(driver_id, ride_id).await
    }
}
