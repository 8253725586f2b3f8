//! Narrow store contracts the allocator depends on, plus the in-memory and
//! Postgres adapters that implement them.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    entities::{
        Coordinates, DriverLocation, DriverSnapshot, DriverStats, Ride, RideStatus, VehicleClass,
    },
    error::Error,
};

#[async_trait]
pub trait RideStore: Send + Sync {
    async fn get(&self, ride_id: Uuid) -> Result<Option<Ride>, Error>;

    /// Moves the ride to `new_status` with `driver_id` attached only if it is
    /// currently in `expected_status`. Returns whether the swap happened.
    async fn compare_and_set_status(
        &self,
        ride_id: Uuid,
        expected_status: RideStatus,
        new_status: RideStatus,
        driver_id: Option<Uuid>,
    ) -> Result<bool, Error>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriverFilter {
    pub vehicle_class: Option<VehicleClass>,
}

impl DriverFilter {
    pub fn matches(&self, driver: &DriverSnapshot) -> bool {
        driver.vehicle_class.satisfies(self.vehicle_class)
    }
}

#[async_trait]
pub trait DriverDirectory: Send + Sync {
    /// Online, verified, unassigned drivers whose last known position lies
    /// within `radius_km` of `point`.
    async fn find_nearby(
        &self,
        point: Coordinates,
        radius_km: f64,
        filter: DriverFilter,
    ) -> Result<Vec<DriverSnapshot>, Error>;

    async fn get_driver(&self, driver_id: Uuid) -> Result<Option<DriverSnapshot>, Error>;

    async fn get_stats(&self, driver_id: Uuid) -> Result<DriverStats, Error>;

    /// Points the driver at `ride_id` only if they hold no ride. Returns
    /// whether the driver was claimed.
    async fn try_assign(&self, driver_id: Uuid, ride_id: Uuid) -> Result<bool, Error>;

    /// Returns the driver to the free pool if they are held by `ride_id`.
    async fn release(&self, driver_id: Uuid, ride_id: Uuid) -> Result<bool, Error>;
}

#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn get_current_location(&self, driver_id: Uuid)
        -> Result<Option<DriverLocation>, Error>;
}

/// Write side used to seed and feed the stores; the allocator never calls it.
#[async_trait]
pub trait FleetRegistry: Send + Sync {
    async fn insert_ride(&self, ride: &Ride) -> Result<(), Error>;

    async fn upsert_driver(&self, driver: &DriverSnapshot, stats: &DriverStats)
        -> Result<(), Error>;

    async fn update_location(
        &self,
        driver_id: Uuid,
        location: &DriverLocation,
    ) -> Result<(), Error>;
}

pub trait Store: RideStore + DriverDirectory + LocationStore + FleetRegistry {}

impl<T> Store for T where T: RideStore + DriverDirectory + LocationStore + FleetRegistry {}
