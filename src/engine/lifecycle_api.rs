use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use super::{Engine, MAX_SWAP_ATTEMPTS};
use crate::{
    api::{Allocation, ReallocationReason, RideLifecycleAPI},
    entities::{Ride, RideStatus},
    error::{invalid_invocation_error, invalid_state_error, Error},
    external::AuditEvent,
};

#[async_trait]
impl RideLifecycleAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn mark_arrived(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error> {
        self.advance(
            ride_id,
            driver_id,
            RideStatus::DriverAssigned,
            RideStatus::DriverArrived,
            AuditEvent::DriverArrived,
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn start_ride(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error> {
        self.advance(
            ride_id,
            driver_id,
            RideStatus::DriverArrived,
            RideStatus::InProgress,
            AuditEvent::RideStarted,
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn complete_ride(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error> {
        let ride = self
            .advance(
                ride_id,
                driver_id,
                RideStatus::InProgress,
                RideStatus::Completed,
                AuditEvent::Completed,
            )
            .await?;

        self.drivers.release(driver_id, ride_id).await?;
        self.forget(ride_id);

        Ok(ride)
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_ride(&self, ride_id: Uuid) -> Result<Ride, Error> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let ride = self.load_ride(ride_id).await?;

            if ride.status == RideStatus::Cancelled {
                return Ok(ride);
            }

            if !ride.status.can_transition_to(RideStatus::Cancelled) {
                return Err(invalid_state_error());
            }

            let swapped = self
                .rides
                .compare_and_set_status(ride_id, ride.status, RideStatus::Cancelled, None)
                .await?;

            if !swapped {
                continue;
            }

            self.offers.withdraw(ride_id);

            if let Some(driver_id) = ride.driver_id {
                self.drivers.release(driver_id, ride_id).await?;
            }

            self.forget(ride_id);

            tracing::info!(from = ?ride.status, "ride cancelled");

            self.record(
                ride_id,
                AuditEvent::Cancelled,
                json!({ "from": ride.status, "driver_id": ride.driver_id }),
            );

            return self.load_ride(ride_id).await;
        }

        Err(invalid_state_error())
    }

    #[tracing::instrument(skip(self))]
    async fn release_driver(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Allocation, Error> {
        let ride = self.load_ride(ride_id).await?;

        if ride.driver_id != Some(driver_id) {
            return Err(invalid_invocation_error());
        }

        if !matches!(
            ride.status,
            RideStatus::DriverAssigned | RideStatus::DriverArrived
        ) {
            return Err(invalid_state_error());
        }

        self.reallocate_excluding(ride_id, ReallocationReason::DriverReleased, vec![driver_id])
            .await
    }
}

impl Engine {
    /// Moves a ride held by `driver_id` from `from` to `to`. The driver stays
    /// attached unless `to` no longer holds one.
    async fn advance(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
        from: RideStatus,
        to: RideStatus,
        event: AuditEvent,
    ) -> Result<Ride, Error> {
        let ride = self.load_ride(ride_id).await?;

        if ride.driver_id != Some(driver_id) {
            return Err(invalid_invocation_error());
        }

        let keep = if to.holds_driver() { Some(driver_id) } else { None };

        if !self
            .rides
            .compare_and_set_status(ride_id, from, to, keep)
            .await?
        {
            return Err(invalid_state_error());
        }

        tracing::info!(?from, ?to, "ride advanced");

        self.record(ride_id, event, json!({ "driver_id": driver_id }));

        self.load_ride(ride_id).await
    }
}
