use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{OptimizedRoute, Ride, RideStatus};
use crate::error::{invalid_input, Error};
use crate::routing::RideSuggestion;
use crate::scoring::ScoredCandidate;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverResponse {
    Accept,
    Reject,
}

impl FromStr for DriverResponse {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept" => Ok(Self::Accept),
            "reject" => Ok(Self::Reject),
            other => Err(invalid_input(format!("invalid response {:?}", other))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReallocationReason {
    AllRejected,
    OfferExpired,
    DriverReleased,
    Requested,
}

/// What an allocation step did with the ride.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Allocation {
    Assigned {
        driver_id: Uuid,
        score: f64,
    },
    Broadcast {
        candidates: Vec<Uuid>,
        expires_at: DateTime<Utc>,
    },
    /// The ride left the matching states before anything could be done.
    Inactive { status: RideStatus },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ResponseOutcome {
    Accepted { driver_id: Uuid },
    Rejected { remaining: usize },
    Reallocated(Allocation),
    /// Late, duplicate or otherwise moot; nothing changed.
    Discarded,
}

#[async_trait]
pub trait AllocationAPI {
    /// Starts matching a requested ride using the configured dispatch mode.
    async fn allocate(&self, ride_id: Uuid) -> Result<Allocation, Error>;

    async fn allocate_direct(&self, ride_id: Uuid) -> Result<Allocation, Error>;

    async fn broadcast(&self, ride_id: Uuid) -> Result<Allocation, Error>;

    async fn handle_response(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
        response: DriverResponse,
    ) -> Result<ResponseOutcome, Error>;

    async fn reallocate(
        &self,
        ride_id: Uuid,
        reason: ReallocationReason,
    ) -> Result<Allocation, Error>;

    /// Returns `None` when no expired offer was outstanding for the ride.
    async fn expire_offer(&self, ride_id: Uuid) -> Result<Option<Allocation>, Error>;

    async fn rank_candidates(
        &self,
        ride_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ScoredCandidate>, Error>;
}

#[async_trait]
pub trait RideLifecycleAPI {
    async fn mark_arrived(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error>;

    async fn start_ride(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error>;

    async fn complete_ride(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, Error>;

    async fn cancel_ride(&self, ride_id: Uuid) -> Result<Ride, Error>;

    /// The assigned driver backs out before the trip starts.
    async fn release_driver(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Allocation, Error>;
}

#[async_trait]
pub trait RouteAPI {
    async fn plan_route(
        &self,
        driver_id: Uuid,
        ride_ids: Vec<Uuid>,
    ) -> Result<OptimizedRoute, Error>;

    async fn suggest_rides(
        &self,
        driver_id: Uuid,
        ride_ids: Vec<Uuid>,
    ) -> Result<Vec<RideSuggestion>, Error>;

    /// Order in which to collect the rides, pickups only.
    async fn pickup_order(&self, driver_id: Uuid, ride_ids: Vec<Uuid>)
        -> Result<Vec<Uuid>, Error>;
}

pub trait API: AllocationAPI + RideLifecycleAPI + RouteAPI {}
