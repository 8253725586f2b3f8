use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Coordinates, VehicleClass};
use crate::error::{invalid_input, invalid_state_error, Error};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub status: Status,
    pub pickup: Coordinates,
    pub dropoff: Coordinates,
    pub estimated_fare: f64,
    /// Minimum vehicle class the rider asked for, if any.
    pub vehicle_class: Option<VehicleClass>,
    pub created_at: DateTime<Utc>,
    pub driver_id: Option<Uuid>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Requested,
    Searching,
    Broadcasting,
    DriverAssigned,
    DriverArrived,
    InProgress,
    Completed,
    Cancelled,
}

impl Status {
    pub fn name(&self) -> String {
        match self {
            Self::Requested => "requested".into(),
            Self::Searching => "searching".into(),
            Self::Broadcasting => "broadcasting".into(),
            Self::DriverAssigned => "driver_assigned".into(),
            Self::DriverArrived => "driver_arrived".into(),
            Self::InProgress => "in_progress".into(),
            Self::Completed => "completed".into(),
            Self::Cancelled => "cancelled".into(),
        }
    }

    pub fn from_name(name: &str) -> Result<Self, Error> {
        match name {
            "requested" => Ok(Self::Requested),
            "searching" => Ok(Self::Searching),
            "broadcasting" => Ok(Self::Broadcasting),
            "driver_assigned" => Ok(Self::DriverAssigned),
            "driver_arrived" => Ok(Self::DriverArrived),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(invalid_input(format!("unknown ride status {:?}", other))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Still looking for a driver; the only states an offer response can act on.
    pub fn is_matching(&self) -> bool {
        matches!(self, Self::Searching | Self::Broadcasting)
    }

    /// States in which the ride must carry a driver.
    pub fn holds_driver(&self) -> bool {
        matches!(
            self,
            Self::DriverAssigned | Self::DriverArrived | Self::InProgress
        )
    }

    pub fn can_transition_to(&self, next: Status) -> bool {
        use Status::*;

        match (self, next) {
            (Requested, Searching) => true,
            (Searching, Broadcasting) | (Searching, DriverAssigned) => true,
            (Broadcasting, Searching) | (Broadcasting, DriverAssigned) => true,
            (DriverAssigned, DriverArrived) | (DriverAssigned, Searching) => true,
            (DriverArrived, InProgress) | (DriverArrived, Searching) => true,
            (InProgress, Completed) => true,
            (current, Cancelled) => !current.is_terminal() && *current != InProgress,
            _ => false,
        }
    }
}

impl Ride {
    pub fn new(
        pickup: Coordinates,
        dropoff: Coordinates,
        estimated_fare: f64,
        created_at: DateTime<Utc>,
    ) -> Result<Self, Error> {
        pickup.validate()?;
        dropoff.validate()?;

        if !estimated_fare.is_finite() || estimated_fare < 0.0 {
            return Err(invalid_input("estimated fare must be a non-negative number"));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            status: Status::Requested,
            pickup,
            dropoff,
            estimated_fare,
            vehicle_class: None,
            created_at,
            driver_id: None,
        })
    }

    pub fn with_vehicle_class(mut self, vehicle_class: VehicleClass) -> Self {
        self.vehicle_class = Some(vehicle_class);
        self
    }

    pub fn is_matching(&self) -> bool {
        self.status.is_matching()
    }

    /// Moves the ride to `next`, enforcing the transition table and the rule
    /// that a driver is attached exactly while the ride holds one.
    #[tracing::instrument(skip(self), fields(ride_id = %self.id, from = ?self.status))]
    pub fn apply(&mut self, next: Status, driver_id: Option<Uuid>) -> Result<(), Error> {
        if !self.status.can_transition_to(next) {
            return Err(invalid_state_error());
        }

        if next.holds_driver() != driver_id.is_some() {
            return Err(invalid_state_error());
        }

        self.status = next;
        self.driver_id = driver_id;

        Ok(())
    }
}
