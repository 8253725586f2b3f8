use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{invalid_invocation_error, Error};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverSnapshot {
    pub id: Uuid,
    pub status: Status,
    pub verified: bool,
    pub vehicle_class: VehicleClass,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Status {
    Offline,
    Available,
    Assigned { ride_id: Uuid },
}

impl Status {
    pub fn name(&self) -> String {
        match self {
            Self::Offline => "offline".into(),
            Self::Available => "available".into(),
            Self::Assigned { ride_id: _ } => "assigned".into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Economy,
    Comfort,
    Premium,
}

impl VehicleClass {
    /// A higher class can always serve a request for a lower one.
    pub fn satisfies(&self, required: Option<VehicleClass>) -> bool {
        match required {
            Some(required) => *self >= required,
            None => true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Availability {
    Free,
    Busy,
    Offline,
}

/// Rolling history, read-only from the allocator's point of view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverStats {
    pub average_rating: Option<f64>,
    pub total_rides: u32,
    pub completed_rides: u32,
    pub acceptance_rate: Option<f64>,
}

impl DriverSnapshot {
    pub fn new(id: Uuid, vehicle_class: VehicleClass) -> Self {
        Self {
            id,
            status: Status::Offline,
            verified: false,
            vehicle_class,
        }
    }

    pub fn is_online(&self) -> bool {
        !matches!(self.status, Status::Offline)
    }

    pub fn is_free(&self) -> bool {
        matches!(self.status, Status::Available)
    }

    pub fn assigned_ride_id(&self) -> Option<Uuid> {
        match self.status {
            Status::Assigned { ride_id } => Some(ride_id),
            _ => None,
        }
    }

    pub fn availability(&self) -> Availability {
        match self.status {
            Status::Available => Availability::Free,
            Status::Assigned { ride_id: _ } => Availability::Busy,
            Status::Offline => Availability::Offline,
        }
    }

    /// Whether the candidate finder may offer this driver a ride at all.
    pub fn is_dispatchable(&self) -> bool {
        self.verified && self.is_free()
    }

    pub fn verify(&mut self) {
        self.verified = true;
    }

    /// Claims the driver for `ride_id`; false when the driver is not free.
    #[tracing::instrument(skip(self), fields(driver_id = %self.id))]
    pub fn assign(&mut self, ride_id: Uuid) -> bool {
        match self.status {
            Status::Available => {
                self.status = Status::Assigned { ride_id };
                true
            }
            _ => false,
        }
    }

    /// Returns the driver to the free pool if it is held by `ride_id`.
    #[tracing::instrument(skip(self), fields(driver_id = %self.id))]
    pub fn free(&mut self, ride_id: Uuid) -> bool {
        match self.status {
            Status::Assigned { ride_id: held } if held == ride_id => {
                self.status = Status::Available;
                true
            }
            _ => false,
        }
    }

    pub fn start(&mut self) -> Result<(), Error> {
        match self.status {
            Status::Offline => {
                self.status = Status::Available;
            }
            _ => (),
        };

        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), Error> {
        match self.status {
            Status::Available | Status::Offline => {
                self.status = Status::Offline;
                Ok(())
            }
            _ => Err(invalid_invocation_error()),
        }
    }
}
