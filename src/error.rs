use std::env;
use std::fmt::Debug;

use uuid::Uuid;

pub const ENV_VAR_ERROR: i32 = 1;
pub const DATABASE_ERROR: i32 = 2;
pub const SERIALIZATION_ERROR: i32 = 3;
pub const DELIVERY_ERROR: i32 = 4;
pub const UNEXPECTED_ERROR: i32 = 5;

pub const INVALID_STATE_ERROR: i32 = 100;
pub const INVALID_INPUT_ERROR: i32 = 101;

pub const NO_DRIVERS_AVAILABLE_ERROR: i32 = 200;
pub const STALE_ASSIGNMENT_ERROR: i32 = 201;
pub const LOCATION_UNAVAILABLE_ERROR: i32 = 202;
pub const OFFER_EXPIRED_ERROR: i32 = 203;
pub const ALLOCATION_FAILED_ERROR: i32 = 204;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct Error {
    pub code: i32,
    pub message: String,
}

impl Error {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Infrastructure faults, as opposed to caller or allocation outcomes.
    pub fn is_internal(&self) -> bool {
        (1..=99).contains(&self.code)
    }

    pub fn is_invalid_state(&self) -> bool {
        self.code == INVALID_STATE_ERROR
    }

    pub fn is_invalid_input(&self) -> bool {
        self.code == INVALID_INPUT_ERROR
    }

    pub fn is_no_drivers_available(&self) -> bool {
        self.code == NO_DRIVERS_AVAILABLE_ERROR
    }

    pub fn is_stale_assignment(&self) -> bool {
        self.code == STALE_ASSIGNMENT_ERROR
    }

    pub fn is_allocation_failed(&self) -> bool {
        self.code == ALLOCATION_FAILED_ERROR
    }
}

impl From<env::VarError> for Error {
    fn from(err: env::VarError) -> Self {
        env_var_error(err)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        database_error(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(SERIALIZATION_ERROR, format!("serialization error: {}", err))
    }
}

pub fn invalid_state_error() -> Error {
    Error::new(INVALID_STATE_ERROR, "invalid state")
}

/// An operation was invoked on an entity whose state does not permit it.
pub fn invalid_invocation_error() -> Error {
    Error::new(INVALID_STATE_ERROR, "invalid invocation")
}

pub fn invalid_input(reason: impl Into<String>) -> Error {
    Error::new(INVALID_INPUT_ERROR, format!("invalid input: {}", reason.into()))
}

pub fn env_var_error(err: env::VarError) -> Error {
    Error::new(ENV_VAR_ERROR, format!("environment variable error: {}", err))
}

pub fn database_error<T: Debug>(err: T) -> Error {
    Error::new(DATABASE_ERROR, format!("database error: {:?}", err))
}

pub fn delivery_error(reason: impl Into<String>) -> Error {
    Error::new(DELIVERY_ERROR, format!("delivery error: {}", reason.into()))
}

pub fn unexpected_error() -> Error {
    Error::new(UNEXPECTED_ERROR, "unexpected error")
}

pub fn no_drivers_available_error(ride_id: Uuid) -> Error {
    Error::new(
        NO_DRIVERS_AVAILABLE_ERROR,
        format!("no drivers available for ride {}", ride_id),
    )
}

pub fn stale_assignment_error(ride_id: Uuid) -> Error {
    Error::new(
        STALE_ASSIGNMENT_ERROR,
        format!("assignment for ride {} is stale", ride_id),
    )
}

pub fn location_unavailable_error(driver_id: Uuid) -> Error {
    Error::new(
        LOCATION_UNAVAILABLE_ERROR,
        format!("no current location for driver {}", driver_id),
    )
}

pub fn offer_expired_error(ride_id: Uuid) -> Error {
    Error::new(
        OFFER_EXPIRED_ERROR,
        format!("offer for ride {} expired", ride_id),
    )
}

pub fn allocation_failed_error(ride_id: Uuid, cycles: u32) -> Error {
    Error::new(
        ALLOCATION_FAILED_ERROR,
        format!(
            "allocation for ride {} failed after {} reallocation cycles",
            ride_id, cycles
        ),
    )
}
