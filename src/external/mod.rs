//! Outbound collaborators: offer notifications and the history/audit sink.
//!
//! Both are enqueue-only. The engine logs and swallows their failures; a
//! notification or audit problem never changes an allocation outcome.

mod audit;
mod notifier;

pub use audit::{AuditRecord, RecordingAuditSink, TracingAuditSink};
pub use notifier::{ChannelNotifier, TracingNotifier};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// The driver is one of several candidates and may accept or reject.
    Offer,
    /// The driver has been bound to the ride directly.
    Assignment,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OfferNotice {
    pub kind: NoticeKind,
    pub driver_id: Uuid,
    pub ride_id: Uuid,
    pub eta_minutes: u32,
}

pub trait Notifier: Send + Sync {
    /// Queues the notice for delivery; must not wait on the transport.
    fn send_offer(&self, notice: OfferNotice) -> Result<(), Error>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    SearchStarted,
    Broadcast,
    Assigned,
    Rejected,
    OfferExpired,
    Reallocated,
    AllocationFailed,
    DriverArrived,
    RideStarted,
    Completed,
    Cancelled,
}

impl AuditEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SearchStarted => "search_started",
            Self::Broadcast => "broadcast",
            Self::Assigned => "assigned",
            Self::Rejected => "rejected",
            Self::OfferExpired => "offer_expired",
            Self::Reallocated => "reallocated",
            Self::AllocationFailed => "allocation_failed",
            Self::DriverArrived => "driver_arrived",
            Self::RideStarted => "ride_started",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn append(
        &self,
        ride_id: Uuid,
        event: AuditEvent,
        payload: serde_json::Value,
    ) -> Result<(), Error>;
}
