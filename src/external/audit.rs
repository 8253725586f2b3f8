use std::sync::Mutex;

use uuid::Uuid;

use super::{AuditEvent, AuditSink};
use crate::error::Error;

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn append(
        &self,
        ride_id: Uuid,
        event: AuditEvent,
        payload: serde_json::Value,
    ) -> Result<(), Error> {
        tracing::info!(%ride_id, event = event.name(), %payload, "audit");

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AuditRecord {
    pub ride_id: Uuid,
    pub event: AuditEvent,
    pub payload: serde_json::Value,
}

/// Keeps every appended event in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn events_for(&self, ride_id: Uuid) -> Vec<AuditEvent> {
        self.records()
            .into_iter()
            .filter(|record| record.ride_id == ride_id)
            .map(|record| record.event)
            .collect()
    }

    pub fn count(&self, event: AuditEvent) -> usize {
        self.records()
            .iter()
            .filter(|record| record.event == event)
            .count()
    }
}

impl AuditSink for RecordingAuditSink {
    fn append(
        &self,
        ride_id: Uuid,
        event: AuditEvent,
        payload: serde_json::Value,
    ) -> Result<(), Error> {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        records.push(AuditRecord {
            ride_id,
            event,
            payload,
        });

        Ok(())
    }
}
