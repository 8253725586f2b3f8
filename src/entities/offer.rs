use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// A broadcast ride offer awaiting driver responses. Lives only in the offer
/// book; never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct AllocationOffer {
    pub ride_id: Uuid,
    /// Best-ranked first; only drivers that have not answered yet.
    pub candidates: Vec<Uuid>,
    pub declined: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    pub consumed: bool,
}

impl AllocationOffer {
    pub fn new(ride_id: Uuid, candidates: Vec<Uuid>, created_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            ride_id,
            candidates,
            declined: vec![],
            created_at,
            ttl,
            consumed: false,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + self.ttl
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn contains(&self, driver_id: Uuid) -> bool {
        self.candidates.contains(&driver_id)
    }

    /// Moves a candidate to the declined list; returns whether it was present.
    pub fn remove_candidate(&mut self, driver_id: Uuid) -> bool {
        let before = self.candidates.len();
        self.candidates.retain(|id| *id != driver_id);

        if self.candidates.len() == before {
            return false;
        }

        self.declined.push(driver_id);
        true
    }

    /// Every driver this offer went to, answered or not.
    pub fn offered(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.declined.iter().chain(self.candidates.iter()).copied()
    }

    pub fn consume(&mut self) -> bool {
        !std::mem::replace(&mut self.consumed, true)
    }
}
