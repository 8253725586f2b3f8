use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::scoring::ScoredCandidate;

#[derive(Clone, Debug)]
struct CachedScore {
    candidate: ScoredCandidate,
    location_at: DateTime<Utc>,
    scored_at: DateTime<Utc>,
}

/// Short-lived memo of (ride, driver) scores. An entry is only reused while it
/// is younger than the TTL and was computed from the same location fix.
#[derive(Debug)]
pub struct ScoreCache {
    ttl: Duration,
    entries: DashMap<(Uuid, Uuid), CachedScore>,
}

impl ScoreCache {
    /// A zero TTL disables caching.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.ttl > Duration::zero()
    }

    pub fn get(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
        location_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<ScoredCandidate> {
        if !self.is_enabled() {
            return None;
        }

        let entry = self.entries.get(&(ride_id, driver_id))?;

        if entry.location_at != location_at || now - entry.scored_at >= self.ttl {
            return None;
        }

        Some(entry.candidate.clone())
    }

    pub fn insert(
        &self,
        ride_id: Uuid,
        candidate: &ScoredCandidate,
        location_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        if !self.is_enabled() {
            return;
        }

        self.entries.insert(
            (ride_id, candidate.driver_id),
            CachedScore {
                candidate: candidate.clone(),
                location_at,
                scored_at: now,
            },
        );
    }

    pub fn forget_ride(&self, ride_id: Uuid) {
        self.entries.retain(|(ride, _), _| *ride != ride_id);
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| now - entry.scored_at < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
