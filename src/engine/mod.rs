mod allocation_api;
mod candidates;
mod lifecycle_api;
mod offers;
mod route_api;
mod score_cache;
mod timer;

pub use offers::{AcceptCheck, Decline, OfferBook};
pub use score_cache::ScoreCache;
pub use timer::{ExpiryScheduler, ManualScheduler, TimerScheduler};

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    api::API,
    clock::{Clock, SystemClock},
    config::Config,
    entities::{AllocationOffer, Ride, RideStatus},
    error::{invalid_input, Error},
    external::{AuditEvent, AuditSink, Notifier, OfferNotice, TracingAuditSink, TracingNotifier},
    routing::RouteSequencer,
    scoring::Scorer,
    store::{DriverDirectory, LocationStore, RideStore, Store},
};

/// Collaborators the engine is built from.
#[derive(Clone)]
pub struct Dependencies {
    pub rides: Arc<dyn RideStore>,
    pub drivers: Arc<dyn DriverDirectory>,
    pub locations: Arc<dyn LocationStore>,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<dyn AuditSink>,
    pub scheduler: Arc<dyn ExpiryScheduler>,
    pub clock: Arc<dyn Clock>,
}

impl Dependencies {
    /// Wires every store contract to `store`; notifications and audit events
    /// go to the log until replaced.
    pub fn new<S: Store + 'static>(store: Arc<S>, scheduler: Arc<dyn ExpiryScheduler>) -> Self {
        Self {
            rides: store.clone(),
            drivers: store.clone(),
            locations: store,
            notifier: Arc::new(TracingNotifier),
            audit: Arc::new(TracingAuditSink),
            scheduler,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Per-ride matching state that outlives a single offer.
#[derive(Debug, Default)]
struct AllocationCycle {
    reallocations: u32,
    /// Drivers that declined, timed out or backed out of this ride.
    excluded: HashSet<Uuid>,
}

enum Reservation {
    Reserved,
    DriverUnavailable,
    RideChanged,
}

/// The allocation coordinator: the only writer of ride status and driver
/// assignment.
pub struct Engine {
    config: Config,
    scorer: Scorer,
    sequencer: RouteSequencer,
    rides: Arc<dyn RideStore>,
    drivers: Arc<dyn DriverDirectory>,
    locations: Arc<dyn LocationStore>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    scheduler: Arc<dyn ExpiryScheduler>,
    clock: Arc<dyn Clock>,
    offers: OfferBook,
    scores: ScoreCache,
    cycles: DashMap<Uuid, Arc<Mutex<AllocationCycle>>>,
}

/// Retries for a compare-and-set that keeps losing to concurrent writers.
const MAX_SWAP_ATTEMPTS: usize = 3;

impl Engine {
    #[tracing::instrument(name = "Engine::new", skip_all)]
    pub fn new(config: Config, deps: Dependencies) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            scorer: Scorer::new(
                config.max_search_radius_km,
                config.reference_fare,
                config.average_speed_kmh,
            ),
            sequencer: RouteSequencer::new(config.average_speed_kmh),
            scores: ScoreCache::new(config.score_cache_ttl),
            offers: OfferBook::new(),
            cycles: DashMap::new(),
            rides: deps.rides,
            drivers: deps.drivers,
            locations: deps.locations,
            notifier: deps.notifier,
            audit: deps.audit,
            scheduler: deps.scheduler,
            clock: deps.clock,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The outstanding broadcast offer for a ride, if any.
    pub fn offer(&self, ride_id: Uuid) -> Option<AllocationOffer> {
        self.offers.get(ride_id)
    }

    pub fn pending_offers(&self) -> usize {
        self.offers.len()
    }

    /// Scores currently held by the cache, across all rides.
    pub fn cached_scores(&self) -> usize {
        self.scores.len()
    }

    /// Drivers that will not be offered this ride again.
    pub async fn excluded_drivers(&self, ride_id: Uuid) -> HashSet<Uuid> {
        match self.cycles.get(&ride_id).map(|cycle| cycle.clone()) {
            Some(cycle) => cycle.lock().await.excluded.clone(),
            None => HashSet::new(),
        }
    }

    fn cycle(&self, ride_id: Uuid) -> Arc<Mutex<AllocationCycle>> {
        self.cycles.entry(ride_id).or_default().clone()
    }

    fn forget(&self, ride_id: Uuid) {
        self.offers.withdraw(ride_id);
        self.scores.forget_ride(ride_id);
        self.cycles.remove(&ride_id);
    }

    async fn load_ride(&self, ride_id: Uuid) -> Result<Ride, Error> {
        self.rides
            .get(ride_id)
            .await?
            .ok_or_else(|| invalid_input(format!("unknown ride {}", ride_id)))
    }

    fn record(&self, ride_id: Uuid, event: AuditEvent, payload: serde_json::Value) {
        if let Err(err) = self.audit.append(ride_id, event, payload) {
            tracing::warn!(%ride_id, event = event.name(), %err, "audit append failed");
        }
    }

    fn notify(&self, notice: OfferNotice) {
        let (driver_id, ride_id) = (notice.driver_id, notice.ride_id);

        if let Err(err) = self.notifier.send_offer(notice) {
            tracing::warn!(%driver_id, %ride_id, %err, "notification failed");
        }
    }

    /// Binds `driver_id` to the ride: the driver pointer is claimed first, then
    /// the ride is swapped out of `expected`. A lost ride swap hands the driver
    /// back.
    #[tracing::instrument(skip(self))]
    async fn reserve(
        &self,
        ride_id: Uuid,
        expected: RideStatus,
        driver_id: Uuid,
    ) -> Result<Reservation, Error> {
        if !self.drivers.try_assign(driver_id, ride_id).await? {
            return Ok(Reservation::DriverUnavailable);
        }

        let swapped = self
            .rides
            .compare_and_set_status(ride_id, expected, RideStatus::DriverAssigned, Some(driver_id))
            .await;

        match swapped {
            Ok(true) => Ok(Reservation::Reserved),
            Ok(false) => {
                self.drivers.release(driver_id, ride_id).await?;
                Ok(Reservation::RideChanged)
            }
            Err(err) => {
                if let Err(release_err) = self.drivers.release(driver_id, ride_id).await {
                    tracing::error!(%driver_id, %release_err, "could not roll back driver claim");
                }
                Err(err)
            }
        }
    }
}

impl API for Engine {}
