use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use chrono::{Duration, Utc};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Binomial, Distribution, Normal, Uniform};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::{AllocationAPI, DriverResponse, ResponseOutcome, RideLifecycleAPI};
use crate::config::Config;
use crate::engine::{Dependencies, Engine, TimerScheduler};
use crate::entities::{
    Coordinates, DriverLocation, DriverSnapshot, DriverStats, Ride, VehicleClass,
};
use crate::error::{invalid_input, Error};
use crate::external::{
    AuditEvent, ChannelNotifier, NoticeKind, OfferNotice, RecordingAuditSink,
};
use crate::geometry::{offset_east, offset_north};
use crate::store::{FleetRegistry, RideStore, Store};

const LAGOS: Coordinates = Coordinates {
    lat: 6.5244,
    lng: 3.3792,
};

/// Shape of a simulated run.
#[derive(Clone, Debug)]
pub struct Plan {
    pub drivers: usize,
    pub rides: usize,
    pub workers: usize,
    /// Standard deviation, in km, of positions around the city centre.
    pub spread_km: f64,
    pub accept_probability: f64,
    pub reject_probability: f64,
    pub complete_probability: f64,
    pub offer_ttl: Duration,
    pub run_for: std::time::Duration,
}

impl Default for Plan {
    fn default() -> Self {
        Self {
            drivers: 120,
            rides: 60,
            workers: 8,
            spread_km: 4.0,
            accept_probability: 0.35,
            reject_probability: 0.45,
            complete_probability: 0.8,
            offer_ttl: Duration::seconds(2),
            run_for: std::time::Duration::from_secs(12),
        }
    }
}

impl Plan {
    fn validate(&self) -> Result<(), Error> {
        let probabilities = [
            self.accept_probability,
            self.reject_probability,
            self.complete_probability,
        ];

        if probabilities.iter().any(|p| !(0.0..=1.0).contains(p))
            || self.accept_probability + self.reject_probability > 1.0
        {
            return Err(invalid_input("simulation probabilities must lie in [0, 1]"));
        }

        if self.workers == 0 {
            return Err(invalid_input("simulation needs at least one worker"));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Summary {
    pub rides: usize,
    pub by_status: BTreeMap<String, usize>,
    pub broadcasts: usize,
    pub assignments: usize,
    pub expired_offers: usize,
    pub reallocations: usize,
    pub allocation_failures: usize,
}

fn sample_binomial(rng: &mut StdRng, n: u64, p: f64) -> u64 {
    match Binomial::new(n, p) {
        Ok(bin) => bin.sample(rng),
        Err(_) => 0,
    }
}

fn log_outcome<T: Debug>(action: &str, result: Result<T, Error>) {
    match result {
        Ok(outcome) => tracing::info!(action, ?outcome, "ok"),
        Err(err) if err.is_internal() => tracing::error!(action, %err, "failed"),
        Err(err) => tracing::warn!(action, %err, "rejected"),
    }
}

struct Simulation {
    e: Arc<Engine>,
    fleet: Arc<dyn FleetRegistry>,
    rng: Mutex<StdRng>,
    ride_ids: Mutex<Vec<Uuid>>,
    plan: Plan,
}

impl Simulation {
    #[tracing::instrument(skip(self))]
    async fn sample_position(&self) -> Result<Coordinates, Error> {
        let offset = Normal::<f64>::new(0.0, self.plan.spread_km)
            .map_err(|_| invalid_input("spread must be positive"))?;
        let mut rng = self.rng.lock().await;

        let north = offset.sample(&mut *rng);
        let east = offset.sample(&mut *rng);

        Ok(offset_east(offset_north(LAGOS, north), east))
    }

    #[tracing::instrument(skip(self))]
    async fn sample_driver(&self) -> Result<(DriverSnapshot, DriverStats), Error> {
        let rating = Normal::<f64>::new(4.5, 0.35).map_err(|_| invalid_input("rating distribution"))?;
        let acceptance = Normal::<f64>::new(0.8, 0.1).map_err(|_| invalid_input("acceptance distribution"))?;
        let classes = Uniform::from(0..3);
        let history = Uniform::from(0..400u32);

        let mut rng = self.rng.lock().await;

        let vehicle_class = match classes.sample(&mut *rng) {
            0 => VehicleClass::Economy,
            1 => VehicleClass::Comfort,
            _ => VehicleClass::Premium,
        };

        let mut driver = DriverSnapshot::new(Uuid::new_v4(), vehicle_class);
        if sample_binomial(&mut rng, 1, 0.95) > 0 {
            driver.verify();
        }
        driver.start()?;

        let total_rides = history.sample(&mut *rng);
        let completed_rides = sample_binomial(&mut rng, total_rides as u64, 0.9) as u32;

        let stats = if total_rides == 0 {
            DriverStats::default()
        } else {
            DriverStats {
                average_rating: Some(rating.sample(&mut *rng).clamp(1.0, 5.0)),
                total_rides,
                completed_rides,
                acceptance_rate: Some(acceptance.sample(&mut *rng).clamp(0.0, 1.0)),
            }
        };

        Ok((driver, stats))
    }

    #[tracing::instrument(skip(self))]
    async fn add_driver(&self) -> Result<Uuid, Error> {
        let (driver, stats) = self.sample_driver().await?;
        let position = self.sample_position().await?;

        self.fleet.upsert_driver(&driver, &stats).await?;
        self.fleet
            .update_location(driver.id, &DriverLocation::new(position, Utc::now()))
            .await?;

        tracing::info!(driver_id = %driver.id, verified = driver.verified, "driver online");

        Ok(driver.id)
    }

    #[tracing::instrument(skip(self))]
    async fn add_ride(&self) -> Result<Uuid, Error> {
        let pickup = self.sample_position().await?;
        let dropoff = self.sample_position().await?;

        let fare = {
            let fares = Normal::<f64>::new(1500.0, 400.0).map_err(|_| invalid_input("fare distribution"))?;
            let mut rng = self.rng.lock().await;
            fares.sample(&mut *rng).max(300.0)
        };

        let ride = Ride::new(pickup, dropoff, fare, Utc::now())?;
        self.fleet.insert_ride(&ride).await?;
        self.ride_ids.lock().await.push(ride.id);

        Ok(ride.id)
    }

    /// A driver agent's reaction to a notice.
    #[tracing::instrument(skip(self))]
    async fn respond(&self, notice: OfferNotice) {
        let (response, complete, delay_ms) = {
            let mut rng = self.rng.lock().await;
            let roll = Uniform::from(0.0..1.0).sample(&mut *rng);
            let delay_ms = Uniform::from(0..400u64).sample(&mut *rng);
            let complete = sample_binomial(&mut rng, 1, self.plan.complete_probability) > 0;

            let response = if roll < self.plan.accept_probability {
                Some(DriverResponse::Accept)
            } else if roll < self.plan.accept_probability + self.plan.reject_probability {
                Some(DriverResponse::Reject)
            } else {
                None
            };

            (response, complete, delay_ms)
        };

        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;

        let (ride_id, driver_id) = (notice.ride_id, notice.driver_id);

        let assigned = match notice.kind {
            NoticeKind::Assignment => true,
            NoticeKind::Offer => match response {
                Some(response) => {
                    let result = self.e.handle_response(ride_id, driver_id, response).await;
                    let accepted = matches!(result, Ok(ResponseOutcome::Accepted { .. }));
                    log_outcome("handle_response", result);
                    accepted
                }
                None => {
                    tracing::info!(%driver_id, "driver ignores offer");
                    false
                }
            },
        };

        if assigned && complete {
            self.drive(ride_id, driver_id).await;
        }
    }

    async fn drive(&self, ride_id: Uuid, driver_id: Uuid) {
        if let Err(err) = self.e.mark_arrived(ride_id, driver_id).await {
            return log_outcome::<()>("mark_arrived", Err(err));
        }

        if let Err(err) = self.e.start_ride(ride_id, driver_id).await {
            return log_outcome::<()>("start_ride", Err(err));
        }

        log_outcome("complete_ride", self.e.complete_ride(ride_id, driver_id).await);
    }
}

pub struct Executor {
    s: Arc<Simulation>,
    rides: Arc<dyn RideStore>,
    notices: Receiver<OfferNotice>,
    expiries: Receiver<Uuid>,
    audit: Arc<RecordingAuditSink>,
}

impl Executor {
    #[tracing::instrument(name = "Executor::new", skip(store))]
    pub fn new<S: Store + 'static>(config: Config, plan: Plan, store: Arc<S>) -> Result<Self, Error> {
        plan.validate()?;

        let config = Config {
            offer_ttl: plan.offer_ttl,
            ..config
        };

        let (scheduler, expiries) = TimerScheduler::new();
        let (notifier, notices) = ChannelNotifier::unbounded();
        let audit = Arc::new(RecordingAuditSink::new());

        let deps = Dependencies::new(store.clone(), Arc::new(scheduler))
            .with_notifier(Arc::new(notifier))
            .with_audit(audit.clone());

        let seed = config.simulation_seed;
        let engine = Arc::new(Engine::new(config, deps)?);

        Ok(Self {
            s: Arc::new(Simulation {
                e: engine,
                fleet: store.clone(),
                rng: Mutex::new(StdRng::seed_from_u64(seed)),
                ride_ids: Mutex::new(vec![]),
                plan,
            }),
            rides: store,
            notices,
            expiries,
            audit,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(self) -> Result<Summary, Error> {
        let expiry_loop = tokio::spawn(self.s.e.clone().run_expiry_loop(self.expiries.clone()));

        self.initialize_drivers().await?;

        let agents = self.spawn_driver_agents();

        self.request_rides().await;

        tokio::time::sleep(self.s.plan.run_for).await;

        for agent in agents {
            agent.abort();
        }
        expiry_loop.abort();

        self.summarize().await
    }

    #[tracing::instrument(skip(self))]
    async fn initialize_drivers(&self) -> Result<(), Error> {
        for _ in 0..self.s.plan.drivers {
            self.s.add_driver().await?;
        }

        Ok(())
    }

    fn spawn_driver_agents(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = vec![];

        for _ in 0..self.s.plan.workers {
            let rx = self.notices.clone();
            let s = self.s.clone();

            handles.push(tokio::spawn(async move {
                while let Ok(notice) = rx.recv().await {
                    s.respond(notice).await;
                }
            }));
        }

        handles
    }

    #[tracing::instrument(skip(self))]
    async fn request_rides(&self) {
        let (tx, rx): (Sender<()>, Receiver<()>) = async_channel::unbounded();

        let mut handles = vec![];
        for _ in 0..self.s.plan.workers {
            let rx = rx.clone();
            let s = self.s.clone();

            handles.push(tokio::spawn(async move {
                while rx.recv().await.is_ok() {
                    match s.add_ride().await {
                        Ok(ride_id) => log_outcome("allocate", s.e.allocate(ride_id).await),
                        Err(err) => tracing::error!(%err, "could not create ride"),
                    }
                }
            }));
        }

        for _ in 0..self.s.plan.rides {
            if tx.send(()).await.is_err() {
                break;
            }
        }
        drop(tx);

        futures::future::join_all(handles).await;
    }

    async fn summarize(&self) -> Result<Summary, Error> {
        let ride_ids = self.s.ride_ids.lock().await.clone();
        let mut summary = Summary {
            rides: ride_ids.len(),
            broadcasts: self.audit.count(AuditEvent::Broadcast),
            assignments: self.audit.count(AuditEvent::Assigned),
            expired_offers: self.audit.count(AuditEvent::OfferExpired),
            reallocations: self.audit.count(AuditEvent::Reallocated),
            allocation_failures: self.audit.count(AuditEvent::AllocationFailed),
            ..Summary::default()
        };

        for ride_id in ride_ids {
            if let Some(ride) = self.rides.get(ride_id).await? {
                *summary.by_status.entry(ride.status.name()).or_default() += 1;
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn executor(plan: Plan) -> Executor {
        Executor::new(Config::default(), plan, Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn sampled_drivers_have_plausible_stats() {
        tokio_test::block_on(async {
            let executor = executor(Plan::default());

            for _ in 0..50 {
                let (_, stats) = executor.s.sample_driver().await.unwrap();

                if let Some(rating) = stats.average_rating {
                    assert!((1.0..=5.0).contains(&rating));
                }
                if let Some(rate) = stats.acceptance_rate {
                    assert!((0.0..=1.0).contains(&rate));
                }
                assert!(stats.completed_rides <= stats.total_rides);
            }
        });
    }

    #[test]
    fn short_run_requests_every_ride() {
        tokio_test::block_on(async {
            let plan = Plan {
                drivers: 12,
                rides: 6,
                workers: 2,
                run_for: std::time::Duration::from_millis(200),
                ..Plan::default()
            };

            let summary = executor(plan).run().await.unwrap();

            assert_eq!(summary.rides, 6);
            assert_eq!(summary.by_status.values().sum::<usize>(), 6);
        });
    }

    #[test]
    fn rejects_impossible_probabilities() {
        let plan = Plan {
            accept_probability: 0.7,
            reject_probability: 0.5,
            ..Plan::default()
        };

        assert!(plan.validate().unwrap_err().is_invalid_input());
    }
}
