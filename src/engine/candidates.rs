use std::collections::HashSet;

use futures::future::join_all;
use uuid::Uuid;

use super::Engine;
use crate::{
    entities::{DriverSnapshot, Ride},
    error::{invalid_input, location_unavailable_error, Error},
    geometry::distance_km,
    scoring::{rank, ScoredCandidate},
    store::DriverFilter,
};

impl Engine {
    /// Scored, ranked drivers able to take `ride` right now.
    ///
    /// Drivers without a fresh location, outside `radius_km` or in `excluded`
    /// are skipped. The radius is capped at the configured maximum. An empty
    /// result is not an error here; callers decide what it means.
    #[tracing::instrument(skip(self, ride, excluded), fields(ride_id = %ride.id))]
    pub async fn find_candidates(
        &self,
        ride: &Ride,
        radius_km: f64,
        filter: DriverFilter,
        excluded: &HashSet<Uuid>,
    ) -> Result<Vec<ScoredCandidate>, Error> {
        if !(radius_km.is_finite() && radius_km > 0.0) {
            return Err(invalid_input("search radius must be positive"));
        }

        ride.pickup.validate()?;

        let radius_km = radius_km.min(self.config.max_search_radius_km);
        let now = self.clock.now();

        self.scores.purge_expired(now);

        let drivers: Vec<DriverSnapshot> = self
            .drivers
            .find_nearby(ride.pickup, radius_km, filter)
            .await?
            .into_iter()
            .filter(|driver| driver.is_dispatchable() && !excluded.contains(&driver.id))
            .collect();

        tracing::debug!(nearby = drivers.len(), "resolving locations and stats");

        let lookups = drivers.iter().map(|driver| async move {
            let location = self.locations.get_current_location(driver.id).await;
            let stats = self.drivers.get_stats(driver.id).await;
            (location, stats)
        });
        let lookups = join_all(lookups).await;

        let mut candidates = vec![];

        for (driver, (location, stats)) in drivers.iter().zip(lookups) {
            let location = match location {
                Ok(Some(location)) if !location.is_stale(now, self.config.location_max_age) => {
                    location
                }
                Ok(_) => {
                    let err = location_unavailable_error(driver.id);
                    tracing::debug!(%err, "skipping driver");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(driver_id = %driver.id, %err, "location lookup failed, skipping driver");
                    continue;
                }
            };

            if distance_km(location.coordinates, ride.pickup) > radius_km {
                tracing::debug!(driver_id = %driver.id, "driver moved out of range");
                continue;
            }

            let stats = match stats {
                Ok(stats) => stats,
                Err(err) => {
                    tracing::warn!(driver_id = %driver.id, %err, "stats lookup failed, skipping driver");
                    continue;
                }
            };

            let candidate = match self.scores.get(ride.id, driver.id, location.captured_at, now) {
                Some(candidate) => candidate,
                None => {
                    let candidate = self.scorer.candidate(driver, &stats, &location, ride);
                    self.scores
                        .insert(ride.id, &candidate, location.captured_at, now);
                    candidate
                }
            };

            candidates.push(candidate);
        }

        rank(&mut candidates);

        Ok(candidates)
    }

    /// [`Engine::find_candidates`] with the configured radius and no vehicle
    /// filter; vehicle mismatches are penalised by scoring instead.
    pub(super) async fn dispatchable_candidates(
        &self,
        ride: &Ride,
        excluded: &HashSet<Uuid>,
    ) -> Result<Vec<ScoredCandidate>, Error> {
        self.find_candidates(
            ride,
            self.config.max_search_radius_km,
            DriverFilter::default(),
            excluded,
        )
        .await
    }
}
