use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use super::{AcceptCheck, AllocationCycle, Decline, Engine, Reservation, MAX_SWAP_ATTEMPTS};
use crate::{
    api::{AllocationAPI, Allocation, DriverResponse, ReallocationReason, ResponseOutcome},
    config::DispatchMode,
    entities::{AllocationOffer, Ride, RideStatus},
    error::{
        allocation_failed_error, invalid_state_error, no_drivers_available_error,
        offer_expired_error, stale_assignment_error, Error,
    },
    external::{AuditEvent, NoticeKind, OfferNotice},
    scoring::ScoredCandidate,
};

#[async_trait]
impl AllocationAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn allocate(&self, ride_id: Uuid) -> Result<Allocation, Error> {
        self.allocate_with(ride_id, self.config.dispatch_mode).await
    }

    #[tracing::instrument(skip(self))]
    async fn allocate_direct(&self, ride_id: Uuid) -> Result<Allocation, Error> {
        self.allocate_with(ride_id, DispatchMode::Direct).await
    }

    #[tracing::instrument(skip(self))]
    async fn broadcast(&self, ride_id: Uuid) -> Result<Allocation, Error> {
        self.allocate_with(ride_id, DispatchMode::Broadcast).await
    }

    #[tracing::instrument(skip(self))]
    async fn handle_response(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
        response: DriverResponse,
    ) -> Result<ResponseOutcome, Error> {
        match response {
            DriverResponse::Accept => self.accept(ride_id, driver_id).await,
            DriverResponse::Reject => self.reject(ride_id, driver_id).await,
        }
    }

    #[tracing::instrument(skip(self))]
    async fn reallocate(
        &self,
        ride_id: Uuid,
        reason: ReallocationReason,
    ) -> Result<Allocation, Error> {
        self.reallocate_excluding(ride_id, reason, vec![]).await
    }

    #[tracing::instrument(skip(self))]
    async fn expire_offer(&self, ride_id: Uuid) -> Result<Option<Allocation>, Error> {
        let offer = match self.offers.take_expired(ride_id, self.clock.now()) {
            Some(offer) => offer,
            None => return Ok(None),
        };

        let err = offer_expired_error(ride_id);
        tracing::warn!(
            declined = offer.declined.len(),
            unanswered = offer.candidates.len(),
            %err,
            "reallocating"
        );

        self.record(
            ride_id,
            AuditEvent::OfferExpired,
            json!({ "declined": offer.declined, "unanswered": offer.candidates }),
        );

        let excluded = offer.offered().collect();

        self.reallocate_excluding(ride_id, ReallocationReason::OfferExpired, excluded)
            .await
            .map(Some)
    }

    #[tracing::instrument(skip(self))]
    async fn rank_candidates(
        &self,
        ride_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ScoredCandidate>, Error> {
        let ride = self.load_ride(ride_id).await?;
        let excluded = self.excluded_drivers(ride_id).await;

        let mut candidates = self.dispatchable_candidates(&ride, &excluded).await?;
        candidates.truncate(limit);

        Ok(candidates)
    }
}

impl Engine {
    async fn allocate_with(&self, ride_id: Uuid, mode: DispatchMode) -> Result<Allocation, Error> {
        let cycle = self.cycle(ride_id);
        let cycle = cycle.lock().await;

        let ride = self.load_ride(ride_id).await?;

        let ride = match self.begin_search(ride).await? {
            Some(ride) => ride,
            None => {
                let status = self.load_ride(ride_id).await?.status;
                tracing::info!(?status, "ride is not looking for a driver");
                return Ok(Allocation::Inactive { status });
            }
        };

        self.dispatch(&ride, &cycle.excluded, mode).await
    }

    /// Moves a requested ride into `Searching`. Returns `None` when the ride
    /// is past matching.
    async fn begin_search(&self, mut ride: Ride) -> Result<Option<Ride>, Error> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            match ride.status {
                RideStatus::Searching | RideStatus::Broadcasting => return Ok(Some(ride)),
                RideStatus::Requested => {
                    if self
                        .rides
                        .compare_and_set_status(ride.id, RideStatus::Requested, RideStatus::Searching, None)
                        .await?
                    {
                        tracing::info!(ride_id = %ride.id, "searching for a driver");
                        self.record(ride.id, AuditEvent::SearchStarted, json!({}));
                        ride.apply(RideStatus::Searching, None)?;
                        return Ok(Some(ride));
                    }

                    ride = self.load_ride(ride.id).await?;
                }
                _ => return Ok(None),
            }
        }

        Err(invalid_state_error())
    }

    /// Puts the ride back into `Searching`, withdrawing any offer. A held
    /// driver is freed only when `reason` is a release or an explicit request;
    /// an expired or exhausted offer never undoes an assignment. Returns `None`
    /// when the ride is not to be matched again.
    async fn return_to_search(
        &self,
        mut ride: Ride,
        reason: ReallocationReason,
        cycle: &mut AllocationCycle,
    ) -> Result<Option<Ride>, Error> {
        let may_unassign = matches!(
            reason,
            ReallocationReason::DriverReleased | ReallocationReason::Requested
        );

        for _ in 0..MAX_SWAP_ATTEMPTS {
            let from = ride.status;

            match from {
                RideStatus::Searching => return Ok(Some(ride)),
                RideStatus::Requested | RideStatus::Broadcasting => {
                    self.offers.withdraw(ride.id);
                }
                RideStatus::DriverAssigned | RideStatus::DriverArrived if may_unassign => (),
                _ => return Ok(None),
            }

            if self
                .rides
                .compare_and_set_status(ride.id, from, RideStatus::Searching, None)
                .await?
            {
                if let Some(driver_id) = ride.driver_id {
                    self.drivers.release(driver_id, ride.id).await?;
                    cycle.excluded.insert(driver_id);
                    tracing::info!(%driver_id, "driver returned to the free pool");
                }

                ride.apply(RideStatus::Searching, None)?;
                return Ok(Some(ride));
            }

            ride = self.load_ride(ride.id).await?;
        }

        Err(invalid_state_error())
    }

    /// Runs one reallocation cycle, excluding `excluded` from now on.
    pub(super) async fn reallocate_excluding(
        &self,
        ride_id: Uuid,
        reason: ReallocationReason,
        excluded: Vec<Uuid>,
    ) -> Result<Allocation, Error> {
        let cycle = self.cycle(ride_id);
        let mut cycle = cycle.lock().await;

        cycle.excluded.extend(excluded);

        let ride = self.load_ride(ride_id).await?;

        let ride = match self.return_to_search(ride, reason, &mut cycle).await? {
            Some(ride) => ride,
            None => {
                let status = self.load_ride(ride_id).await?.status;
                tracing::info!(?status, ?reason, "ride left matching, not reallocating");
                return Ok(Allocation::Inactive { status });
            }
        };

        if cycle.reallocations >= self.config.max_reallocation_cycles {
            tracing::warn!(cycles = cycle.reallocations, ?reason, "reallocation cycles exhausted");

            self.record(
                ride_id,
                AuditEvent::AllocationFailed,
                json!({ "cycles": cycle.reallocations, "reason": reason }),
            );

            let err = allocation_failed_error(ride_id, cycle.reallocations);
            drop(cycle);
            self.forget(ride_id);

            return Err(err);
        }

        cycle.reallocations += 1;

        tracing::info!(cycle = cycle.reallocations, ?reason, "reallocating ride");

        self.record(
            ride_id,
            AuditEvent::Reallocated,
            json!({
                "cycle": cycle.reallocations,
                "reason": reason,
                "excluded": cycle.excluded,
            }),
        );

        self.dispatch(&ride, &cycle.excluded, self.config.reallocation_mode)
            .await
    }

    async fn dispatch(
        &self,
        ride: &Ride,
        excluded: &HashSet<Uuid>,
        mode: DispatchMode,
    ) -> Result<Allocation, Error> {
        match mode {
            DispatchMode::Direct => self.assign_best(ride, excluded).await,
            DispatchMode::Broadcast => self.open_offer(ride, excluded).await,
            DispatchMode::Auto => match self.assign_best(ride, excluded).await {
                Err(err) if err.is_no_drivers_available() => {
                    tracing::info!(ride_id = %ride.id, "direct assignment failed, broadcasting");
                    let ride = self.load_ride(ride.id).await?;
                    self.open_offer(&ride, excluded).await
                }
                other => other,
            },
        }
    }

    /// Reserves the best-ranked candidate, falling back down the ranking when
    /// a reserve loses a race.
    async fn assign_best(
        &self,
        ride: &Ride,
        excluded: &HashSet<Uuid>,
    ) -> Result<Allocation, Error> {
        let candidates = self.dispatchable_candidates(ride, excluded).await?;

        if candidates.is_empty() {
            tracing::info!(ride_id = %ride.id, "no candidates for direct assignment");
            return Err(no_drivers_available_error(ride.id));
        }

        let mut expected = ride.status;

        for candidate in candidates.iter().take(self.config.max_reserve_attempts) {
            match self.reserve(ride.id, expected, candidate.driver_id).await? {
                Reservation::Reserved => {
                    self.offers.withdraw(ride.id);

                    tracing::info!(driver_id = %candidate.driver_id, score = candidate.score(), "driver assigned");

                    self.notify(OfferNotice {
                        kind: NoticeKind::Assignment,
                        driver_id: candidate.driver_id,
                        ride_id: ride.id,
                        eta_minutes: candidate.eta_minutes,
                    });

                    self.record(
                        ride.id,
                        AuditEvent::Assigned,
                        json!({
                            "driver_id": candidate.driver_id,
                            "mode": DispatchMode::Direct,
                            "score": candidate.breakdown,
                        }),
                    );

                    return Ok(Allocation::Assigned {
                        driver_id: candidate.driver_id,
                        score: candidate.score(),
                    });
                }
                Reservation::DriverUnavailable => {
                    let err = stale_assignment_error(ride.id);
                    tracing::debug!(driver_id = %candidate.driver_id, %err, "driver taken, trying next");
                }
                Reservation::RideChanged => {
                    let current = self.load_ride(ride.id).await?;

                    if !current.is_matching() {
                        return Ok(Allocation::Inactive {
                            status: current.status,
                        });
                    }

                    expected = current.status;
                }
            }
        }

        Err(no_drivers_available_error(ride.id))
    }

    /// Offers the ride to the top candidates at once and arms the expiry timer.
    async fn open_offer(
        &self,
        ride: &Ride,
        excluded: &HashSet<Uuid>,
    ) -> Result<Allocation, Error> {
        let mut candidates = self.dispatchable_candidates(ride, excluded).await?;
        candidates.truncate(self.config.broadcast_fanout);

        if candidates.is_empty() {
            tracing::info!(ride_id = %ride.id, "no candidates to broadcast to");
            return Err(no_drivers_available_error(ride.id));
        }

        if ride.status != RideStatus::Broadcasting {
            let swapped = self
                .rides
                .compare_and_set_status(ride.id, ride.status, RideStatus::Broadcasting, None)
                .await?;

            if !swapped {
                let current = self.load_ride(ride.id).await?;

                if current.status != RideStatus::Broadcasting {
                    return Ok(Allocation::Inactive {
                        status: current.status,
                    });
                }
            }
        }

        let driver_ids: Vec<Uuid> = candidates.iter().map(|c| c.driver_id).collect();
        let offer = AllocationOffer::new(
            ride.id,
            driver_ids.clone(),
            self.clock.now(),
            self.config.offer_ttl,
        );
        let expires_at = offer.expires_at();

        self.offers.open(offer);

        for candidate in candidates.iter() {
            self.notify(OfferNotice {
                kind: NoticeKind::Offer,
                driver_id: candidate.driver_id,
                ride_id: ride.id,
                eta_minutes: candidate.eta_minutes,
            });
        }

        if let Err(err) = self.scheduler.schedule(ride.id, self.config.offer_ttl) {
            tracing::error!(ride_id = %ride.id, %err, "could not arm offer expiry");
        }

        tracing::info!(ride_id = %ride.id, fanout = driver_ids.len(), "offer broadcast");

        self.record(
            ride.id,
            AuditEvent::Broadcast,
            json!({ "candidates": driver_ids, "expires_at": expires_at }),
        );

        Ok(Allocation::Broadcast {
            candidates: driver_ids,
            expires_at,
        })
    }

    async fn accept(&self, ride_id: Uuid, driver_id: Uuid) -> Result<ResponseOutcome, Error> {
        let ride = self.load_ride(ride_id).await?;

        if ride.driver_id.is_some() {
            return self.settled_accept(&ride, driver_id);
        }

        if !ride.is_matching() {
            tracing::debug!(status = ?ride.status, "ride no longer matching, discarding accept");
            return Ok(ResponseOutcome::Discarded);
        }

        match self.offers.check_accept(ride_id, driver_id, self.clock.now()) {
            AcceptCheck::Open => (),
            AcceptCheck::Missing | AcceptCheck::NotCandidate => {
                // The offer may have been consumed by a winner since the ride was read.
                let current = self.load_ride(ride_id).await?;

                if current.driver_id.is_some() {
                    return self.settled_accept(&current, driver_id);
                }

                tracing::debug!("no open offer for this driver, discarding accept");
                return Ok(ResponseOutcome::Discarded);
            }
            AcceptCheck::Expired => {
                self.expire_late(ride_id).await?;
                return Ok(ResponseOutcome::Discarded);
            }
        }

        match self.reserve(ride_id, ride.status, driver_id).await? {
            Reservation::Reserved => {
                if !self.offers.consume(ride_id) {
                    // The offer was expired or withdrawn under us; trust the ride.
                    let current = self.load_ride(ride_id).await?;

                    if !(current.status.holds_driver() && current.driver_id == Some(driver_id)) {
                        tracing::info!(%driver_id, status = ?current.status, "reserve overtaken");

                        if current.driver_id.is_some() {
                            return self.settled_accept(&current, driver_id);
                        }

                        return Ok(ResponseOutcome::Discarded);
                    }
                }

                tracing::info!(%driver_id, "offer accepted");

                self.record(
                    ride_id,
                    AuditEvent::Assigned,
                    json!({ "driver_id": driver_id, "mode": DispatchMode::Broadcast }),
                );

                Ok(ResponseOutcome::Accepted { driver_id })
            }
            Reservation::DriverUnavailable => {
                tracing::info!(%driver_id, "accepting driver is busy elsewhere, treating as decline");

                let outcome = self.decline(ride_id, driver_id).await?;
                tracing::debug!(?outcome, "declined on behalf of busy driver");

                Err(stale_assignment_error(ride_id))
            }
            Reservation::RideChanged => {
                let current = self.load_ride(ride_id).await?;

                if current.driver_id.is_some() {
                    return self.settled_accept(&current, driver_id);
                }

                Ok(ResponseOutcome::Discarded)
            }
        }
    }

    /// An accept for a ride that already holds a driver: a repeat from that
    /// driver is moot, anyone else lost the race.
    fn settled_accept(&self, ride: &Ride, driver_id: Uuid) -> Result<ResponseOutcome, Error> {
        if ride.driver_id == Some(driver_id) {
            tracing::debug!("duplicate accept from the assigned driver");
            return Ok(ResponseOutcome::Discarded);
        }

        Err(stale_assignment_error(ride.id))
    }

    async fn reject(&self, ride_id: Uuid, driver_id: Uuid) -> Result<ResponseOutcome, Error> {
        let ride = self.load_ride(ride_id).await?;

        if !ride.is_matching() {
            tracing::debug!(status = ?ride.status, "ride no longer matching, discarding reject");
            return Ok(ResponseOutcome::Discarded);
        }

        self.decline(ride_id, driver_id).await
    }

    async fn decline(&self, ride_id: Uuid, driver_id: Uuid) -> Result<ResponseOutcome, Error> {
        match self.offers.decline(ride_id, driver_id, self.clock.now()) {
            Decline::Missing | Decline::NotCandidate => Ok(ResponseOutcome::Discarded),
            Decline::Expired => match self.expire_late(ride_id).await? {
                Some(allocation) => Ok(ResponseOutcome::Reallocated(allocation)),
                None => Ok(ResponseOutcome::Discarded),
            },
            Decline::Remaining(remaining) => {
                tracing::info!(%driver_id, remaining, "offer declined");

                self.record(
                    ride_id,
                    AuditEvent::Rejected,
                    json!({ "driver_id": driver_id, "remaining": remaining }),
                );

                Ok(ResponseOutcome::Rejected { remaining })
            }
            Decline::Exhausted(offer) => {
                tracing::info!(%driver_id, "every candidate declined");

                self.record(
                    ride_id,
                    AuditEvent::Rejected,
                    json!({ "driver_id": driver_id, "remaining": 0 }),
                );

                let allocation = self
                    .reallocate_excluding(ride_id, ReallocationReason::AllRejected, offer.declined)
                    .await?;

                Ok(ResponseOutcome::Reallocated(allocation))
            }
        }
    }

    /// Expires an offer whose TTL elapsed before its timer fired. Only
    /// `AllocationFailed` escapes; other reallocation errors are logged.
    async fn expire_late(&self, ride_id: Uuid) -> Result<Option<Allocation>, Error> {
        match self.expire_offer(ride_id).await {
            Ok(allocation) => Ok(allocation),
            Err(err) if err.is_allocation_failed() => Err(err),
            Err(err) => {
                tracing::warn!(%ride_id, %err, "reallocation after late response failed");
                Ok(None)
            }
        }
    }
}
