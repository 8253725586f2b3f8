use super::Engine;

use async_trait::async_trait;
use futures::future::try_join_all;
use uuid::Uuid;

use crate::{
    api::RouteAPI,
    entities::{Coordinates, OptimizedRoute, Ride},
    error::{invalid_input, Error},
    routing::{route_points, RideSuggestion},
};

#[async_trait]
impl RouteAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn plan_route(
        &self,
        driver_id: Uuid,
        ride_ids: Vec<Uuid>,
    ) -> Result<OptimizedRoute, Error> {
        let rides = self.load_open_rides(&ride_ids).await?;
        let start = self.driver_position(driver_id).await?;

        let points = route_points(&rides, self.clock.now());

        self.sequencer.sequence(start, points)
    }

    #[tracing::instrument(skip(self))]
    async fn suggest_rides(
        &self,
        driver_id: Uuid,
        ride_ids: Vec<Uuid>,
    ) -> Result<Vec<RideSuggestion>, Error> {
        let rides = self.load_open_rides(&ride_ids).await?;
        let start = self.driver_position(driver_id).await?;

        Ok(self
            .sequencer
            .suggest_sequence(start, &rides, self.clock.now()))
    }

    #[tracing::instrument(skip(self))]
    async fn pickup_order(
        &self,
        driver_id: Uuid,
        ride_ids: Vec<Uuid>,
    ) -> Result<Vec<Uuid>, Error> {
        let rides = self.load_open_rides(&ride_ids).await?;

        let start = match self.driver_position(driver_id).await? {
            Some(start) => start,
            None => match rides.first() {
                Some(ride) => ride.pickup,
                None => return Ok(vec![]),
            },
        };

        Ok(self.sequencer.pickup_order(start, &rides, self.clock.now()))
    }
}

impl Engine {
    async fn load_open_rides(&self, ride_ids: &[Uuid]) -> Result<Vec<Ride>, Error> {
        let rides = try_join_all(ride_ids.iter().map(|id| self.load_ride(*id))).await?;

        if let Some(ride) = rides.iter().find(|ride| ride.status.is_terminal()) {
            return Err(invalid_input(format!(
                "ride {} is already {}",
                ride.id,
                ride.status.name()
            )));
        }

        Ok(rides)
    }

    /// The driver's position when it is fresh enough to route from.
    async fn driver_position(&self, driver_id: Uuid) -> Result<Option<Coordinates>, Error> {
        let location = self.locations.get_current_location(driver_id).await?;

        Ok(location
            .filter(|location| !location.is_stale(self.clock.now(), self.config.location_max_age))
            .map(|location| location.coordinates))
    }
}
