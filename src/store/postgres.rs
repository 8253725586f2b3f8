use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geo_types::Geometry;
use geozero::wkb;
use sqlx::{postgres::PgPoolOptions, types::Json, Executor, Pool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::{DriverDirectory, DriverFilter, FleetRegistry, LocationStore, RideStore};
use crate::{
    entities::{
        Coordinates, DriverLocation, DriverSnapshot, DriverStats, Ride, RideStatus,
    },
    error::{invalid_input, Error},
};

type Database = Postgres;

/// PostGIS-backed store. Rides and drivers are JSONB documents with their
/// status (and driver pointer) mirrored into plain columns so compare-and-set
/// can be expressed as a conditional `UPDATE`.
pub struct PgStore {
    pool: Pool<Database>,
}

impl PgStore {
    #[tracing::instrument(name = "PgStore::new", skip(db_uri))]
    pub async fn new(db_uri: &str, max_connections: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_uri)
            .await?;

        // TODO: move this to migrations
        pool.execute("CREATE EXTENSION IF NOT EXISTS postgis").await?;
        pool.execute("CREATE TABLE IF NOT EXISTS rides (id UUID PRIMARY KEY, status VARCHAR NOT NULL, driver_id UUID, data JSONB NOT NULL)")
            .await?;
        pool.execute("CREATE TABLE IF NOT EXISTS drivers (id UUID PRIMARY KEY, status VARCHAR NOT NULL, assigned_ride_id UUID, verified BOOLEAN NOT NULL, data JSONB NOT NULL, stats JSONB NOT NULL)")
            .await?;
        pool.execute("CREATE TABLE IF NOT EXISTS driver_locations (driver_id UUID PRIMARY KEY, location geometry(Point, 4326) NOT NULL, captured_at TIMESTAMPTZ NOT NULL)")
            .await?;

        Ok(Self { pool })
    }
}

#[tracing::instrument(skip(tx))]
async fn fetch_ride_for_update(
    tx: &mut Transaction<'_, Database>,
    id: &Uuid,
) -> Result<Option<Ride>, Error> {
    let maybe_result = tx
        .fetch_optional(sqlx::query("SELECT data FROM rides WHERE id = $1 FOR UPDATE").bind(id))
        .await?;

    match maybe_result {
        Some(result) => {
            let Json(ride): Json<Ride> = result.try_get("data")?;
            Ok(Some(ride))
        }
        None => Ok(None),
    }
}

#[tracing::instrument(skip(tx))]
async fn fetch_driver_for_update(
    tx: &mut Transaction<'_, Database>,
    id: &Uuid,
) -> Result<Option<DriverSnapshot>, Error> {
    let maybe_result = tx
        .fetch_optional(sqlx::query("SELECT data FROM drivers WHERE id = $1 FOR UPDATE").bind(id))
        .await?;

    match maybe_result {
        Some(result) => {
            let Json(driver): Json<DriverSnapshot> = result.try_get("data")?;
            Ok(Some(driver))
        }
        None => Ok(None),
    }
}

/// Writes `ride` back only if the stored status still equals `expected`.
#[tracing::instrument(skip(tx, ride), fields(ride_id = %ride.id))]
async fn update_ride_if(
    tx: &mut Transaction<'_, Database>,
    ride: &Ride,
    expected: RideStatus,
) -> Result<bool, Error> {
    let result = tx
        .execute(
            sqlx::query(
                "UPDATE rides SET status = $3, driver_id = $4, data = $5 WHERE id = $1 AND status = $2",
            )
            .bind(&ride.id)
            .bind(expected.name())
            .bind(ride.status.name())
            .bind(&ride.driver_id)
            .bind(Json(ride)),
        )
        .await?;

    Ok(result.rows_affected() == 1)
}

#[tracing::instrument(skip(tx, driver), fields(driver_id = %driver.id))]
async fn update_driver(
    tx: &mut Transaction<'_, Database>,
    driver: &DriverSnapshot,
) -> Result<(), Error> {
    tx.execute(
        sqlx::query("UPDATE drivers SET status = $2, assigned_ride_id = $3, data = $4 WHERE id = $1")
            .bind(&driver.id)
            .bind(driver.status.name())
            .bind(driver.assigned_ride_id())
            .bind(Json(driver)),
    )
    .await?;

    Ok(())
}

#[async_trait]
impl RideStore for PgStore {
    #[tracing::instrument(skip(self))]
    async fn get(&self, ride_id: Uuid) -> Result<Option<Ride>, Error> {
        let mut conn = self.pool.acquire().await?;

        let maybe_result = conn
            .fetch_optional(sqlx::query("SELECT data FROM rides WHERE id = $1").bind(&ride_id))
            .await?;

        match maybe_result {
            Some(result) => {
                let Json(ride): Json<Ride> = result.try_get("data")?;
                Ok(Some(ride))
            }
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn compare_and_set_status(
        &self,
        ride_id: Uuid,
        expected_status: RideStatus,
        new_status: RideStatus,
        driver_id: Option<Uuid>,
    ) -> Result<bool, Error> {
        let mut tx = self.pool.begin().await?;

        let mut ride = match fetch_ride_for_update(&mut tx, &ride_id).await? {
            Some(ride) => ride,
            None => return Ok(false),
        };

        if ride.status != expected_status {
            tracing::debug!(current = ?ride.status, "ride status moved on, not swapping");
            return Ok(false);
        }

        ride.apply(new_status, driver_id)?;

        if !update_ride_if(&mut tx, &ride, expected_status).await? {
            return Ok(false);
        }

        tx.commit().await?;

        Ok(true)
    }
}

#[async_trait]
impl DriverDirectory for PgStore {
    #[tracing::instrument(skip(self))]
    async fn find_nearby(
        &self,
        point: Coordinates,
        radius_km: f64,
        filter: DriverFilter,
    ) -> Result<Vec<DriverSnapshot>, Error> {
        let origin: Geometry<f64> = point.into();

        let query = "
            SELECT
                d.data AS driver
            FROM
                drivers d
                JOIN driver_locations l ON d.id = l.driver_id
            WHERE
                d.status = 'available'
                AND d.verified
                AND ST_DWithin(l.location::geography, ST_SetSRID($1, 4326)::geography, $2)
            ORDER BY
                ST_Distance(l.location::geography, ST_SetSRID($1, 4326)::geography) ASC
        ";

        let mut conn = self.pool.acquire().await?;
        let results = conn
            .fetch_all(
                sqlx::query(query)
                    .bind(wkb::Encode(origin))
                    .bind(radius_km * 1000.0),
            )
            .await?;

        let mut drivers = vec![];

        for result in results.iter() {
            let Json(driver): Json<DriverSnapshot> = result.try_get("driver")?;

            if filter.matches(&driver) {
                drivers.push(driver);
            }
        }

        Ok(drivers)
    }

    #[tracing::instrument(skip(self))]
    async fn get_driver(&self, driver_id: Uuid) -> Result<Option<DriverSnapshot>, Error> {
        let mut conn = self.pool.acquire().await?;

        let maybe_result = conn
            .fetch_optional(sqlx::query("SELECT data FROM drivers WHERE id = $1").bind(&driver_id))
            .await?;

        match maybe_result {
            Some(result) => {
                let Json(driver): Json<DriverSnapshot> = result.try_get("data")?;
                Ok(Some(driver))
            }
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn get_stats(&self, driver_id: Uuid) -> Result<DriverStats, Error> {
        let mut conn = self.pool.acquire().await?;

        let Json(stats): Json<DriverStats> = conn
            .fetch_optional(sqlx::query("SELECT stats FROM drivers WHERE id = $1").bind(&driver_id))
            .await?
            .ok_or_else(|| invalid_input(format!("unknown driver {}", driver_id)))?
            .try_get("stats")?;

        Ok(stats)
    }

    #[tracing::instrument(skip(self))]
    async fn try_assign(&self, driver_id: Uuid, ride_id: Uuid) -> Result<bool, Error> {
        let mut tx = self.pool.begin().await?;

        let mut driver = match fetch_driver_for_update(&mut tx, &driver_id).await? {
            Some(driver) => driver,
            None => return Ok(false),
        };

        if !driver.assign(ride_id) {
            return Ok(false);
        }

        update_driver(&mut tx, &driver).await?;
        tx.commit().await?;

        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    async fn release(&self, driver_id: Uuid, ride_id: Uuid) -> Result<bool, Error> {
        let mut tx = self.pool.begin().await?;

        let mut driver = match fetch_driver_for_update(&mut tx, &driver_id).await? {
            Some(driver) => driver,
            None => return Ok(false),
        };

        if !driver.free(ride_id) {
            return Ok(false);
        }

        update_driver(&mut tx, &driver).await?;
        tx.commit().await?;

        Ok(true)
    }
}

#[async_trait]
impl LocationStore for PgStore {
    #[tracing::instrument(skip(self))]
    async fn get_current_location(
        &self,
        driver_id: Uuid,
    ) -> Result<Option<DriverLocation>, Error> {
        let mut conn = self.pool.acquire().await?;

        let maybe_result = conn
            .fetch_optional(
                sqlx::query(
                    "SELECT ST_Y(location) AS lat, ST_X(location) AS lng, captured_at FROM driver_locations WHERE driver_id = $1",
                )
                .bind(&driver_id),
            )
            .await?;

        let result = match maybe_result {
            Some(result) => result,
            None => return Ok(None),
        };

        let lat: f64 = result.try_get("lat")?;
        let lng: f64 = result.try_get("lng")?;
        let captured_at: DateTime<Utc> = result.try_get("captured_at")?;

        Ok(Some(DriverLocation::new(Coordinates { lat, lng }, captured_at)))
    }
}

#[async_trait]
impl FleetRegistry for PgStore {
    #[tracing::instrument(skip(self, ride), fields(ride_id = %ride.id))]
    async fn insert_ride(&self, ride: &Ride) -> Result<(), Error> {
        let mut conn = self.pool.acquire().await?;

        conn.execute(
            sqlx::query("INSERT INTO rides (id, status, driver_id, data) VALUES ($1, $2, $3, $4)")
                .bind(&ride.id)
                .bind(ride.status.name())
                .bind(&ride.driver_id)
                .bind(Json(ride)),
        )
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self, driver, stats), fields(driver_id = %driver.id))]
    async fn upsert_driver(
        &self,
        driver: &DriverSnapshot,
        stats: &DriverStats,
    ) -> Result<(), Error> {
        let mut conn = self.pool.acquire().await?;

        conn.execute(
            sqlx::query(
                "
                INSERT INTO drivers (id, status, assigned_ride_id, verified, data, stats)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO UPDATE SET
                    status = EXCLUDED.status,
                    assigned_ride_id = EXCLUDED.assigned_ride_id,
                    verified = EXCLUDED.verified,
                    data = EXCLUDED.data,
                    stats = EXCLUDED.stats
                ",
            )
            .bind(&driver.id)
            .bind(driver.status.name())
            .bind(driver.assigned_ride_id())
            .bind(driver.verified)
            .bind(Json(driver))
            .bind(Json(stats)),
        )
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self, location))]
    async fn update_location(
        &self,
        driver_id: Uuid,
        location: &DriverLocation,
    ) -> Result<(), Error> {
        location.coordinates.validate()?;

        let geometry: Geometry<f64> = location.coordinates.into();
        let mut conn = self.pool.acquire().await?;

        conn.execute(
            sqlx::query(
                "
                INSERT INTO driver_locations (driver_id, location, captured_at)
                VALUES ($1, ST_SetSRID($2, 4326), $3)
                ON CONFLICT (driver_id) DO UPDATE SET
                    location = EXCLUDED.location,
                    captured_at = EXCLUDED.captured_at
                ",
            )
            .bind(&driver_id)
            .bind(wkb::Encode(geometry))
            .bind(location.captured_at),
        )
        .await?;

        Ok(())
    }
}
