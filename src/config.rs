use std::env;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{invalid_input, Error};

/// How a ride is matched. `Auto` tries a direct assignment and broadcasts
/// only when no candidate could be reserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    Direct,
    Broadcast,
    Auto,
}

impl FromStr for DispatchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "broadcast" => Ok(Self::Broadcast),
            "auto" => Ok(Self::Auto),
            other => Err(invalid_input(format!("unknown dispatch mode {:?}", other))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub max_search_radius_km: f64,
    pub broadcast_fanout: usize,
    pub offer_ttl: Duration,
    pub max_reallocation_cycles: u32,
    pub max_reserve_attempts: usize,
    pub score_cache_ttl: Duration,
    pub location_max_age: Duration,
    pub average_speed_kmh: f64,
    pub reference_fare: f64,
    pub dispatch_mode: DispatchMode,
    pub reallocation_mode: DispatchMode,
    pub database_url: Option<String>,
    pub simulation_seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_search_radius_km: 15.0,
            broadcast_fanout: 5,
            offer_ttl: Duration::minutes(10),
            max_reallocation_cycles: 3,
            max_reserve_attempts: 3,
            score_cache_ttl: Duration::minutes(5),
            location_max_age: Duration::minutes(2),
            average_speed_kmh: 25.0,
            reference_fare: 1600.0,
            dispatch_mode: DispatchMode::Broadcast,
            reallocation_mode: DispatchMode::Auto,
            database_url: None,
            simulation_seed: 42,
        }
    }
}

impl Config {
    /// Reads `DISPATCH_*` variables (after loading `.env` if present), keeping
    /// the default for anything unset.
    #[tracing::instrument(name = "Config::from_env")]
    pub fn from_env() -> Result<Self, Error> {
        dotenv::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            max_search_radius_km: read("DISPATCH_MAX_SEARCH_RADIUS_KM")?
                .unwrap_or(defaults.max_search_radius_km),
            broadcast_fanout: read("DISPATCH_BROADCAST_FANOUT")?
                .unwrap_or(defaults.broadcast_fanout),
            offer_ttl: read_seconds("DISPATCH_OFFER_TTL_SECS")?.unwrap_or(defaults.offer_ttl),
            max_reallocation_cycles: read("DISPATCH_MAX_REALLOCATION_CYCLES")?
                .unwrap_or(defaults.max_reallocation_cycles),
            max_reserve_attempts: read("DISPATCH_MAX_RESERVE_ATTEMPTS")?
                .unwrap_or(defaults.max_reserve_attempts),
            score_cache_ttl: read_seconds("DISPATCH_SCORE_CACHE_TTL_SECS")?
                .unwrap_or(defaults.score_cache_ttl),
            location_max_age: read_seconds("DISPATCH_LOCATION_MAX_AGE_SECS")?
                .unwrap_or(defaults.location_max_age),
            average_speed_kmh: read("DISPATCH_AVERAGE_SPEED_KMH")?
                .unwrap_or(defaults.average_speed_kmh),
            reference_fare: read("DISPATCH_REFERENCE_FARE")?.unwrap_or(defaults.reference_fare),
            dispatch_mode: read("DISPATCH_MODE")?.unwrap_or(defaults.dispatch_mode),
            reallocation_mode: read("DISPATCH_REALLOCATION_MODE")?
                .unwrap_or(defaults.reallocation_mode),
            database_url: env::var("DATABASE_URL").ok(),
            simulation_seed: read("DISPATCH_SIMULATION_SEED")?
                .unwrap_or(defaults.simulation_seed),
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(self.max_search_radius_km.is_finite() && self.max_search_radius_km > 0.0) {
            return Err(invalid_input("max_search_radius_km must be positive"));
        }

        if self.broadcast_fanout == 0 {
            return Err(invalid_input("broadcast_fanout must be at least 1"));
        }

        if self.max_reserve_attempts == 0 {
            return Err(invalid_input("max_reserve_attempts must be at least 1"));
        }

        if self.offer_ttl <= Duration::zero() {
            return Err(invalid_input("offer_ttl must be positive"));
        }

        if !(self.reference_fare.is_finite() && self.reference_fare > 0.0) {
            return Err(invalid_input("reference_fare must be positive"));
        }

        Ok(())
    }
}

fn read<T: FromStr>(key: &str) -> Result<Option<T>, Error> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid_input(format!("{} has an unparseable value {:?}", key, raw))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn read_seconds(key: &str) -> Result<Option<Duration>, Error> {
    Ok(read::<i64>(key)?.map(Duration::seconds))
}
