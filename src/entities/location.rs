use chrono::{DateTime, Duration, Utc};
use geo_types::{Geometry, Point};
use serde::{Deserialize, Serialize};

use crate::error::{invalid_input, Error};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Validated constructor; rejects non-finite or out-of-range degrees.
    pub fn new(lat: f64, lng: f64) -> Result<Self, Error> {
        let coordinates = Self { lat, lng };
        coordinates.validate()?;

        Ok(coordinates)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.lat.is_finite() || !self.lng.is_finite() {
            return Err(invalid_input("coordinates must be finite"));
        }

        if self.lat.abs() > 90.0 || self.lng.abs() > 180.0 {
            return Err(invalid_input(format!(
                "coordinates ({}, {}) are out of range",
                self.lat, self.lng
            )));
        }

        Ok(())
    }
}

impl From<Coordinates> for Point<f64> {
    fn from(coordinates: Coordinates) -> Self {
        Point::new(coordinates.lng, coordinates.lat)
    }
}

impl From<Coordinates> for Geometry<f64> {
    fn from(coordinates: Coordinates) -> Self {
        Geometry::Point(coordinates.into())
    }
}

/// Last reported position of a driver.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverLocation {
    pub coordinates: Coordinates,
    pub captured_at: DateTime<Utc>,
}

impl DriverLocation {
    pub fn new(coordinates: Coordinates, captured_at: DateTime<Utc>) -> Self {
        Self {
            coordinates,
            captured_at,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.captured_at > max_age
    }
}
