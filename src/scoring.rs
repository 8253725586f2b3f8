//! Fixed-weight driver scoring.
//!
//! Every sub-score is normalised to [0, 1] and the weights sum to 1, so the
//! weighted total stays in [0, 1] as well. Scoring is a pure function of the
//! driver snapshot, stats, location and the ride.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Availability, DriverLocation, DriverSnapshot, DriverStats, Ride};
use crate::geometry::{distance_km, eta_minutes};

pub const DEFAULT_RATING_SCORE: f64 = 0.5;
pub const DEFAULT_ACCEPTANCE_RATE: f64 = 0.8;
pub const DEFAULT_COMPLETION_RATE: f64 = 0.5;
pub const BUSY_AVAILABILITY_SCORE: f64 = 0.3;
pub const VEHICLE_MISMATCH_SCORE: f64 = 0.3;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub distance: f64,
    pub rating: f64,
    pub acceptance_rate: f64,
    pub completion_rate: f64,
    pub availability: f64,
    pub vehicle_match: f64,
    pub earnings_potential: f64,
}

impl Weights {
    pub const DEFAULT: Weights = Weights {
        distance: 0.25,
        rating: 0.20,
        acceptance_rate: 0.15,
        completion_rate: 0.15,
        availability: 0.10,
        vehicle_match: 0.10,
        earnings_potential: 0.05,
    };

    pub fn sum(&self) -> f64 {
        self.distance
            + self.rating
            + self.acceptance_rate
            + self.completion_rate
            + self.availability
            + self.vehicle_match
            + self.earnings_potential
    }
}

impl Default for Weights {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub distance: f64,
    pub rating: f64,
    pub acceptance_rate: f64,
    pub completion_rate: f64,
    pub availability: f64,
    pub vehicle_match: f64,
    pub earnings_potential: f64,
    pub total: f64,
    pub distance_km: f64,
}

impl ScoreBreakdown {
    /// Named sub-scores, in weight order.
    pub fn components(&self) -> [(&'static str, f64); 7] {
        [
            ("distance", self.distance),
            ("rating", self.rating),
            ("acceptance_rate", self.acceptance_rate),
            ("completion_rate", self.completion_rate),
            ("availability", self.availability),
            ("vehicle_match", self.vehicle_match),
            ("earnings_potential", self.earnings_potential),
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub driver_id: Uuid,
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub breakdown: ScoreBreakdown,
}

impl ScoredCandidate {
    pub fn score(&self) -> f64 {
        self.breakdown.total
    }
}

#[derive(Clone, Debug)]
pub struct Scorer {
    weights: Weights,
    max_radius_km: f64,
    reference_fare: f64,
    average_speed_kmh: f64,
}

impl Scorer {
    pub fn new(max_radius_km: f64, reference_fare: f64, average_speed_kmh: f64) -> Self {
        Self {
            weights: Weights::DEFAULT,
            max_radius_km,
            reference_fare,
            average_speed_kmh,
        }
    }

    pub fn score(
        &self,
        driver: &DriverSnapshot,
        stats: &DriverStats,
        location: &DriverLocation,
        ride: &Ride,
    ) -> ScoreBreakdown {
        let distance_km = distance_km(location.coordinates, ride.pickup);
        let w = &self.weights;

        let distance = self.distance_score(distance_km);
        let rating = rating_score(stats);
        let acceptance_rate = acceptance_rate_score(stats);
        let completion_rate = completion_rate_score(stats);
        let availability = availability_score(driver.availability());
        let vehicle_match = vehicle_match_score(driver, ride);
        let earnings_potential = self.earnings_potential_score(ride.estimated_fare);

        let total = distance * w.distance
            + rating * w.rating
            + acceptance_rate * w.acceptance_rate
            + completion_rate * w.completion_rate
            + availability * w.availability
            + vehicle_match * w.vehicle_match
            + earnings_potential * w.earnings_potential;

        ScoreBreakdown {
            distance,
            rating,
            acceptance_rate,
            completion_rate,
            availability,
            vehicle_match,
            earnings_potential,
            total: unit(total, 0.0),
            distance_km,
        }
    }

    pub fn candidate(
        &self,
        driver: &DriverSnapshot,
        stats: &DriverStats,
        location: &DriverLocation,
        ride: &Ride,
    ) -> ScoredCandidate {
        let breakdown = self.score(driver, stats, location, ride);

        ScoredCandidate {
            driver_id: driver.id,
            distance_km: breakdown.distance_km,
            eta_minutes: eta_minutes(breakdown.distance_km, self.average_speed_kmh),
            breakdown,
        }
    }

    pub fn distance_score(&self, distance_km: f64) -> f64 {
        unit(1.0 - distance_km / self.max_radius_km, 0.0)
    }

    pub fn earnings_potential_score(&self, fare: f64) -> f64 {
        unit(fare / self.reference_fare, 0.0)
    }
}

pub fn rating_score(stats: &DriverStats) -> f64 {
    match stats.average_rating {
        Some(rating) => unit((rating - 1.0) / 4.0, DEFAULT_RATING_SCORE),
        None => DEFAULT_RATING_SCORE,
    }
}

pub fn acceptance_rate_score(stats: &DriverStats) -> f64 {
    match stats.acceptance_rate {
        Some(rate) => unit(rate, DEFAULT_ACCEPTANCE_RATE),
        None => DEFAULT_ACCEPTANCE_RATE,
    }
}

pub fn completion_rate_score(stats: &DriverStats) -> f64 {
    if stats.total_rides == 0 {
        return DEFAULT_COMPLETION_RATE;
    }

    unit(
        stats.completed_rides as f64 / stats.total_rides as f64,
        DEFAULT_COMPLETION_RATE,
    )
}

pub fn availability_score(availability: Availability) -> f64 {
    match availability {
        Availability::Free => 1.0,
        Availability::Busy => BUSY_AVAILABILITY_SCORE,
        Availability::Offline => 0.0,
    }
}

pub fn vehicle_match_score(driver: &DriverSnapshot, ride: &Ride) -> f64 {
    if driver.vehicle_class.satisfies(ride.vehicle_class) {
        1.0
    } else {
        VEHICLE_MISMATCH_SCORE
    }
}

/// Clamps to [0, 1]; non-finite inputs fall back to `fallback`.
fn unit(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

/// Highest score first; ties go to the closer driver, then the lower id.
pub fn compare(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score()
        .total_cmp(&a.score())
        .then_with(|| a.distance_km.total_cmp(&b.distance_km))
        .then_with(|| a.driver_id.cmp(&b.driver_id))
}

pub fn rank(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(compare);
}
