//! Great-circle helpers shared by the scoring engine and the route sequencer.

use crate::entities::Coordinates;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Floor applied to every ETA so very short hops never report zero minutes.
pub const MIN_ETA_MINUTES: u32 = 5;

const MIN_SPEED_KMH: f64 = 1.0;

/// Haversine distance in kilometers.
pub fn distance_km(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Initial bearing from `a` to `b` in degrees, normalised to [0, 360).
pub fn bearing(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let y = delta_lng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lng.cos();

    let degrees = y.atan2(x).to_degrees().rem_euclid(360.0);

    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if degrees >= 360.0 {
        0.0
    } else {
        degrees
    }
}

/// Smallest angle between two bearings, in [0, 180].
pub fn bearing_difference(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    diff.min(360.0 - diff)
}

pub fn eta_minutes(distance_km: f64, avg_speed_kmh: f64) -> u32 {
    let speed = if avg_speed_kmh.is_finite() {
        avg_speed_kmh.max(MIN_SPEED_KMH)
    } else {
        MIN_SPEED_KMH
    };

    let minutes = (distance_km.max(0.0) / speed) * 60.0;

    if !minutes.is_finite() || minutes >= u32::MAX as f64 {
        return u32::MAX;
    }

    (minutes as u32).max(MIN_ETA_MINUTES)
}

/// Moves `from` due north by `km` along its meridian. Test fixtures use this to
/// place drivers at exact haversine distances.
pub fn offset_north(from: Coordinates, km: f64) -> Coordinates {
    Coordinates {
        lat: from.lat + (km / EARTH_RADIUS_KM).to_degrees(),
        lng: from.lng,
    }
}

/// Moves `from` due east by `km` along its parallel (approximately).
pub fn offset_east(from: Coordinates, km: f64) -> Coordinates {
    let lat = from.lat.to_radians();
    Coordinates {
        lat: from.lat,
        lng: from.lng + (km / (EARTH_RADIUS_KM * lat.cos())).to_degrees(),
    }
}
