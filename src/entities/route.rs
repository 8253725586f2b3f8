use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::Coordinates;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    Pickup,
    Dropoff,
}

/// One stop of a driver's multi-stop route, generated on demand from the rides
/// the driver carries.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub coordinates: Coordinates,
    pub kind: StopKind,
    pub ride_id: Uuid,
    /// In [0, 1]; older and higher-fare rides are more urgent.
    pub urgency: f64,
    pub fare: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub point: RoutePoint,
    pub distance_from_previous_km: f64,
    /// Minutes from the route start, including dwell at earlier stops.
    pub eta_minutes: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizedRoute {
    pub stops: Vec<RouteStop>,
    pub total_distance_km: f64,
    pub total_duration_minutes: u32,
    /// Sum of direct distances over route distance, in (0, 1].
    pub efficiency: f64,
    pub estimated_earnings: f64,
}

impl OptimizedRoute {
    pub fn empty() -> Self {
        Self {
            stops: vec![],
            total_distance_km: 0.0,
            total_duration_minutes: 0,
            efficiency: 1.0,
            estimated_earnings: 0.0,
        }
    }

    pub fn points(&self) -> impl Iterator<Item = &RoutePoint> {
        self.stops.iter().map(|stop| &stop.point)
    }

    /// Position of a ride's stop of the given kind, if it is on the route.
    pub fn position(&self, ride_id: Uuid, kind: StopKind) -> Option<usize> {
        self.points()
            .position(|point| point.ride_id == ride_id && point.kind == kind)
    }
}
