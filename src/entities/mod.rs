mod driver;
mod location;
mod offer;
mod ride;
mod route;

pub use driver::{Availability, DriverSnapshot, DriverStats, Status as DriverStatus, VehicleClass};
pub use location::{Coordinates, DriverLocation};
pub use offer::AllocationOffer;
pub use ride::{Ride, Status as RideStatus};
pub use route::{OptimizedRoute, RoutePoint, RouteStop, StopKind};
