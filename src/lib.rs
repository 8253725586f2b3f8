pub mod api;
pub mod clock;
pub mod config;
pub mod engine;
pub mod entities;
pub mod error;
pub mod external;
pub mod geometry;
pub mod routing;
pub mod scoring;
pub mod store;

pub mod simulation;
