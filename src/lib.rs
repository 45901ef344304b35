// src/lib.rs
//! Route tracking library
//!
//! Records a GPS route while tracking is on, checks every so often that the
//! user is still out there, keeps the screen awake on a best-effort basis and
//! hands the finished route to a record store. Finds (single points of
//! interest) can be logged and exported alongside routes.

pub mod config;
pub mod display;
pub mod error;
pub mod export;
pub mod geo;
pub mod gps;
pub mod store;
pub mod tracker;
pub mod tracking;

// Re-export main types for convenience
pub use config::{ReminderConfig, TrackerConfig};
pub use error::{Result, TrackError};
pub use geo::{distance_km, path_distance_km, Coordinate};
pub use gps::{GpsSource, PositionSample, PositionUpdate};
pub use store::{RecordStore, RouteArchive};
pub use tracker::{RouteSink, RouteTracker, TrackerCommand, TrackerHandle, TrackerSnapshot};
