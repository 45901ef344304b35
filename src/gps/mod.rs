// src/gps/mod.rs
//! Position sources: gpsd, NMEA serial receivers and replay files

pub mod data;
pub mod gpsd;
pub mod nmea;
pub mod source;

pub use data::{PositionSample, PositionUpdate};
pub use source::{list_serial_ports, spawn_source, GpsSource};
