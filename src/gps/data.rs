// src/gps/data.rs
//! Position samples delivered by a GPS source

use crate::error::Result;
use crate::geo::Coordinate;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl PositionSample {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp: Utc::now(),
        }
    }

    /// Validated coordinate for this sample
    pub fn coordinate(&self) -> Result<Coordinate> {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// What a position source can deliver
#[derive(Debug, Clone, PartialEq)]
pub enum PositionUpdate {
    Sample(PositionSample),
    Error(String),
}
