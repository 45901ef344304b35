// src/tracking/route.rs
//! Turning a finished path into a route ready for saving

use super::events::StopReason;
use crate::error::{Result, TrackError};
use crate::geo::{path_distance_km, Coordinate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A completed path with its endpoints and length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDraft {
    pub start: Coordinate,
    pub end: Coordinate,
    pub path: Vec<Coordinate>,
    pub distance_km: f64,
}

impl RouteDraft {
    pub fn point_count(&self) -> usize {
        self.path.len()
    }
}

/// Build a route from a path of at least two points
pub fn finalize(path: Vec<Coordinate>) -> Result<RouteDraft> {
    if path.len() < 2 {
        return Err(TrackError::RouteTooShort { points: path.len() });
    }

    let start = path[0];
    let end = path[path.len() - 1];
    let distance_km = path_distance_km(&path);
    Ok(RouteDraft {
        start,
        end,
        path,
        distance_km,
    })
}

/// A route handed to the persistence side, with session timing
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedRoute {
    pub draft: RouteDraft,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub reason: StopReason,
}

/// Live figures for the session in progress
#[derive(Debug, Clone, PartialEq)]
pub struct TrackStats {
    pub points: usize,
    pub distance_km: f64,
    pub duration: chrono::Duration,
}

impl TrackStats {
    /// Figures as of now; no start time means no elapsed time yet
    pub fn new(points: usize, distance_km: f64, started_at: Option<DateTime<Utc>>) -> Self {
        Self {
            points,
            distance_km,
            duration: started_at
                .map(|t| Utc::now().signed_duration_since(t))
                .unwrap_or_else(chrono::Duration::zero),
        }
    }

    /// Average speed in km/h, once some time has passed
    pub fn average_speed(&self) -> Option<f64> {
        let hours = self.duration.num_milliseconds() as f64 / 3_600_000.0;
        if hours > 0.0 {
            Some(self.distance_km / hours)
        } else {
            None
        }
    }
}

pub fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
