// src/error.rs
//! Error types for route tracking and record keeping

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrackError>;

#[derive(Debug, Error)]
pub enum TrackError {
    /// Operation not allowed in the current tracking state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Tracking is not active")]
    NotTracking,

    #[error("Route too short to save ({points} point(s), at least 2 required)")]
    RouteTooShort { points: usize },

    #[error("Invalid coordinate ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Error: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_too_short_message() {
        let err = TrackError::RouteTooShort { points: 1 };
        assert_eq!(
            err.to_string(),
            "Route too short to save (1 point(s), at least 2 required)"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: TrackError = io.into();
        assert!(matches!(err, TrackError::Io(_)));
        assert!(err.to_string().starts_with("IO error"));
    }
}
