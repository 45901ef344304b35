// src/geo.rs
//! Coordinates and great-circle distances
//!
//! Distances use the haversine formula on a sphere of radius 6371 km. A path
//! length is the plain sum of its segment lengths; no ellipsoid or altitude
//! correction is applied.

use crate::error::{Result, TrackError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A recorded position in decimal degrees.
///
/// Serialized as a `[latitude, longitude]` pair. Construction rejects
/// non-finite or out-of-range values, so every `Coordinate` in a path is valid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "(f64, f64)", into = "(f64, f64)")]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);

        if valid {
            Ok(Self { latitude, longitude })
        } else {
            Err(TrackError::InvalidCoordinate { latitude, longitude })
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

impl TryFrom<(f64, f64)> for Coordinate {
    type Error = TrackError;

    fn try_from((latitude, longitude): (f64, f64)) -> Result<Self> {
        Self::new(latitude, longitude)
    }
}

impl From<Coordinate> for (f64, f64) {
    fn from(coordinate: Coordinate) -> Self {
        (coordinate.latitude, coordinate.longitude)
    }
}

/// Haversine distance in kilometers between two raw lat/lon pairs.
///
/// NaN inputs produce NaN.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Great-circle distance between two coordinates in kilometers
pub fn distance_km(a: &Coordinate, b: &Coordinate) -> f64 {
    haversine_km(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Sum of segment distances along a path, 0 for fewer than two points
pub fn path_distance_km(path: &[Coordinate]) -> f64 {
    if path.len() < 2 {
        return 0.0;
    }

    path.windows(2)
        .fold(0.0, |total, pair| total + distance_km(&pair[0], &pair[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[test]
    fn test_one_degree_longitude_at_equator() {
        let d = distance_km(&coord(0.0, 0.0), &coord(0.0, 1.0));
        assert!((d - 111.19492664).abs() < 1e-6, "got {}", d);
    }

    #[test]
    fn test_identical_points() {
        let a = coord(48.117, 11.517);
        assert_eq!(distance_km(&a, &a), 0.0);
    }

    #[test]
    fn test_symmetric() {
        let a = coord(42.438878, -71.119277);
        let b = coord(42.449, -71.2);
        assert!((distance_km(&a, &b) - distance_km(&b, &a)).abs() < 1e-12);
    }

    #[test]
    fn test_nan_propagates() {
        assert!(haversine_km(f64::NAN, 0.0, 0.0, 1.0).is_nan());
    }

    #[test]
    fn test_short_paths_are_zero() {
        assert_eq!(path_distance_km(&[]), 0.0);
        assert_eq!(path_distance_km(&[coord(10.0, 10.0)]), 0.0);
    }

    #[test]
    fn test_path_is_sum_of_segments() {
        let path = vec![
            coord(0.0, 0.0),
            coord(0.0, 1.0),
            coord(1.0, 1.0),
            coord(1.5, -0.5),
        ];
        let expected: f64 = distance_km(&path[0], &path[1])
            + distance_km(&path[1], &path[2])
            + distance_km(&path[2], &path[3]);

        let total = path_distance_km(&path);
        assert!((total - expected).abs() < 1e-9);
        assert!(total >= 0.0);
        // Input untouched
        assert_eq!(path.len(), 4);
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(Coordinate::new(90.5, 0.0).is_err());
        assert!(Coordinate::new(0.0, -180.1).is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
        assert!(Coordinate::new(f64::INFINITY, 0.0).is_err());
        assert!(Coordinate::new(-90.0, 180.0).is_ok());
    }

    #[test]
    fn test_serde_pair() {
        let c = coord(51.5, -0.12);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "[51.5,-0.12]");

        let back: Coordinate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);

        assert!(serde_json::from_str::<Coordinate>("[91.0,0.0]").is_err());
    }
}
