// src/tracking/path.rs
//! Ordered accumulation of position samples during a tracking session

use crate::error::{Result, TrackError};
use crate::geo::{distance_km, Coordinate};
use chrono::{DateTime, Utc};

/// Callback invoked with the whole path and its length in km after every change
pub type PathObserver = Box<dyn Fn(&[Coordinate], f64) + Send + Sync>;

/// Append-only path recorder.
///
/// The path is empty whenever tracking is off. Samples are kept exactly in
/// delivery order; nothing is filtered, merged or reordered. The length is
/// kept as a running sum so long sessions stay cheap to observe.
pub struct PathAccumulator {
    tracking: bool,
    path: Vec<Coordinate>,
    distance_km: f64,
    started_at: Option<DateTime<Utc>>,
    observers: Vec<PathObserver>,
}

impl PathAccumulator {
    pub fn new() -> Self {
        Self {
            tracking: false,
            path: Vec::new(),
            distance_km: 0.0,
            started_at: None,
            observers: Vec::new(),
        }
    }

    /// Register an observer for live path rendering
    pub fn subscribe<F>(&mut self, observer: F)
    where
        F: Fn(&[Coordinate], f64) + Send + Sync + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    pub fn start(&mut self) -> Result<()> {
        if self.tracking {
            return Err(TrackError::InvalidState(
                "tracking is already active".to_string(),
            ));
        }

        self.path.clear();
        self.distance_km = 0.0;
        self.tracking = true;
        self.started_at = Some(Utc::now());
        self.notify();
        Ok(())
    }

    /// Append a sample; returns the new path length
    pub fn record_sample(&mut self, coordinate: Coordinate) -> Result<usize> {
        if !self.tracking {
            return Err(TrackError::NotTracking);
        }

        if let Some(last) = self.path.last() {
            self.distance_km += distance_km(last, &coordinate);
        }
        self.path.push(coordinate);
        self.notify();
        Ok(self.path.len())
    }

    /// End the session and hand back the recorded path.
    ///
    /// Returns an empty path when tracking was not active.
    pub fn stop(&mut self) -> Vec<Coordinate> {
        self.tracking = false;
        self.started_at = None;
        self.distance_km = 0.0;
        std::mem::take(&mut self.path)
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub fn path(&self) -> &[Coordinate] {
        &self.path
    }

    /// Length of the current path in km
    pub fn distance_km(&self) -> f64 {
        self.distance_km
    }

    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    fn notify(&self) {
        for observer in &self.observers {
            observer(&self.path, self.distance_km);
        }
    }
}

impl Default for PathAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[test]
    fn test_start_resets_path() {
        let mut acc = PathAccumulator::new();
        acc.start().unwrap();
        acc.record_sample(coord(1.0, 1.0)).unwrap();
        acc.record_sample(coord(2.0, 2.0)).unwrap();
        let first = acc.stop();
        assert_eq!(first.len(), 2);

        acc.start().unwrap();
        assert_eq!(acc.len(), 0);
        assert!(acc.is_tracking());
        assert!(acc.started_at().is_some());
    }

    #[test]
    fn test_double_start_rejected() {
        let mut acc = PathAccumulator::new();
        acc.start().unwrap();
        acc.record_sample(coord(1.0, 1.0)).unwrap();

        let err = acc.start().unwrap_err();
        assert!(matches!(err, TrackError::InvalidState(_)));
        // Existing session untouched
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn test_sample_while_idle_rejected() {
        let mut acc = PathAccumulator::new();
        assert!(matches!(
            acc.record_sample(coord(1.0, 1.0)),
            Err(TrackError::NotTracking)
        ));
        assert!(acc.is_empty());
    }

    #[test]
    fn test_order_preserved_and_snapshot_survives_reset() {
        let mut acc = PathAccumulator::new();
        acc.start().unwrap();
        let points = [coord(0.0, 0.0), coord(0.0, 0.0), coord(-1.0, 3.0)];
        for p in points {
            acc.record_sample(p).unwrap();
        }

        let snapshot = acc.stop();
        assert_eq!(snapshot, points.to_vec());
        assert!(!acc.is_tracking());
        assert!(acc.is_empty());

        acc.start().unwrap();
        acc.record_sample(coord(5.0, 5.0)).unwrap();
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn test_running_distance_matches_path() {
        let mut acc = PathAccumulator::new();
        acc.start().unwrap();
        assert_eq!(acc.distance_km(), 0.0);
        for p in [coord(0.0, 0.0), coord(0.0, 1.0), coord(1.0, 1.0), coord(1.0, 1.0)] {
            acc.record_sample(p).unwrap();
        }
        assert!((acc.distance_km() - crate::geo::path_distance_km(acc.path())).abs() < 1e-9);

        acc.stop();
        assert_eq!(acc.distance_km(), 0.0);
    }

    #[test]
    fn test_observers_see_each_append() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut acc = PathAccumulator::new();
        let sink = Arc::clone(&seen);
        acc.subscribe(move |path, _| sink.lock().unwrap().push(path.len()));

        acc.start().unwrap();
        acc.record_sample(coord(1.0, 1.0)).unwrap();
        acc.record_sample(coord(1.0, 2.0)).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }
}
