// src/tracking/events.rs
//! Tracker notifications

use super::wake_lock::WakeLockStatus;
use crate::geo::Coordinate;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Why a tracking session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    User,
    /// "Stop" answered on a reminder prompt
    PromptDeclined,
    /// Reminder prompts went unanswered
    AutoStop,
    SourceClosed,
    Shutdown,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::User => "stopped by user",
            StopReason::PromptDeclined => "stopped from reminder",
            StopReason::AutoStop => "stopped automatically",
            StopReason::SourceClosed => "position source closed",
            StopReason::Shutdown => "application shutting down",
        }
    }
}

/// A confirmation request for the prompt surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderPrompt {
    pub message: String,
    pub continue_label: String,
    pub stop_label: String,
    pub count: u8,
    pub max: u8,
}

impl ReminderPrompt {
    pub fn new(count: u8, max: u8) -> Self {
        let remaining = max.saturating_sub(count);
        let message = if remaining == 0 {
            "Are you still tracking? Tracking stops in a minute without an answer.".to_string()
        } else {
            format!(
                "Are you still tracking? (reminder {} of {})",
                count, max
            )
        };

        Self {
            message,
            continue_label: "Continue".to_string(),
            stop_label: "Stop".to_string(),
            count,
            max,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    TrackingStarted {
        started_at: DateTime<Utc>,
    },
    /// The path grew; carries the newest point rather than the whole path
    PathUpdated {
        points: usize,
        latest: Option<Coordinate>,
        distance_km: f64,
    },
    PositionRejected {
        reason: String,
    },
    PositionError {
        message: String,
    },
    PositionSourceClosed,
    CommandRejected {
        reason: String,
    },
    ReminderPrompt(ReminderPrompt),
    ReminderRescheduled {
        in_secs: u64,
    },
    TrackingStopped {
        reason: StopReason,
        points: usize,
    },
    RouteReady {
        points: usize,
        distance_km: f64,
    },
    RouteTooShort {
        points: usize,
    },
    RouteSaved {
        id: String,
        name: String,
    },
    RouteSaveFailed {
        message: String,
    },
    WakeLockChanged(WakeLockStatus),
    WakeLockUnavailable {
        reason: String,
    },
}

impl TrackerEvent {
    /// User-facing notification text, `None` for events that only drive rendering
    pub fn message(&self) -> Option<String> {
        let text = match self {
            TrackerEvent::TrackingStarted { .. } => "Starting route tracking...".to_string(),
            TrackerEvent::PathUpdated { .. } => return None,
            TrackerEvent::PositionRejected { reason } => format!("Ignored position: {}", reason),
            TrackerEvent::PositionError { message } => format!("Geolocation error: {}", message),
            TrackerEvent::PositionSourceClosed => "Position source closed.".to_string(),
            TrackerEvent::CommandRejected { reason } => reason.clone(),
            TrackerEvent::ReminderPrompt(prompt) => prompt.message.clone(),
            TrackerEvent::ReminderRescheduled { in_secs } => {
                format!("Tracking continues. Next check in {} min.", in_secs / 60)
            }
            TrackerEvent::TrackingStopped { reason, .. } => {
                format!("Route tracking stopped ({}).", reason.as_str())
            }
            TrackerEvent::RouteReady { distance_km, .. } => {
                format!("Route ready to save: {:.2} km", distance_km)
            }
            TrackerEvent::RouteTooShort { .. } => "Route too short to save.".to_string(),
            TrackerEvent::RouteSaved { name, .. } => format!("Route '{}' saved successfully!", name),
            TrackerEvent::RouteSaveFailed { message } => format!("Error saving route: {}", message),
            TrackerEvent::WakeLockChanged(status) => {
                if status.is_active {
                    "Screen will stay on while tracking.".to_string()
                } else {
                    "Screen wake lock released.".to_string()
                }
            }
            TrackerEvent::WakeLockUnavailable { reason } => {
                format!("Could not keep the screen on: {}", reason)
            }
        };
        Some(text)
    }
}

/// Broadcasts events and mirrors them into the log
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<TrackerEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: TrackerEvent) {
        match &event {
            TrackerEvent::PathUpdated {
                points,
                distance_km,
                ..
            } => {
                tracing::trace!(points, distance_km, "Path updated");
            }
            TrackerEvent::PositionError { .. }
            | TrackerEvent::RouteSaveFailed { .. }
            | TrackerEvent::WakeLockUnavailable { .. } => {
                tracing::warn!(event = ?event, "Tracker event");
            }
            _ => tracing::info!(event = ?event, "Tracker event"),
        }

        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_wording() {
        let first = ReminderPrompt::new(1, 5);
        assert_eq!(first.message, "Are you still tracking? (reminder 1 of 5)");
        assert_eq!(first.continue_label, "Continue");
        assert_eq!(first.stop_label, "Stop");

        let last = ReminderPrompt::new(5, 5);
        assert!(last.message.contains("stops in a minute"));
    }

    #[test]
    fn test_path_updates_are_silent() {
        let event = TrackerEvent::PathUpdated {
            points: 0,
            latest: None,
            distance_km: 0.0,
        };
        assert!(event.message().is_none());
        assert_eq!(
            TrackerEvent::RouteTooShort { points: 1 }.message().as_deref(),
            Some("Route too short to save.")
        );
    }

    #[test]
    fn test_sink_without_subscribers() {
        let sink = EventSink::new(4);
        sink.emit(TrackerEvent::PositionSourceClosed);

        let mut rx = sink.subscribe();
        sink.emit(TrackerEvent::RouteTooShort { points: 0 });
        assert_eq!(rx.try_recv().unwrap(), TrackerEvent::RouteTooShort { points: 0 });
    }
}
