// src/tracking/mod.rs
//! Route tracking core: path accumulation, reminders, wake lock and finalizing

pub mod events;
pub mod inhibit;
pub mod path;
pub mod reminder;
pub mod route;
pub mod wake_lock;

pub use events::{EventSink, ReminderPrompt, StopReason, TrackerEvent};
pub use path::PathAccumulator;
pub use reminder::{PromptResponse, ReminderAction, ReminderScheduler, ReminderState};
pub use route::{finalize, FinishedRoute, RouteDraft, TrackStats};
pub use wake_lock::{
    NoWakeLock, Visibility, WakeLockCoordinator, WakeLockError, WakeLockOutcome, WakeLockPlatform,
    WakeLockStatus,
};
