// src/tracker.rs
//! Route tracker coordination
//!
//! One task owns the path accumulator, the reminder scheduler and the wake
//! lock coordinator. Position updates, commands, wake-lock revocations and
//! the reminder deadline are all received in the same `select!` loop, so
//! they are handled strictly one after another.

use crate::{
    config::ReminderConfig,
    error::{Result, TrackError},
    geo::Coordinate,
    gps::PositionUpdate,
    tracking::{
        finalize, EventSink, FinishedRoute, PathAccumulator, PromptResponse, ReminderAction,
        ReminderPrompt, ReminderScheduler, ReminderState, StopReason, TrackerEvent, Visibility,
        WakeLockCoordinator, WakeLockOutcome, WakeLockPlatform, WakeLockStatus,
    },
};
use chrono::{DateTime, Utc};
use tokio::{
    sync::{broadcast, mpsc, watch},
    time::{sleep_until, Instant},
};

/// Receives finished routes for storage
pub trait RouteSink: Send {
    /// Persist the route; returns the stored id and display name
    fn save(&mut self, route: FinishedRoute) -> Result<(String, String)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerCommand {
    Start,
    Stop,
    Respond(PromptResponse),
    Visibility(Visibility),
    Shutdown,
}

/// Reminder phase without timer internals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReminderPhase {
    #[default]
    Idle,
    Waiting,
    Prompting,
    Stopped,
}

impl From<ReminderState> for ReminderPhase {
    fn from(state: ReminderState) -> Self {
        match state {
            ReminderState::Idle => ReminderPhase::Idle,
            ReminderState::Waiting { .. } => ReminderPhase::Waiting,
            ReminderState::Prompting { .. } => ReminderPhase::Prompting,
            ReminderState::Stopped => ReminderPhase::Stopped,
        }
    }
}

/// Latest tracker state for rendering
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackerSnapshot {
    pub tracking: bool,
    pub points: usize,
    pub distance_km: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub current_position: Option<Coordinate>,
    /// Fix time reported by the source for `current_position`
    pub last_fix_at: Option<DateTime<Utc>>,
    pub reminder: ReminderPhase,
    pub prompt: Option<ReminderPrompt>,
    pub wake_lock: WakeLockStatus,
    pub source_open: bool,
}

/// Cloneable front end to a running tracker
#[derive(Clone)]
pub struct TrackerHandle {
    commands: mpsc::Sender<TrackerCommand>,
    events: EventSink,
    snapshot: watch::Receiver<TrackerSnapshot>,
}

impl TrackerHandle {
    pub async fn send(&self, command: TrackerCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TrackError::Other("Tracker is no longer running".to_string()))
    }

    /// Send from a non-async context, such as an input thread
    pub fn blocking_send(&self, command: TrackerCommand) -> Result<()> {
        self.commands
            .blocking_send(command)
            .map_err(|_| TrackError::Other("Tracker is no longer running".to_string()))
    }

    pub async fn start(&self) -> Result<()> {
        self.send(TrackerCommand::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(TrackerCommand::Stop).await
    }

    pub async fn respond(&self, response: PromptResponse) -> Result<()> {
        self.send(TrackerCommand::Respond(response)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(TrackerCommand::Shutdown).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<TrackerSnapshot> {
        self.snapshot.clone()
    }
}

pub struct RouteTracker {
    accumulator: PathAccumulator,
    scheduler: ReminderScheduler,
    wake_lock: WakeLockCoordinator,
    keep_screen_on: bool,
    sink: Box<dyn RouteSink>,
    events: EventSink,
    commands: mpsc::Receiver<TrackerCommand>,
    snapshot: watch::Sender<TrackerSnapshot>,
    current_position: Option<Coordinate>,
    last_fix_at: Option<DateTime<Utc>>,
    prompt: Option<ReminderPrompt>,
    source_open: bool,
}

impl RouteTracker {
    pub fn new(
        reminders: ReminderConfig,
        keep_screen_on: bool,
        platform: Box<dyn WakeLockPlatform>,
        sink: Box<dyn RouteSink>,
    ) -> (Self, TrackerHandle) {
        let events = EventSink::new(256);
        let (command_tx, command_rx) = mpsc::channel(32);
        let (snapshot_tx, snapshot_rx) = watch::channel(TrackerSnapshot::default());

        let mut accumulator = PathAccumulator::new();
        let path_events = events.clone();
        accumulator.subscribe(move |path, distance_km| {
            path_events.emit(TrackerEvent::PathUpdated {
                points: path.len(),
                latest: path.last().copied(),
                distance_km,
            })
        });

        let tracker = Self {
            accumulator,
            scheduler: ReminderScheduler::new(reminders),
            wake_lock: WakeLockCoordinator::new(platform),
            keep_screen_on,
            sink,
            events: events.clone(),
            commands: command_rx,
            snapshot: snapshot_tx,
            current_position: None,
            last_fix_at: None,
            prompt: None,
            source_open: true,
        };
        let handle = TrackerHandle {
            commands: command_tx,
            events,
            snapshot: snapshot_rx,
        };

        (tracker, handle)
    }

    /// Run until `Shutdown` or until every handle is dropped
    pub async fn run(mut self, mut positions: mpsc::Receiver<PositionUpdate>) {
        tracing::info!("Route tracker running");
        self.publish();

        loop {
            let deadline = self.scheduler.deadline();

            tokio::select! {
                update = positions.recv(), if self.source_open => match update {
                    Some(update) => self.on_position(update),
                    None => self.on_source_closed().await,
                },
                command = self.commands.recv() => match command {
                    Some(TrackerCommand::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
                Some(handle) = self.wake_lock.next_revocation() => {
                    if self.wake_lock.on_revoked(handle) {
                        self.events.emit(TrackerEvent::WakeLockChanged(self.wake_lock.status()));
                    }
                },
                _ = wait_until(deadline) => self.on_reminder_timer().await,
            }

            self.publish();
        }

        self.teardown().await;
        self.publish();
        tracing::info!("Route tracker stopped");
    }

    fn on_position(&mut self, update: PositionUpdate) {
        let sample = match update {
            PositionUpdate::Sample(sample) => sample,
            PositionUpdate::Error(message) => {
                self.events.emit(TrackerEvent::PositionError { message });
                return;
            }
        };

        let coordinate = match sample.coordinate() {
            Ok(coordinate) => coordinate,
            Err(e) => {
                self.events.emit(TrackerEvent::PositionRejected {
                    reason: e.to_string(),
                });
                return;
            }
        };

        self.current_position = Some(coordinate);
        self.last_fix_at = Some(sample.timestamp);
        if self.accumulator.is_tracking() {
            if let Err(e) = self.accumulator.record_sample(coordinate) {
                tracing::debug!(error = %e, "Sample not recorded");
            }
        }
    }

    async fn on_source_closed(&mut self) {
        self.source_open = false;
        self.events.emit(TrackerEvent::PositionSourceClosed);
        if self.accumulator.is_tracking() {
            self.stop_tracking(StopReason::SourceClosed).await;
        }
    }

    async fn on_command(&mut self, command: TrackerCommand) {
        match command {
            TrackerCommand::Start => self.start_tracking().await,
            TrackerCommand::Stop => {
                if self.accumulator.is_tracking() {
                    self.stop_tracking(StopReason::User).await;
                } else {
                    self.events.emit(TrackerEvent::CommandRejected {
                        reason: "Tracking is not active.".to_string(),
                    });
                }
            }
            TrackerCommand::Respond(response) => self.on_prompt_response(response).await,
            TrackerCommand::Visibility(visibility) => {
                let outcome = self.wake_lock.on_visibility(visibility).await;
                self.report_wake_lock(outcome);
            }
            // Handled by the run loop
            TrackerCommand::Shutdown => {}
        }
    }

    async fn start_tracking(&mut self) {
        if let Err(e) = self.accumulator.start() {
            self.events.emit(TrackerEvent::CommandRejected {
                reason: e.to_string(),
            });
            return;
        }

        self.prompt = None;
        self.scheduler.start(Instant::now());
        self.events.emit(TrackerEvent::TrackingStarted {
            started_at: self.accumulator.started_at().unwrap_or_else(Utc::now),
        });

        if self.keep_screen_on {
            let outcome = self.wake_lock.set_enabled(true).await;
            self.report_wake_lock(outcome);
        }
    }

    /// The one way a session ends, whatever triggered it
    async fn stop_tracking(&mut self, reason: StopReason) {
        let started_at = self.accumulator.started_at();
        let path = self.accumulator.stop();
        let points = path.len();

        self.scheduler.tracking_stopped();
        self.prompt = None;
        let outcome = self.wake_lock.set_enabled(false).await;
        self.report_wake_lock(outcome);

        self.events
            .emit(TrackerEvent::TrackingStopped { reason, points });

        let draft = match finalize(path) {
            Ok(draft) => draft,
            Err(TrackError::RouteTooShort { points }) => {
                self.events.emit(TrackerEvent::RouteTooShort { points });
                return;
            }
            Err(e) => {
                self.events.emit(TrackerEvent::RouteSaveFailed {
                    message: e.to_string(),
                });
                return;
            }
        };

        self.events.emit(TrackerEvent::RouteReady {
            points: draft.point_count(),
            distance_km: draft.distance_km,
        });

        let route = FinishedRoute {
            draft,
            started_at,
            finished_at: Utc::now(),
            reason,
        };
        match self.sink.save(route) {
            Ok((id, name)) => self.events.emit(TrackerEvent::RouteSaved { id, name }),
            Err(e) => self.events.emit(TrackerEvent::RouteSaveFailed {
                message: e.to_string(),
            }),
        }
    }

    async fn on_reminder_timer(&mut self) {
        let action = self
            .scheduler
            .on_timer(Instant::now(), self.accumulator.is_tracking());

        match action {
            ReminderAction::Prompt { count } => {
                let prompt = ReminderPrompt::new(count, self.scheduler.config().max_prompts);
                self.prompt = Some(prompt.clone());
                self.events.emit(TrackerEvent::ReminderPrompt(prompt));
            }
            ReminderAction::AutoStop => {
                tracing::info!("No answer to reminders, stopping tracking");
                self.stop_tracking(StopReason::AutoStop).await;
            }
            ReminderAction::Cancelled => self.prompt = None,
            ReminderAction::None
            | ReminderAction::Rescheduled { .. }
            | ReminderAction::StopRequested => {}
        }
    }

    async fn on_prompt_response(&mut self, response: PromptResponse) {
        match self.scheduler.respond(Instant::now(), response) {
            ReminderAction::Rescheduled { due_at } => {
                self.prompt = None;
                let in_secs = due_at.saturating_duration_since(Instant::now()).as_secs();
                self.events
                    .emit(TrackerEvent::ReminderRescheduled { in_secs });
            }
            ReminderAction::StopRequested => {
                self.stop_tracking(StopReason::PromptDeclined).await;
            }
            _ => tracing::debug!(?response, "Ignoring late prompt response"),
        }
    }

    fn report_wake_lock(&mut self, outcome: WakeLockOutcome) {
        match outcome {
            WakeLockOutcome::Unchanged => {}
            WakeLockOutcome::Acquired(_) | WakeLockOutcome::Released => self
                .events
                .emit(TrackerEvent::WakeLockChanged(self.wake_lock.status())),
            WakeLockOutcome::Failed(e) => self.events.emit(TrackerEvent::WakeLockUnavailable {
                reason: e.to_string(),
            }),
        }
    }

    async fn teardown(&mut self) {
        if self.accumulator.is_tracking() {
            self.stop_tracking(StopReason::Shutdown).await;
        }
        self.scheduler.teardown();
        self.wake_lock.teardown().await;
    }

    fn publish(&self) {
        let snapshot = TrackerSnapshot {
            tracking: self.accumulator.is_tracking(),
            points: self.accumulator.len(),
            distance_km: self.accumulator.distance_km(),
            started_at: self.accumulator.started_at(),
            current_position: self.current_position,
            last_fix_at: self.last_fix_at,
            reminder: self.scheduler.state().into(),
            prompt: self.prompt.clone(),
            wake_lock: self.wake_lock.status(),
            source_open: self.source_open,
        };
        self.snapshot.send_replace(snapshot);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
