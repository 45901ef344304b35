// src/tracking/reminder.rs
//! "Are you still tracking?" reminders.
//!
//! The scheduler is a plain state machine: it never owns a timer itself.
//! Each state carries at most one deadline, exposed through
//! [`ReminderScheduler::deadline`], and the driver calls
//! [`ReminderScheduler::on_timer`] once that instant is reached. A deadline
//! that no longer matches the current state is simply ignored, so stale
//! wake-ups after a stop or a reschedule have no effect.
//!
//! ```text
//! Idle --start--> Waiting --due--> Prompting(1) --tick--> Prompting(2) ... Prompting(max)
//!                    ^                  |                                      |
//!                    +----continue------+                                    tick
//!                                                                              v
//!  any --stop / tracking ended / teardown--> Stopped  <--------auto-stop-------+
//! ```

use crate::config::ReminderConfig;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderState {
    Idle,
    /// Waiting for the periodic check
    Waiting { due_at: Instant },
    /// Prompts issued so far and when the next one is due
    Prompting { count: u8, next_tick_at: Instant },
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptResponse {
    Continue,
    Stop,
}

/// What the driver must do after feeding the scheduler an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderAction {
    None,
    /// Show the confirmation prompt
    Prompt { count: u8 },
    /// User confirmed; next check moved out
    Rescheduled { due_at: Instant },
    /// No answer within the prompt window; end tracking
    AutoStop,
    /// User chose to stop; end tracking
    StopRequested,
    /// Tracking had already ended elsewhere; timers dropped
    Cancelled,
}

pub struct ReminderScheduler {
    config: ReminderConfig,
    state: ReminderState,
}

impl ReminderScheduler {
    pub fn new(config: ReminderConfig) -> Self {
        Self {
            config: config.clamped(),
            state: ReminderState::Idle,
        }
    }

    pub fn state(&self) -> ReminderState {
        self.state
    }

    pub fn config(&self) -> &ReminderConfig {
        &self.config
    }

    pub fn prompt_count(&self) -> u8 {
        match self.state {
            ReminderState::Prompting { count, .. } => count,
            _ => 0,
        }
    }

    /// The single pending deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            ReminderState::Waiting { due_at } => Some(due_at),
            ReminderState::Prompting { next_tick_at, .. } => Some(next_tick_at),
            ReminderState::Idle | ReminderState::Stopped => None,
        }
    }

    /// Begin a fresh schedule, discarding whatever the previous session left
    pub fn start(&mut self, now: Instant) -> Instant {
        let due_at = now + self.config.check_interval();
        self.state = ReminderState::Waiting { due_at };
        due_at
    }

    /// Advance on a timer wake-up
    pub fn on_timer(&mut self, now: Instant, tracking: bool) -> ReminderAction {
        match self.state {
            ReminderState::Waiting { due_at } if now >= due_at => {
                if !tracking {
                    self.state = ReminderState::Stopped;
                    return ReminderAction::Cancelled;
                }
                self.state = ReminderState::Prompting {
                    count: 1,
                    next_tick_at: now + self.config.prompt_interval(),
                };
                ReminderAction::Prompt { count: 1 }
            }
            ReminderState::Prompting {
                count,
                next_tick_at,
            } if now >= next_tick_at => {
                if !tracking {
                    self.state = ReminderState::Stopped;
                    ReminderAction::Cancelled
                } else if count >= self.config.max_prompts {
                    self.state = ReminderState::Stopped;
                    ReminderAction::AutoStop
                } else {
                    let count = count + 1;
                    self.state = ReminderState::Prompting {
                        count,
                        next_tick_at: now + self.config.prompt_interval(),
                    };
                    ReminderAction::Prompt { count }
                }
            }
            // Early or stale wake-up
            _ => ReminderAction::None,
        }
    }

    /// Apply the user's answer to a prompt
    pub fn respond(&mut self, now: Instant, response: PromptResponse) -> ReminderAction {
        match self.state {
            ReminderState::Waiting { .. } | ReminderState::Prompting { .. } => match response {
                PromptResponse::Continue => {
                    let due_at = self.start(now);
                    ReminderAction::Rescheduled { due_at }
                }
                PromptResponse::Stop => {
                    self.state = ReminderState::Stopped;
                    ReminderAction::StopRequested
                }
            },
            // Late answer racing a stop
            ReminderState::Idle | ReminderState::Stopped => ReminderAction::None,
        }
    }

    /// Tracking ended through some other path
    pub fn tracking_stopped(&mut self) {
        if self.state != ReminderState::Idle {
            self.state = ReminderState::Stopped;
        }
    }

    /// Drop every pending deadline
    pub fn teardown(&mut self) {
        self.state = ReminderState::Stopped;
    }
}
