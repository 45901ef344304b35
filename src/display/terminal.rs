// src/display/terminal.rs
//! Terminal status view and input for a running tracker

use crate::{
    error::Result,
    geo::Coordinate,
    tracker::{ReminderPhase, TrackerCommand, TrackerHandle, TrackerSnapshot},
    tracking::{route::format_duration, PromptResponse, TrackStats, TrackerEvent, Visibility},
};
use chrono::{DateTime, Local, Utc};
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{
        self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers,
    },
    execute, queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{
        disable_raw_mode, enable_raw_mode, Clear, ClearType, DisableLineWrap, EnableLineWrap,
        EnterAlternateScreen, LeaveAlternateScreen,
    },
};
use std::{
    collections::VecDeque,
    io::{self, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
    time::interval,
};

const MAX_NOTIFICATIONS: usize = 5;

/// What a key press asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Command(TrackerCommand),
    Quit,
}

/// Map a key to an action; `s` answers the prompt while one is shown
pub fn key_action(key: &KeyEvent, prompt_active: bool) -> Option<KeyAction> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(KeyAction::Quit);
    }

    match key.code {
        KeyCode::Char('t') => Some(KeyAction::Command(TrackerCommand::Start)),
        KeyCode::Char('s') if prompt_active => Some(KeyAction::Command(
            TrackerCommand::Respond(PromptResponse::Stop),
        )),
        KeyCode::Char('s') => Some(KeyAction::Command(TrackerCommand::Stop)),
        KeyCode::Char('c') => Some(KeyAction::Command(TrackerCommand::Respond(
            PromptResponse::Continue,
        ))),
        KeyCode::Char('q') | KeyCode::Esc => Some(KeyAction::Quit),
        _ => None,
    }
}

/// Restores the terminal however the view exits
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(e) = execute!(
            stdout,
            EnterAlternateScreen,
            Hide,
            DisableLineWrap,
            EnableFocusChange
        ) {
            let _ = disable_raw_mode();
            return Err(e.into());
        }
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = execute!(
            stdout,
            DisableFocusChange,
            EnableLineWrap,
            Show,
            LeaveAlternateScreen
        );
        let _ = disable_raw_mode();
    }
}

pub struct TerminalDisplay {
    source_label: String,
}

impl TerminalDisplay {
    pub fn new(source_label: impl Into<String>) -> Self {
        Self {
            source_label: source_label.into(),
        }
    }

    /// Run the status view until the user quits or the tracker goes away
    pub async fn run(&self, handle: TrackerHandle) -> Result<()> {
        let mut events = handle.subscribe();
        let mut snapshots = handle.watch();
        let running = Arc::new(AtomicBool::new(true));
        let prompt_active = Arc::new(AtomicBool::new(false));
        let mut notifications: VecDeque<String> = VecDeque::new();

        let _guard = TerminalGuard::enter()?;
        let input = spawn_input_thread(
            handle.clone(),
            Arc::clone(&running),
            Arc::clone(&prompt_active),
        );

        let mut ticker = interval(Duration::from_secs(1));
        let mut stdout = io::stdout();

        while running.load(Ordering::Relaxed) {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => push_notification(&mut notifications, &event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Display fell behind tracker events");
                    }
                    Err(RecvError::Closed) => break,
                },
            }

            let snapshot = snapshots.borrow().clone();
            prompt_active.store(snapshot.prompt.is_some(), Ordering::Relaxed);
            render(&mut stdout, &self.source_label, &snapshot, &notifications)?;
        }

        running.store(false, Ordering::Relaxed);
        // A closed channel just means the tracker already ended
        let _ = handle.shutdown().await;
        if input.join().is_err() {
            tracing::warn!("Input thread panicked");
        }
        Ok(())
    }
}

fn spawn_input_thread(
    handle: TrackerHandle,
    running: Arc<AtomicBool>,
    prompt_active: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        while running.load(Ordering::Relaxed) {
            match event::poll(Duration::from_millis(200)) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Terminal input failed");
                    break;
                }
            }

            let command = match event::read() {
                Ok(Event::Key(key)) => {
                    match key_action(&key, prompt_active.load(Ordering::Relaxed)) {
                        Some(KeyAction::Command(command)) => command,
                        Some(KeyAction::Quit) => {
                            running.store(false, Ordering::Relaxed);
                            TrackerCommand::Shutdown
                        }
                        None => continue,
                    }
                }
                Ok(Event::FocusGained) => TrackerCommand::Visibility(Visibility::Visible),
                Ok(Event::FocusLost) => TrackerCommand::Visibility(Visibility::Hidden),
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "Terminal input failed");
                    break;
                }
            };

            if handle.blocking_send(command).is_err() {
                break;
            }
        }
        running.store(false, Ordering::Relaxed);
    })
}

fn push_notification(notifications: &mut VecDeque<String>, event: &TrackerEvent) {
    if let Some(message) = event.message() {
        if notifications.len() == MAX_NOTIFICATIONS {
            notifications.pop_front();
        }
        notifications.push_back(format!("{} {}", Local::now().format("%H:%M:%S"), message));
    }
}

fn format_position(position: Option<Coordinate>, fix_at: Option<DateTime<Utc>>) -> String {
    match (position, fix_at) {
        (Some(c), Some(at)) => {
            let age = Utc::now().signed_duration_since(at).num_seconds().max(0);
            format!("{:.6}, {:.6}  (fix {}s ago)", c.latitude(), c.longitude(), age)
        }
        (Some(c), None) => format!("{:.6}, {:.6}", c.latitude(), c.longitude()),
        (None, _) => "Waiting for position...".to_string(),
    }
}

fn reminder_label(phase: ReminderPhase) -> &'static str {
    match phase {
        ReminderPhase::Idle => "idle",
        ReminderPhase::Waiting => "waiting for next check",
        ReminderPhase::Prompting => "waiting for your answer",
        ReminderPhase::Stopped => "stopped",
    }
}

/// Draw one frame; raw mode needs explicit `\r\n`
fn render(
    out: &mut impl Write,
    source_label: &str,
    snapshot: &TrackerSnapshot,
    notifications: &VecDeque<String>,
) -> Result<()> {
    queue!(
        out,
        Clear(ClearType::All),
        MoveTo(0, 0),
        SetForegroundColor(Color::Green),
        Print("=".repeat(60)),
        Print("\r\ndtracked - route tracking\r\n"),
        Print("=".repeat(60)),
        Print("\r\n"),
        ResetColor,
        Print(format!("Source:    {}\r\n", source_label)),
        Print(format!(
            "Position:  {}\r\n\r\n",
            format_position(snapshot.current_position, snapshot.last_fix_at)
        )),
    )?;

    if snapshot.tracking {
        let stats = TrackStats::new(snapshot.points, snapshot.distance_km, snapshot.started_at);
        let speed = stats
            .average_speed()
            .map_or("-".to_string(), |s| format!("{:.1} km/h", s));

        queue!(
            out,
            SetForegroundColor(Color::Yellow),
            Print("TRACKING\r\n"),
            ResetColor,
            Print(format!("  Points:   {}\r\n", stats.points)),
            Print(format!("  Distance: {:.2} km\r\n", stats.distance_km)),
            Print(format!("  Elapsed:  {}\r\n", format_duration(stats.duration))),
            Print(format!("  Avg:      {}\r\n", speed)),
        )?;
    } else {
        queue!(
            out,
            SetForegroundColor(Color::Cyan),
            Print("NOT TRACKING\r\n"),
            ResetColor
        )?;
    }

    let wake_lock = match (snapshot.wake_lock.is_supported, snapshot.wake_lock.is_active) {
        (false, _) => "unsupported",
        (true, true) => "active",
        (true, false) => "inactive",
    };
    queue!(
        out,
        Print(format!("  Reminder: {}\r\n", reminder_label(snapshot.reminder))),
        Print(format!("  Screen:   {}\r\n", wake_lock)),
    )?;
    if !snapshot.source_open {
        queue!(
            out,
            SetForegroundColor(Color::Red),
            Print("  Position source closed\r\n"),
            ResetColor
        )?;
    }

    if let Some(prompt) = &snapshot.prompt {
        queue!(
            out,
            Print("\r\n"),
            SetForegroundColor(Color::Magenta),
            Print(format!("{}\r\n", prompt.message)),
            Print(format!(
                "  [c] {}    [s] {}\r\n",
                prompt.continue_label, prompt.stop_label
            )),
            ResetColor
        )?;
    }

    if !notifications.is_empty() {
        queue!(out, Print("\r\n"))?;
        for line in notifications {
            queue!(out, Print(format!("{}\r\n", line)))?;
        }
    }

    queue!(
        out,
        Print("\r\n"),
        SetForegroundColor(Color::Green),
        Print("[t] start  [s] stop  [c] continue  [q] quit\r\n"),
        ResetColor
    )?;
    out.flush()?;
    Ok(())
}

/// Line-oriented mode: notifications on stdout, commands on stdin
pub async fn run_headless(handle: TrackerHandle) -> Result<()> {
    let mut events = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(message) = event.message() {
                        println!("{} {}", Local::now().format("%H:%M:%S"), message);
                    }
                    if let TrackerEvent::ReminderPrompt(_) = event {
                        println!("  answer with 'c' to continue or 's' to stop");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Headless output fell behind tracker events");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let prompt_active = handle.snapshot().prompt.is_some();
                    match headless_command(line.trim(), prompt_active) {
                        Some(KeyAction::Command(command)) => handle.send(command).await?,
                        Some(KeyAction::Quit) => break,
                        None => println!("commands: t (start), s (stop), c (continue), q (quit)"),
                    }
                }
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    }

    let _ = handle.shutdown().await;
    Ok(())
}

fn headless_command(line: &str, prompt_active: bool) -> Option<KeyAction> {
    let mut chars = line.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => key_action(
            &KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE),
            prompt_active,
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::ReminderPrompt;

    fn key(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)
    }

    #[test]
    fn test_stop_key_answers_prompt() {
        assert_eq!(
            key_action(&key('s'), false),
            Some(KeyAction::Command(TrackerCommand::Stop))
        );
        assert_eq!(
            key_action(&key('s'), true),
            Some(KeyAction::Command(TrackerCommand::Respond(
                PromptResponse::Stop
            )))
        );
        assert_eq!(
            key_action(&key('c'), true),
            Some(KeyAction::Command(TrackerCommand::Respond(
                PromptResponse::Continue
            )))
        );
        assert_eq!(
            key_action(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL), false),
            Some(KeyAction::Quit)
        );
        assert_eq!(key_action(&key('x'), false), None);
    }

    #[test]
    fn test_headless_commands() {
        assert_eq!(
            headless_command("t", false),
            Some(KeyAction::Command(TrackerCommand::Start))
        );
        assert_eq!(headless_command("q", false), Some(KeyAction::Quit));
        assert_eq!(headless_command("stop", false), None);
        assert_eq!(headless_command("", false), None);
    }

    #[test]
    fn test_render_tracking_with_prompt() {
        let snapshot = TrackerSnapshot {
            tracking: true,
            points: 2,
            distance_km: 111.19492664,
            started_at: Some(Utc::now()),
            current_position: Coordinate::new(0.0, 1.0).ok(),
            last_fix_at: Some(Utc::now() - chrono::Duration::seconds(30)),
            reminder: ReminderPhase::Prompting,
            prompt: Some(ReminderPrompt::new(1, 5)),
            source_open: true,
            ..TrackerSnapshot::default()
        };
        let mut notifications = VecDeque::new();
        push_notification(&mut notifications, &TrackerEvent::PositionSourceClosed);
        push_notification(
            &mut notifications,
            &TrackerEvent::PathUpdated {
                points: 2,
                latest: None,
                distance_km: 111.19492664,
            },
        );

        let mut out = Vec::new();
        render(&mut out, "replay test.csv", &snapshot, &notifications).unwrap();
        let text = String::from_utf8_lossy(&out);

        assert!(text.contains("Distance: 111.19 km"));
        assert!(text.contains("0.000000, 1.000000  (fix 3"));
        assert!(text.contains("Are you still tracking? (reminder 1 of 5)"));
        assert!(text.contains("[c] Continue    [s] Stop"));
        assert!(text.contains("Position source closed."));
        assert_eq!(notifications.len(), 1);
    }

    #[test]
    fn test_notifications_are_bounded() {
        let mut notifications = VecDeque::new();
        for points in 0..8 {
            push_notification(&mut notifications, &TrackerEvent::RouteTooShort { points });
        }
        assert_eq!(notifications.len(), MAX_NOTIFICATIONS);
    }
}
