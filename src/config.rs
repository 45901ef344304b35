// src/config.rs
//! Configuration management with file-based storage

use crate::error::{Result, TrackError};
use crate::gps::GpsSource;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Timings for the "are you still tracking?" reminders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    pub check_interval_secs: u64,
    pub prompt_interval_secs: u64,
    pub max_prompts: u8,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 3600,
            prompt_interval_secs: 60,
            max_prompts: 5,
        }
    }
}

/// Longest interval the scheduler accepts, one year
pub const MAX_REMINDER_INTERVAL_SECS: u64 = 365 * 24 * 3600;

impl ReminderConfig {
    /// Intervals within 1 s..=one year and at least one prompt
    pub fn clamped(self) -> Self {
        Self {
            check_interval_secs: self.check_interval_secs.clamp(1, MAX_REMINDER_INTERVAL_SECS),
            prompt_interval_secs: self.prompt_interval_secs.clamp(1, MAX_REMINDER_INTERVAL_SECS),
            max_prompts: self.max_prompts.max(1),
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn prompt_interval(&self) -> Duration {
        Duration::from_secs(self.prompt_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub source_type: String, // "gpsd", "serial", "replay"
    pub serial_port: Option<String>,
    pub serial_baudrate: Option<u32>,
    pub gpsd_host: Option<String>,
    pub gpsd_port: Option<u16>,
    pub replay_file: Option<PathBuf>,
    pub replay_interval_ms: Option<u64>,
    pub reminders: ReminderConfig,
    pub keep_screen_on: bool,
    pub store_path: Option<PathBuf>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            source_type: "gpsd".to_string(),
            serial_port: None,
            serial_baudrate: Some(9600),
            gpsd_host: Some("localhost".to_string()),
            gpsd_port: Some(2947),
            replay_file: None,
            replay_interval_ms: Some(1000),
            reminders: ReminderConfig::default(),
            keep_screen_on: true,
            store_path: None,
        }
    }
}

impl TrackerConfig {
    /// Load configuration, falling back to defaults when no file exists
    pub fn load_from(config_path: &std::path::Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(config_path)
            .map_err(|e| TrackError::Other(format!("Failed to read config file: {}", e)))?;

        let mut config: Self = serde_json::from_str(&contents)
            .map_err(|e| TrackError::Other(format!("Failed to parse config file: {}", e)))?;
        config.reminders = config.reminders.clamped();

        Ok(config)
    }

    pub fn save_to(&self, config_path: &std::path::Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TrackError::Other(format!("Failed to create config directory: {}", e))
            })?;
        }

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| TrackError::Other(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(config_path, contents)
            .map_err(|e| TrackError::Other(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    fn home_dir() -> Result<PathBuf> {
        std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| TrackError::Other("HOME environment variable not set".to_string()))
    }

    pub fn get_config_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?
            .join(".config")
            .join("dtracked")
            .join("config.json"))
    }

    /// Record file location, `~/.local/share/dtracked/records.json` unless configured
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::home_dir()?
                .join(".local")
                .join("share")
                .join("dtracked")
                .join("records.json")),
        }
    }

    /// Update serial port settings
    pub fn update_serial(&mut self, port: String, baudrate: u32) {
        self.source_type = "serial".to_string();
        self.serial_port = Some(port);
        self.serial_baudrate = Some(baudrate);
    }

    /// Update gpsd settings
    pub fn update_gpsd(&mut self, host: String, port: u16) {
        self.source_type = "gpsd".to_string();
        self.gpsd_host = Some(host);
        self.gpsd_port = Some(port);
    }

    /// Update replay settings
    pub fn update_replay(&mut self, file: PathBuf, interval_ms: u64) {
        self.source_type = "replay".to_string();
        self.replay_file = Some(file);
        self.replay_interval_ms = Some(interval_ms);
    }

    /// Resolve the configured position source
    pub fn gps_source(&self) -> Result<GpsSource> {
        match self.source_type.as_str() {
            "gpsd" => Ok(GpsSource::Gpsd {
                host: self.gpsd_host.clone().unwrap_or_else(|| "localhost".to_string()),
                port: self.gpsd_port.unwrap_or(2947),
            }),
            "serial" => {
                let port = self.serial_port.clone().ok_or_else(|| {
                    TrackError::Other("Serial source selected but no serial port set".to_string())
                })?;
                Ok(GpsSource::Serial {
                    port,
                    baudrate: self.serial_baudrate.unwrap_or(9600),
                })
            }
            "replay" => {
                let path = self.replay_file.clone().ok_or_else(|| {
                    TrackError::Other("Replay source selected but no replay file set".to_string())
                })?;
                Ok(GpsSource::Replay {
                    path,
                    interval: Duration::from_millis(self.replay_interval_ms.unwrap_or(1000)),
                })
            }
            other => Err(TrackError::Other(format!("Unknown source type: {}", other))),
        }
    }
}
