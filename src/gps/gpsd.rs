// src/gps/gpsd.rs
//! GPSD client implementation

use super::data::PositionSample;
use crate::error::{Result, TrackError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::TcpStream,
};

#[derive(Debug, Deserialize)]
struct GpsdMessage {
    class: String,
    #[serde(flatten)]
    data: HashMap<String, serde_json::Value>,
}

/// Connect to a gpsd daemon and return a stream reader
pub async fn connect_gpsd(host: &str, port: u16) -> Result<BufReader<TcpStream>> {
    let mut stream = TcpStream::connect(format!("{}:{}", host, port))
        .await
        .map_err(|e| {
            TrackError::Connection(format!(
                "Failed to connect to gpsd at {}:{}: {}",
                host, port, e
            ))
        })?;

    // Send WATCH command to start receiving JSON data
    let watch_cmd = "?WATCH={\"enable\":true,\"json\":true}\n";
    stream
        .write_all(watch_cmd.as_bytes())
        .await
        .map_err(|e| TrackError::Connection(format!("Failed to send WATCH command: {}", e)))?;

    Ok(BufReader::new(stream))
}

/// Parse a single line of gpsd JSON data.
///
/// Returns a sample for TPV reports carrying a 2D or 3D fix; every other
/// message class yields `None`.
pub fn parse_gpsd_json(line: &str) -> Result<Option<PositionSample>> {
    let msg: GpsdMessage = serde_json::from_str(line)
        .map_err(|e| TrackError::Parse(format!("Failed to parse gpsd JSON: {}", e)))?;

    let sample = match msg.class.as_str() {
        "TPV" => parse_tpv_message(&msg.data),
        "VERSION" => {
            log_version_message(&msg.data);
            None
        }
        "DEVICES" => {
            log_devices_message(&msg.data);
            None
        }
        _ => None,
    };

    Ok(sample)
}

/// Parse TPV (Time Position Velocity) message
fn parse_tpv_message(msg_data: &HashMap<String, serde_json::Value>) -> Option<PositionSample> {
    let mode = msg_data.get("mode").and_then(|v| v.as_u64()).unwrap_or(0);
    if mode < 2 {
        return None;
    }

    let lat = msg_data.get("lat").and_then(|v| v.as_f64())?;
    let lon = msg_data.get("lon").and_then(|v| v.as_f64())?;

    let mut sample = PositionSample::new(lat, lon);

    if let Some(time) = msg_data
        .get("time")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    {
        sample.timestamp = time.with_timezone(&Utc);
    }

    Some(sample)
}

/// Log VERSION message (informational)
fn log_version_message(msg_data: &HashMap<String, serde_json::Value>) {
    if let Some(version) = msg_data.get("release").and_then(|v| v.as_str()) {
        tracing::info!(version, "Connected to gpsd");
    }
}

/// Log DEVICES message (informational)
fn log_devices_message(msg_data: &HashMap<String, serde_json::Value>) {
    if let Some(devices) = msg_data.get("devices").and_then(|v| v.as_array()) {
        tracing::info!(count = devices.len(), "gpsd managing devices");
        for device in devices {
            if let Some(path) = device.get("path").and_then(|v| v.as_str()) {
                tracing::debug!(path, "gpsd device");
            }
        }
    }
}
