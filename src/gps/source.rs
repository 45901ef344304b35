// src/gps/source.rs
//! Position source tasks feeding the tracker

use super::{
    data::{PositionSample, PositionUpdate},
    gpsd, nmea,
};
use crate::error::{Result, TrackError};
use std::{path::PathBuf, time::Duration};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_serial::SerialPortBuilderExt;

/// GPS data source configuration
#[derive(Debug, Clone, PartialEq)]
pub enum GpsSource {
    Serial { port: String, baudrate: u32 },
    Gpsd { host: String, port: u16 },
    Replay { path: PathBuf, interval: Duration },
}

impl GpsSource {
    pub fn describe(&self) -> String {
        match self {
            GpsSource::Serial { port, baudrate } => format!("serial {} @ {} baud", port, baudrate),
            GpsSource::Gpsd { host, port } => format!("gpsd {}:{}", host, port),
            GpsSource::Replay { path, .. } => format!("replay {}", path.display()),
        }
    }
}

/// Connect to the source and spawn a task that forwards its samples.
///
/// The task ends on EOF, on a read error (forwarded as
/// `PositionUpdate::Error`), or once the receiver is dropped. Dropping `tx`
/// at that point closes the channel.
pub async fn spawn_source(
    source: GpsSource,
    tx: mpsc::Sender<PositionUpdate>,
) -> Result<JoinHandle<()>> {
    match source {
        GpsSource::Serial { port, baudrate } => spawn_serial(&port, baudrate, tx),
        GpsSource::Gpsd { host, port } => spawn_gpsd(&host, port, tx).await,
        GpsSource::Replay { path, interval } => spawn_replay(path, interval, tx).await,
    }
}

fn spawn_serial(
    port: &str,
    baudrate: u32,
    tx: mpsc::Sender<PositionUpdate>,
) -> Result<JoinHandle<()>> {
    tracing::info!(port, baudrate, "Connecting to serial GPS");

    let serial = tokio_serial::new(port, baudrate)
        .timeout(Duration::from_millis(1000))
        .open_native_async()
        .map_err(|e| {
            TrackError::Connection(format!("Failed to open serial port {}: {}", port, e))
        })?;

    Ok(tokio::spawn(forward_nmea(BufReader::new(serial), tx)))
}

async fn spawn_gpsd(
    host: &str,
    port: u16,
    tx: mpsc::Sender<PositionUpdate>,
) -> Result<JoinHandle<()>> {
    tracing::info!(host, port, "Connecting to gpsd");
    let reader = gpsd::connect_gpsd(host, port).await?;
    Ok(tokio::spawn(forward_gpsd(reader, tx)))
}

async fn spawn_replay(
    path: PathBuf,
    interval: Duration,
    tx: mpsc::Sender<PositionUpdate>,
) -> Result<JoinHandle<()>> {
    let contents = tokio::fs::read_to_string(&path).await?;
    let samples = parse_replay(&contents)?;
    tracing::info!(path = %path.display(), points = samples.len(), "Replaying track file");

    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        for mut sample in samples {
            ticker.tick().await;
            sample.timestamp = chrono::Utc::now();
            if tx.send(PositionUpdate::Sample(sample)).await.is_err() {
                break;
            }
        }
    }))
}

/// Forward NMEA fixes, one per epoch
async fn forward_nmea<R>(mut reader: R, tx: mpsc::Sender<PositionUpdate>)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut last_epoch: Option<String> = None;

    loop {
        buf.clear();
        // Not read_line: line noise is not UTF-8 and must not end the stream
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break, // EOF
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let Some(fix) = nmea::parse_nmea_sentence(&line) else {
                    continue;
                };
                if last_epoch.as_deref() == Some(fix.epoch.as_str()) {
                    continue;
                }
                last_epoch = Some(fix.epoch);
                if tx.send(PositionUpdate::Sample(fix.sample)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Error reading from serial port");
                let _ = tx
                    .send(PositionUpdate::Error(format!("Serial read failed: {}", e)))
                    .await;
                break;
            }
        }
    }
}

async fn forward_gpsd<R>(mut reader: R, tx: mpsc::Sender<PositionUpdate>)
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match gpsd::parse_gpsd_json(line) {
                    Ok(Some(sample)) => {
                        if tx.send(PositionUpdate::Sample(sample)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!(error = %e, "Skipping gpsd line"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Error reading from gpsd");
                let _ = tx
                    .send(PositionUpdate::Error(format!("gpsd read failed: {}", e)))
                    .await;
                break;
            }
        }
    }
}

/// Parse `latitude,longitude` lines of a replay file
pub fn parse_replay(contents: &str) -> Result<Vec<PositionSample>> {
    let mut samples = Vec::new();
    let mut header_seen = false;

    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split(',').map(str::trim);
        let (Some(lat), Some(lon)) = (fields.next(), fields.next()) else {
            return Err(TrackError::Parse(format!(
                "Line {}: expected latitude,longitude",
                index + 1
            )));
        };

        match (lat.parse::<f64>(), lon.parse::<f64>()) {
            (Ok(lat), Ok(lon)) => samples.push(PositionSample::new(lat, lon)),
            // Header row
            _ if samples.is_empty() && !header_seen => header_seen = true,
            _ => {
                return Err(TrackError::Parse(format!(
                    "Line {}: invalid number in '{}'",
                    index + 1,
                    line
                )))
            }
        }
    }

    Ok(samples)
}

/// List available serial ports
pub fn list_serial_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| TrackError::Other(format!("Failed to list serial ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .map(|port| format!("{} - {:?}", port.port_name, port.port_type))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_replay() {
        let contents = "latitude,longitude\n# comment\n\n0.0,0.0\n 0.0 , 1.0 \n";
        let samples = parse_replay(contents).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].longitude, 1.0);
    }

    #[test]
    fn test_parse_replay_bad_line() {
        assert!(parse_replay("0.0,0.0\nabc,1.0\n").is_err());
        assert!(parse_replay("0.0\n").is_err());
    }

    #[tokio::test]
    async fn test_forward_nmea_one_sample_per_epoch() {
        let input = concat!(
            "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\n",
            "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\n",
            "$GPGSV,3,1,12,01,40,083,46,02,17,308,41,12,07,344,39,14,22,228,45*75\n",
        );
        let (tx, mut rx) = mpsc::channel(8);

        forward_nmea(BufReader::new(input.as_bytes()), tx).await;

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, PositionUpdate::Sample(_)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_forward_nmea_survives_line_noise() {
        let mut input = b"\xff\xfe noise\n".to_vec();
        input.extend_from_slice(
            b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\n",
        );
        let (tx, mut rx) = mpsc::channel(8);

        forward_nmea(BufReader::new(input.as_slice()), tx).await;

        match rx.recv().await.unwrap() {
            PositionUpdate::Sample(sample) => assert!((sample.latitude - 48.1173).abs() < 1e-4),
            other => panic!("unexpected update {:?}", other),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_forward_gpsd_skips_noise() {
        let input = concat!(
            "{\"class\":\"VERSION\",\"release\":\"3.25\"}\n",
            "not json\n",
            "{\"class\":\"TPV\",\"mode\":2,\"lat\":1.5,\"lon\":2.5}\n",
        );
        let (tx, mut rx) = mpsc::channel(8);

        forward_gpsd(BufReader::new(input.as_bytes()), tx).await;

        match rx.recv().await.unwrap() {
            PositionUpdate::Sample(sample) => assert_eq!(sample.latitude, 1.5),
            other => panic!("unexpected update {:?}", other),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_source_closes_when_done() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("walk.csv");
        std::fs::write(&path, "0.0,0.0\n0.0,0.5\n0.0,1.0\n").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let source = GpsSource::Replay {
            path,
            interval: Duration::from_secs(1),
        };
        spawn_source(source, tx).await.unwrap();

        let mut count = 0;
        while let Some(update) = rx.recv().await {
            assert!(matches!(update, PositionUpdate::Sample(_)));
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
