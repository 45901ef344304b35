// src/gps/nmea.rs
//! NMEA sentence parsing

use super::data::PositionSample;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

/// A position fix decoded from one NMEA sentence
#[derive(Debug, Clone, PartialEq)]
pub struct NmeaFix {
    pub sample: PositionSample,
    /// Raw `hhmmss.ss` field; GGA and RMC from the same epoch share it
    pub epoch: String,
}

/// Parse a single NMEA sentence into a position fix.
///
/// Only GGA and RMC sentences with a valid fix produce a result; any talker
/// id (GP, GN, GL, ...) is accepted. A sentence whose `*hh` checksum does not
/// match is ignored.
pub fn parse_nmea_sentence(line: &str) -> Option<NmeaFix> {
    let line = line.trim();
    if !line.starts_with('$') || !verify_checksum(line) {
        return None;
    }

    let body = line.split('*').next().unwrap_or(line);
    let parts: Vec<&str> = body.split(',').collect();
    let kind = parts.first()?.get(3..)?;

    match kind {
        "GGA" => parse_gga(&parts),
        "RMC" => parse_rmc(&parts),
        _ => None,
    }
}

/// Check the XOR checksum when one is present
pub fn verify_checksum(line: &str) -> bool {
    let Some(body) = line.strip_prefix('$') else {
        return false;
    };

    match body.split_once('*') {
        Some((payload, checksum)) => {
            let expected = match u8::from_str_radix(checksum.trim(), 16) {
                Ok(value) => value,
                Err(_) => return false,
            };
            let actual = payload.bytes().fold(0u8, |acc, b| acc ^ b);
            actual == expected
        }
        None => true,
    }
}

/// Convert `ddmm.mmmm` plus hemisphere into signed decimal degrees
fn parse_coordinate(value: &str, hemisphere: &str, negative: &str) -> Option<f64> {
    if value.is_empty() || hemisphere.is_empty() {
        return None;
    }

    let raw = value.parse::<f64>().ok()?;
    let degrees = (raw / 100.0) as i32;
    let minutes = raw % 100.0;
    let mut decimal = degrees as f64 + minutes / 60.0;
    if hemisphere == negative {
        decimal = -decimal;
    }
    Some(decimal)
}

/// Parse GGA (Global Positioning System Fix Data) sentence
fn parse_gga(parts: &[&str]) -> Option<NmeaFix> {
    if parts.len() < 10 {
        return None;
    }

    // Fix quality (field 6), 0 means no fix
    let quality = parts[6].parse::<u8>().ok()?;
    if quality == 0 {
        return None;
    }

    let latitude = parse_coordinate(parts[2], parts[3], "S")?;
    let longitude = parse_coordinate(parts[4], parts[5], "W")?;

    Some(NmeaFix {
        sample: PositionSample::new(latitude, longitude),
        epoch: parts[1].to_string(),
    })
}

/// Parse RMC (Recommended Minimum Course) sentence
fn parse_rmc(parts: &[&str]) -> Option<NmeaFix> {
    if parts.len() < 10 {
        return None;
    }

    // Status (field 2), A = valid, V = void
    if parts[2] != "A" {
        return None;
    }

    let latitude = parse_coordinate(parts[3], parts[4], "S")?;
    let longitude = parse_coordinate(parts[5], parts[6], "W")?;

    let mut sample = PositionSample::new(latitude, longitude);
    if let Some(timestamp) = parse_rmc_timestamp(parts[1], parts[9]) {
        sample.timestamp = timestamp;
    }

    Some(NmeaFix {
        sample,
        epoch: parts[1].to_string(),
    })
}

fn parse_rmc_timestamp(time: &str, date: &str) -> Option<chrono::DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date, "%d%m%y").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H%M%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H%M%S"))
        .ok()?;
    Some(Utc.from_utc_datetime(&date.and_time(time)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_gpgga_parsing() {
        let gpgga = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

        let fix = parse_nmea_sentence(gpgga).unwrap();

        assert!((fix.sample.latitude - 48.1173).abs() < 1e-4);
        assert!((fix.sample.longitude - 11.516667).abs() < 1e-4);
        assert_eq!(fix.epoch, "123519");
    }

    #[test]
    fn test_southern_western_hemisphere() {
        let gngga = "$GNGGA,092750.000,5321.6802,S,00630.3372,W,1,8,1.03,61.7,M,55.2,M,,*75";

        let fix = parse_nmea_sentence(gngga).unwrap();

        assert!((fix.sample.latitude + 53.361337).abs() < 1e-4);
        assert!((fix.sample.longitude + 6.50562).abs() < 1e-4);
    }

    #[test]
    fn test_gprmc_parsing() {
        let gprmc = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";

        let fix = parse_nmea_sentence(gprmc).unwrap();

        assert!((fix.sample.latitude - 48.1173).abs() < 1e-4);
        assert_eq!(fix.sample.timestamp.year(), 1994);
        assert_eq!(fix.sample.timestamp.month(), 3);
        assert_eq!(fix.sample.timestamp.hour(), 12);
        assert_eq!(fix.epoch, "123519");
    }

    #[test]
    fn test_no_fix_sentences() {
        assert!(parse_nmea_sentence("$GPGGA,123519,,,,,0,00,,,M,,M,,*6B").is_none());
        assert!(parse_nmea_sentence("$GNRMC,083559.00,V,,,,,,,,,,N*61").is_none());
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let corrupted = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*48";
        assert!(parse_nmea_sentence(corrupted).is_none());
    }

    #[test]
    fn test_invalid_sentence() {
        assert!(parse_nmea_sentence("$INVALID,123,456").is_none());
        assert!(parse_nmea_sentence("garbage").is_none());
        assert!(parse_nmea_sentence("").is_none());
    }
}
