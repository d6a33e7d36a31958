//! gpsd JSON protocol parsing
//!
//! gpsd streams one JSON object per line. Only `TPV` (time-position-velocity)
//! reports carry fixes; every other class is ignored.

use carga_api::TrackingSample;
use serde::Deserialize;

/// Command that switches a gpsd connection into JSON watch mode
pub const WATCH_COMMAND: &str = "?WATCH={\"enable\":true,\"json\":true};\n";

/// Below this speed (m/s) the reported track is noise and is dropped
pub const STATIONARY_SPEED_MPS: f64 = 0.5;

/// A parsed gpsd line
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Fix(TrackingSample),
    /// TPV without a 2D/3D fix
    NoFix,
    /// Any non-TPV class (VERSION, DEVICES, WATCH, SKY, ...)
    Other,
}

#[derive(Debug, Deserialize)]
struct ClassTag {
    class: String,
}

#[derive(Debug, Deserialize)]
struct Tpv {
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    eph: Option<f64>,
    epx: Option<f64>,
    epy: Option<f64>,
    speed: Option<f64>,
    track: Option<f64>,
}

impl Tpv {
    fn into_report(self) -> Report {
        if self.mode < 2 {
            return Report::NoFix;
        }

        let (Some(latitude), Some(longitude)) = (self.lat, self.lon) else {
            return Report::NoFix;
        };

        let accuracy = self.eph.or(match (self.epx, self.epy) {
            (Some(x), Some(y)) => Some(x.max(y)),
            (x, y) => x.or(y),
        });

        let heading = match self.speed {
            Some(speed) if speed >= STATIONARY_SPEED_MPS => self.track,
            _ => None,
        };

        Report::Fix(TrackingSample {
            latitude,
            longitude,
            accuracy,
            speed: self.speed,
            heading,
        })
    }
}

/// Parse a single line from gpsd
pub fn parse_report(line: &str) -> Result<Report, serde_json::Error> {
    let tag: ClassTag = serde_json::from_str(line)?;
    if tag.class != "TPV" {
        return Ok(Report::Other);
    }

    let tpv: Tpv = serde_json::from_str(line)?;
    Ok(tpv.into_report())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_3d_fix() {
        let line = r#"{"class":"TPV","device":"/dev/ttyUSB0","mode":3,"time":"2025-03-01T15:04:05.000Z","lat":14.6349,"lon":-90.5069,"alt":1500.2,"eph":4.5,"epx":3.1,"epy":4.0,"speed":12.5,"track":271.3}"#;

        let report = parse_report(line).unwrap();
        assert_eq!(
            report,
            Report::Fix(TrackingSample {
                latitude: 14.6349,
                longitude: -90.5069,
                accuracy: Some(4.5),
                speed: Some(12.5),
                heading: Some(271.3),
            })
        );
    }

    #[test]
    fn accuracy_falls_back_to_worst_axis() {
        let line = r#"{"class":"TPV","mode":2,"lat":14.0,"lon":-90.0,"epx":3.1,"epy":7.25}"#;

        match parse_report(line).unwrap() {
            Report::Fix(sample) => assert_eq!(sample.accuracy, Some(7.25)),
            other => panic!("expected fix, got {:?}", other),
        }
    }

    #[test]
    fn heading_dropped_when_stationary() {
        let line = r#"{"class":"TPV","mode":3,"lat":14.0,"lon":-90.0,"speed":0.2,"track":123.0}"#;

        match parse_report(line).unwrap() {
            Report::Fix(sample) => {
                assert_eq!(sample.speed, Some(0.2));
                assert_eq!(sample.heading, None);
            }
            other => panic!("expected fix, got {:?}", other),
        }
    }

    #[test]
    fn heading_dropped_without_speed() {
        let line = r#"{"class":"TPV","mode":3,"lat":14.0,"lon":-90.0,"track":123.0}"#;

        match parse_report(line).unwrap() {
            Report::Fix(sample) => assert_eq!(sample.heading, None),
            other => panic!("expected fix, got {:?}", other),
        }
    }

    #[test]
    fn mode_one_is_no_fix() {
        let line = r#"{"class":"TPV","mode":1,"lat":14.0,"lon":-90.0}"#;
        assert_eq!(parse_report(line).unwrap(), Report::NoFix);
    }

    #[test]
    fn missing_coordinates_is_no_fix() {
        let line = r#"{"class":"TPV","mode":3}"#;
        assert_eq!(parse_report(line).unwrap(), Report::NoFix);
    }

    #[test]
    fn other_classes_ignored() {
        let line = r#"{"class":"VERSION","release":"3.25","rev":"3.25","proto_major":3,"proto_minor":15}"#;
        assert_eq!(parse_report(line).unwrap(), Report::Other);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_report("not json").is_err());
    }
}
