//! Parses and formats durations written the way Kubernetes API types expect them,
//! e.g. `"30s"`, `"5m"`, `"1h30m"` or `"1.5s"`.

use regex::Regex;
use std::{num::ParseFloatError, sync::OnceLock, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    ParseFloatError(#[from] ParseFloatError),
    #[error("Invalid duration unit in {0:?}")]
    InvalidUnit(String),
    #[error("Invalid duration {0:?}")]
    InvalidDuration(String),
}

enum DurationUnits {
    Hours,
    Minutes,
    Seconds,
    Millis,
    Invalid,
}

impl DurationUnits {
    fn new(unit: &str) -> Self {
        match unit {
            "h" => Self::Hours,
            "m" => Self::Minutes,
            "s" => Self::Seconds,
            "ms" => Self::Millis,
            _ => Self::Invalid,
        }
    }

    fn millis(&self) -> Option<f64> {
        match self {
            Self::Hours => Some(3_600_000.0),
            Self::Minutes => Some(60_000.0),
            Self::Seconds => Some(1_000.0),
            Self::Millis => Some(1.0),
            Self::Invalid => None,
        }
    }
}

pub fn parse(duration: &str) -> Result<Duration, ParseError> {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    let regex =
        REGEX.get_or_init(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)([[:alpha:]]+)").unwrap());

    let duration = duration.trim();
    // a bare zero is the only unitless duration
    if duration == "0" {
        return Ok(Duration::ZERO);
    }

    let mut consumed = 0;
    let mut total_millis = 0.0;
    for cap in regex.captures_iter(duration) {
        let whole = cap.get(0).ok_or_else(|| ParseError::InvalidDuration(duration.into()))?;
        if whole.start() != consumed {
            return Err(ParseError::InvalidDuration(duration.into()));
        }
        consumed = whole.end();

        let amount: f64 = cap[1].parse()?;
        let factor = DurationUnits::new(&cap[2])
            .millis()
            .ok_or_else(|| ParseError::InvalidUnit(duration.into()))?;
        total_millis += amount * factor;
    }

    if consumed == 0 || consumed != duration.len() {
        return Err(ParseError::InvalidDuration(duration.into()));
    }

    Ok(Duration::from_millis(total_millis.round() as u64))
}

/// Formats a duration as hours, minutes and seconds, omitting leading zero units.
/// Sub-second precision is kept as a decimal fraction of seconds.
pub fn format(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return "0s".into();
    }
    if millis < 1000 {
        return format!("{millis}ms");
    }

    let hours = millis / 3_600_000;
    let minutes = (millis / 60_000) % 60;
    let seconds = (millis / 1000) % 60;
    let fraction = millis % 1000;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if fraction > 0 {
        let fraction = format!("{fraction:03}");
        out.push_str(&format!("{seconds}.{}s", fraction.trim_end_matches('0')));
    } else {
        out.push_str(&format!("{seconds}s"));
    }
    out
}
