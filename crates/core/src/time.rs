use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{BeaconError, Result};

pub fn unix_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub fn now_unix_micros() -> i64 {
    Utc::now().timestamp_micros()
}

pub fn from_unix_micros(us: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us)
}

pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input)
        .map_err(|e| BeaconError::Parse(format!("invalid duration {input}: {e}")))
}
