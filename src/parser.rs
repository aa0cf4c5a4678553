//! Field parsing for canonical (already cleaned) rows.
//!
//! Every field parses independently: a malformed value becomes `None` for
//! that field only, and the rest of the record is still used.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::join::types::{Position, TrafficSample, WorkEvent};

/// A row of a clean traffic partition. Unused columns are ignored.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct TrafficRow {
    pub segment_id: String,
    pub ts: Option<String>,
    pub flow_per_min: Option<String>,
    pub status: Option<String>,
    pub lat: Option<String>,
    pub lon: Option<String>,
}

/// A row of a clean works partition. Unused columns are ignored.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct WorkRow {
    pub work_id: String,
    pub start_ts: Option<String>,
    pub end_ts: Option<String>,
    pub impact: Option<String>,
    pub level: Option<String>,
    pub lat: Option<String>,
    pub lon: Option<String>,
}

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Parses a timestamp or a bare date, keeping its original offset.
///
/// A trailing `Z` means UTC. Values without an offset are taken as UTC; a
/// bare `YYYY-MM-DD` is midnight UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let normalized = match value.strip_suffix('Z').or_else(|| value.strip_suffix('z')) {
        Some(head) => format!("{head}+00:00"),
        None => value.to_string(),
    };

    for fmt in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(&normalized, fmt) {
            return Some(ts);
        }
    }

    let utc = FixedOffset::east_opt(0)?;
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, fmt) {
            return Some(naive.and_utc().with_timezone(&utc));
        }
    }

    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().with_timezone(&utc))
}

/// Calendar date of a timestamp in its own offset.
pub fn parse_local_date(value: Option<&str>) -> Option<NaiveDate> {
    non_blank(value)
        .and_then(parse_timestamp)
        .map(|ts| ts.date_naive())
}

/// Timestamp converted to UTC.
pub fn parse_utc(value: Option<&str>) -> Option<DateTime<Utc>> {
    non_blank(value)
        .and_then(parse_timestamp)
        .map(|ts| ts.with_timezone(&Utc))
}

/// Parses a finite decimal number.
pub fn parse_number(value: Option<&str>) -> Option<f64> {
    non_blank(value)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Builds a position when both coordinates parse and lie in WGS84 range.
pub fn parse_position(lat: Option<&str>, lon: Option<&str>) -> Option<Position> {
    let lat = parse_number(lat).filter(|v| (-90.0..=90.0).contains(v));
    let lon = parse_number(lon).filter(|v| (-180.0..=180.0).contains(v));
    Position::from_parts(lat, lon)
}

impl From<TrafficRow> for TrafficSample {
    fn from(row: TrafficRow) -> Self {
        TrafficSample {
            timestamp: parse_utc(row.ts.as_deref()),
            flow_per_min: parse_number(row.flow_per_min.as_deref()),
            status: non_blank(row.status.as_deref()).map(str::to_string),
            position: parse_position(row.lat.as_deref(), row.lon.as_deref()),
            segment_id: row.segment_id,
        }
    }
}

impl WorkRow {
    /// Converts to a [`WorkEvent`]; `None` when the row has no identifier.
    pub fn into_event(self) -> Option<WorkEvent> {
        let work_id = self.work_id.trim();
        if work_id.is_empty() {
            return None;
        }
        Some(WorkEvent {
            work_id: work_id.to_string(),
            start: parse_local_date(self.start_ts.as_deref()),
            end: parse_local_date(self.end_ts.as_deref()),
            impact: self.impact.unwrap_or_default(),
            level: self.level.unwrap_or_default(),
            position: parse_position(self.lat.as_deref(), self.lon.as_deref()),
        })
    }
}
