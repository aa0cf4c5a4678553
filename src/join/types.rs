//! Domain types shared by the join engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

impl Position {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Builds a position only when both coordinates are present.
    pub fn from_parts(lat: Option<f64>, lon: Option<f64>) -> Option<Self> {
        Some(Self::new(lat?, lon?))
    }
}

/// A road disruption, as loaded from a monthly works partition.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkEvent {
    pub work_id: String,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub impact: String,
    pub level: String,
    pub position: Option<Position>,
}

impl WorkEvent {
    /// A work is active on `date` when its (possibly open-ended) interval contains it.
    /// Both bounds are inclusive.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        if let Some(start) = self.start {
            if date < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if date > end {
                return false;
            }
        }
        true
    }
}

/// One traffic flow observation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficSample {
    pub segment_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// Vehicles per minute.
    pub flow_per_min: Option<f64>,
    pub status: Option<String>,
    pub position: Option<Position>,
}

/// Identifies one output row: (work, segment, date, hour).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateKey {
    pub work_id: String,
    pub segment_id: String,
    pub date: NaiveDate,
    pub hour: u32,
}

/// A finalized aggregate, one per [`AggregateKey`].
///
/// Field order is the column order of the exported report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRow {
    pub work_id: String,
    pub segment_id: String,
    pub date: NaiveDate,
    pub hour: u32,
    pub avg_flow_per_min: Option<f64>,
    pub p90_flow_per_min: Option<f64>,
    pub traffic_status: String,
    pub impact: String,
    pub level: String,
    pub distance_m: Option<f64>,
}
