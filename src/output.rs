//! Output shaping for finished rows.
//!
//! Renders the delimited report and builds the keyed-store items.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Result;
use csv::WriterBuilder;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::join::types::OutputRow;
use crate::services::DELIMITER;

/// Report columns, in order.
pub const REPORT_COLUMNS: [&str; 10] = [
    "work_id",
    "segment_id",
    "date",
    "hour",
    "avg_flow_per_min",
    "p90_flow_per_min",
    "traffic_status",
    "impact",
    "level",
    "distance_m",
];

/// Value of `metric_type` on every stored item.
pub const METRIC_TYPE: &str = "work_impact";

/// Renders rows as a `;`-delimited report with a header line.
///
/// Absent numbers are written as empty fields.
pub fn render_report(rows: &[OutputRow]) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .from_writer(Vec::new());

    writer.write_record(REPORT_COLUMNS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    let bytes = writer.into_inner().map_err(|e| anyhow::anyhow!("{}", e.error()))?;
    debug!(rows = rows.len(), bytes = bytes.len(), "Report rendered");
    Ok(bytes)
}

/// Gzip-compresses a rendered report.
pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

pub fn partition_key(work_id: &str, date: &str) -> String {
    format!("WORK#{work_id}#DATE#{date}")
}

pub fn sort_key(segment_id: &str, hour: u32) -> String {
    format!("SEG#{segment_id}#HOUR#{hour}")
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// One keyed-store item.
///
/// Absent or non-finite numbers are left out of the item entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricItem {
    pub pk: String,
    pub sk: String,
    pub metric_type: String,
    pub work_id: String,
    pub segment_id: String,
    pub date: String,
    pub hour: u32,
    pub traffic_status: String,
    pub impact: String,
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_flow_per_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p90_flow_per_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
}

impl MetricItem {
    pub fn key(&self) -> (&str, &str) {
        (&self.pk, &self.sk)
    }
}

impl From<&OutputRow> for MetricItem {
    fn from(row: &OutputRow) -> Self {
        let date = row.date.format("%Y-%m-%d").to_string();
        MetricItem {
            pk: partition_key(&row.work_id, &date),
            sk: sort_key(&row.segment_id, row.hour),
            metric_type: METRIC_TYPE.to_string(),
            work_id: row.work_id.clone(),
            segment_id: row.segment_id.clone(),
            date,
            hour: row.hour,
            traffic_status: row.traffic_status.clone(),
            impact: row.impact.clone(),
            level: row.level.clone(),
            avg_flow_per_min: finite(row.avg_flow_per_min),
            p90_flow_per_min: finite(row.p90_flow_per_min),
            distance_m: finite(row.distance_m),
        }
    }
}

/// Items for `rows`, keyed and ordered on `(pk, sk)`. A later row replaces
/// an earlier one with the same key.
pub fn distinct_items(rows: &[OutputRow]) -> BTreeMap<(String, String), MetricItem> {
    rows.iter()
        .map(MetricItem::from)
        .map(|item| ((item.pk.clone(), item.sk.clone()), item))
        .collect()
}
