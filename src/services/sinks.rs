//! Destinations for finished aggregate rows.

use anyhow::Result;

use crate::join::types::OutputRow;

/// Persists the rows of a run as one delimited-text report.
#[async_trait::async_trait]
pub trait ReportSink: Send + Sync {
    /// Writes the report and returns its location (URI or path).
    async fn write_report(&self, rows: &[OutputRow]) -> Result<String>;
}

/// Keyed store of aggregate rows, one item per (work, date, segment, hour).
#[async_trait::async_trait]
pub trait MetricStore: Send + Sync {
    /// Upserts every row, overwriting items with the same key. Returns the
    /// number of distinct keys written; rows sharing a key count once and
    /// the last one wins.
    async fn upsert(&self, rows: &[OutputRow]) -> Result<usize>;
}
