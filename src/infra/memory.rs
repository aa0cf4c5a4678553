//! In-memory source and sinks, for embedding the engine and for tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow};

use crate::join::types::OutputRow;
use crate::output::{MetricItem, distinct_items, render_report};
use crate::parser::{TrafficRow, WorkRow};
use crate::services::{MetricStore, Period, RecordSource, Records, ReportSink};

/// Partitions held in memory, keyed like the bucket.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    traffic: BTreeMap<String, Vec<TrafficRow>>,
    works: BTreeMap<Period, Vec<WorkRow>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a traffic partition under `key`.
    pub fn with_traffic(mut self, key: impl Into<String>, rows: Vec<TrafficRow>) -> Self {
        self.traffic.insert(key.into(), rows);
        self
    }

    /// Adds the works partition of `period`.
    pub fn with_works(mut self, period: Period, rows: Vec<WorkRow>) -> Self {
        self.works.insert(period, rows);
        self
    }
}

#[async_trait::async_trait]
impl RecordSource for MemorySource {
    async fn list_traffic_partitions(&self) -> Result<Vec<String>> {
        Ok(self.traffic.keys().cloned().collect())
    }

    async fn list_work_periods(&self) -> Result<Vec<Period>> {
        Ok(self.works.keys().copied().collect())
    }

    async fn traffic_rows(&self, key: &str) -> Result<Records<TrafficRow>> {
        let rows = self.traffic.get(key).cloned().unwrap_or_default();
        Ok(Box::new(rows.into_iter()))
    }

    async fn work_rows(&self, period: Period) -> Result<Records<WorkRow>> {
        let rows = self.works.get(&period).cloned().unwrap_or_default();
        Ok(Box::new(rows.into_iter()))
    }
}

/// Keeps the last rendered report.
#[derive(Debug, Default)]
pub struct MemoryReportSink {
    last: Mutex<Option<Vec<u8>>>,
}

impl MemoryReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last report written, as text.
    pub fn last_report(&self) -> Option<String> {
        let last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        last.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

#[async_trait::async_trait]
impl ReportSink for MemoryReportSink {
    async fn write_report(&self, rows: &[OutputRow]) -> Result<String> {
        let bytes = render_report(rows)?;
        let mut last = self.last.lock().map_err(|_| anyhow!("report sink lock poisoned"))?;
        *last = Some(bytes);
        Ok("memory://report".to_string())
    }
}

/// Keyed store backed by a map on `(pk, sk)`.
///
/// `upsert` reports the number of distinct keys written.
#[derive(Debug, Default)]
pub struct MemoryMetricStore {
    items: Mutex<BTreeMap<(String, String), MetricItem>>,
}

impl MemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored items, ordered by key.
    pub fn items(&self) -> Vec<MetricItem> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.values().cloned().collect()
    }

    pub fn get(&self, pk: &str, sk: &str) -> Option<MetricItem> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.get(&(pk.to_string(), sk.to_string())).cloned()
    }
}

#[async_trait::async_trait]
impl MetricStore for MemoryMetricStore {
    async fn upsert(&self, rows: &[OutputRow]) -> Result<usize> {
        let batch = distinct_items(rows);
        let written = batch.len();

        let mut items = self.items.lock().map_err(|_| anyhow!("metric store lock poisoned"))?;
        items.extend(batch);
        Ok(written)
    }
}
