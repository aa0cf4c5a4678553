//! Filesystem-backed source and sinks.
//!
//! The input directory mirrors the bucket layout:
//! `<root>/clean/traffic/<YYYY>/<MM>/traffic_clean.csv` and
//! `<root>/clean/works/<YYYY>/<MM>/works_clean.csv`.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::join::types::OutputRow;
use crate::output::{MetricItem, distinct_items, render_report};
use crate::parser::{TrafficRow, WorkRow};
use crate::services::{
    MetricStore, Period, RecordSource, Records, ReportSink, TRAFFIC_FILE, TRAFFIC_PREFIX,
    WORKS_FILE, WORKS_PREFIX, delimited_records,
};

/// Reads clean partitions from a local directory tree.
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Keys of the form `<prefix><YYYY>/<MM>/<file>` for every file present.
    fn list_keys(&self, prefix: &str, file_name: &str) -> Result<Vec<String>> {
        let base = self.root.join(prefix);
        let mut keys = Vec::new();

        for year in sub_dirs(&base)? {
            for month in sub_dirs(&base.join(&year))? {
                if base.join(&year).join(&month).join(file_name).is_file() {
                    keys.push(format!("{prefix}{year}/{month}/{file_name}"));
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// Names of the directories directly under `dir`; empty if `dir` is missing.
fn sub_dirs(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

/// Streams a delimited file; a missing file streams as empty.
fn open_records<T>(path: &Path) -> Result<Records<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    match File::open(path) {
        Ok(file) => Ok(delimited_records(
            BufReader::new(file),
            path.display().to_string(),
        )),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Partition missing, treating as empty");
            Ok(Box::new(std::iter::empty()))
        }
        Err(e) => Err(e).with_context(|| format!("opening {}", path.display())),
    }
}

#[async_trait::async_trait]
impl RecordSource for LocalSource {
    async fn list_traffic_partitions(&self) -> Result<Vec<String>> {
        self.list_keys(TRAFFIC_PREFIX, TRAFFIC_FILE)
    }

    async fn list_work_periods(&self) -> Result<Vec<Period>> {
        Ok(self
            .list_keys(WORKS_PREFIX, WORKS_FILE)?
            .iter()
            .filter_map(|key| Period::from_key(key, WORKS_PREFIX))
            .collect())
    }

    async fn traffic_rows(&self, key: &str) -> Result<Records<TrafficRow>> {
        open_records(&self.root.join(key))
    }

    async fn work_rows(&self, period: Period) -> Result<Records<WorkRow>> {
        open_records(&self.root.join(period.works_key()))
    }
}

/// Writes the report to a file, creating parent directories.
pub struct LocalReportSink {
    path: PathBuf,
}

impl LocalReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl ReportSink for LocalReportSink {
    async fn write_report(&self, rows: &[OutputRow]) -> Result<String> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let bytes = render_report(rows)?;
        fs::write(&self.path, bytes).with_context(|| format!("writing {}", self.path.display()))?;
        Ok(self.path.display().to_string())
    }
}

/// Keyed store kept as a JSON array of items in one file.
///
/// Each upsert loads the file, replaces items with matching `(pk, sk)`, and
/// rewrites it sorted by key.
pub struct JsonMetricStore {
    path: PathBuf,
}

impl JsonMetricStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads every stored item; a missing file is an empty store.
    pub fn load(&self) -> Result<Vec<MetricItem>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", self.path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }
}

#[async_trait::async_trait]
impl MetricStore for JsonMetricStore {
    async fn upsert(&self, rows: &[OutputRow]) -> Result<usize> {
        let mut items: BTreeMap<(String, String), MetricItem> = self
            .load()?
            .into_iter()
            .map(|item| ((item.pk.clone(), item.sk.clone()), item))
            .collect();
        let before = items.len();

        let batch = distinct_items(rows);
        let written = batch.len();
        items.extend(batch);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let items: Vec<_> = items.into_values().collect();
        fs::write(&self.path, serde_json::to_vec_pretty(&items)?)
            .with_context(|| format!("writing {}", self.path.display()))?;

        info!(
            path = %self.path.display(),
            upserted = written,
            added = items.len() - before,
            total = items.len(),
            "Metric items stored"
        );
        Ok(written)
    }
}
