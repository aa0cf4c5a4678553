//! Partition listing and record streaming.

use std::fmt;
use std::io::Read;

use anyhow::Result;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::parser::{TrafficRow, WorkRow};

pub const TRAFFIC_PREFIX: &str = "clean/traffic/";
pub const WORKS_PREFIX: &str = "clean/works/";
pub const TRAFFIC_FILE: &str = "traffic_clean.csv";
pub const WORKS_FILE: &str = "works_clean.csv";

/// Field delimiter of clean partitions and reports.
pub const DELIMITER: u8 = b';';

/// A forward-only, finite stream of rows.
pub type Records<T> = Box<dyn Iterator<Item = T> + Send>;

/// Year/month that a partition covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// Parses `<prefix>/<YYYY>/<MM>/<file>` style keys.
    ///
    /// Returns `None` for any key that does not have that shape.
    pub fn from_key(key: &str, prefix: &str) -> Option<Self> {
        let rest = key.strip_prefix(prefix)?;
        let mut parts = rest.split('/');
        let year = parts.next()?.parse().ok()?;
        let month = parts.next()?.parse().ok()?;
        parts.next().filter(|file| !file.is_empty())?;
        Self::new(year, month)
    }

    pub fn from_traffic_key(key: &str) -> Option<Self> {
        Self::from_key(key, TRAFFIC_PREFIX)
    }

    pub fn works_key(&self) -> String {
        format!("{WORKS_PREFIX}{self}/{WORKS_FILE}")
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:02}", self.year, self.month)
    }
}

/// Where clean partitions come from.
///
/// A partition that does not exist streams as empty rather than failing.
#[async_trait::async_trait]
pub trait RecordSource: Send + Sync {
    /// Keys of every traffic partition, e.g. `clean/traffic/2024/06/traffic_clean.csv`.
    async fn list_traffic_partitions(&self) -> Result<Vec<String>>;

    /// Periods that have a works partition.
    async fn list_work_periods(&self) -> Result<Vec<Period>>;

    /// Streams the rows of one traffic partition.
    async fn traffic_rows(&self, key: &str) -> Result<Records<TrafficRow>>;

    /// Streams the works recorded for `period`.
    async fn work_rows(&self, period: Period) -> Result<Records<WorkRow>>;
}

/// Wraps a `;`-delimited reader with a header line into a row stream.
///
/// Unreadable records are logged and skipped.
pub fn delimited_records<R, T>(reader: R, source: String) -> Records<T>
where
    R: Read + Send + 'static,
    T: DeserializeOwned + Send + 'static,
{
    let rows = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .flexible(true)
        .from_reader(reader)
        .into_deserialize::<T>()
        .filter_map(move |record| match record {
            Ok(row) => Some(row),
            Err(e) => {
                warn!(source = %source, error = %e, "Skipping unreadable record");
                None
            }
        });
    Box::new(rows)
}
