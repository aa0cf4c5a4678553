use std::path::PathBuf;

use anyhow::{Context, Result, bail};

pub const DEFAULT_RADIUS_M: f64 = 150.0;

/// Settings for one run, passed explicitly to the runner and the adapters.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Bucket holding the clean partitions.
    pub clean_bucket: String,
    /// Bucket receiving the report.
    pub report_bucket: String,
    /// Keyed-store table name.
    pub table: String,
    /// Object key of the report.
    pub report_key: String,
    /// Match radius in meters.
    pub radius_m: f64,
    /// Gzip the report before upload.
    pub gzip: bool,
    /// Local directory for spooled partition downloads.
    pub spool_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clean_bucket: "cityflow-clean-paris".to_string(),
            report_bucket: "cityflow-reports-paris".to_string(),
            table: "cityflow_metrics".to_string(),
            report_key: "reports/global/joined_all.csv".to_string(),
            radius_m: DEFAULT_RADIUS_M,
            gzip: false,
            spool_dir: std::env::temp_dir().join("roadwork_impact"),
        }
    }
}

impl Config {
    /// Reads overrides from `CLEAN_BUCKET`, `REPORT_BUCKET`, `DDB_TABLE`,
    /// `REPORT_KEY`, `RADIUS_M` and `SPOOL_DIR`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Config::from_env`] with an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup("CLEAN_BUCKET") {
            config.clean_bucket = v;
        }
        if let Some(v) = lookup("REPORT_BUCKET") {
            config.report_bucket = v;
        }
        if let Some(v) = lookup("DDB_TABLE") {
            config.table = v;
        }
        if let Some(v) = lookup("REPORT_KEY") {
            config.report_key = v;
        }
        if let Some(v) = lookup("SPOOL_DIR") {
            config.spool_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("RADIUS_M") {
            config.radius_m = v
                .trim()
                .parse()
                .with_context(|| format!("RADIUS_M is not a number: '{v}'"))?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_radius(mut self, radius_m: f64) -> Result<Self> {
        self.radius_m = radius_m;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.radius_m.is_finite() || self.radius_m <= 0.0 {
            bail!("radius must be a positive number of meters, got {}", self.radius_m);
        }
        Ok(())
    }
}
