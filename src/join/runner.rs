use std::collections::{BTreeSet, HashSet};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::join::aggregate::Aggregator;
use crate::join::types::{OutputRow, TrafficSample};
use crate::join::works::build_active_index;
use crate::parser::{WorkRow, parse_utc};
use crate::services::{MetricStore, Period, RecordSource, ReportSink};
use crate::stats::RunStats;

/// Result of one run, as reported to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub ok: bool,
    pub rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    pub items_written: usize,
    pub message: String,
    pub stats: RunStats,
}

impl Default for RunOutcome {
    fn default() -> Self {
        Self {
            ok: true,
            rows: 0,
            report: None,
            items_written: 0,
            message: String::new(),
            stats: RunStats::default(),
        }
    }
}

/// Drives a full run: every traffic partition, every date found in it,
/// then one batch to the sinks.
pub struct Runner<'a> {
    config: &'a Config,
    source: &'a dyn RecordSource,
    report: &'a dyn ReportSink,
    store: &'a dyn MetricStore,
}

impl<'a> Runner<'a> {
    pub fn new(
        config: &'a Config,
        source: &'a dyn RecordSource,
        report: &'a dyn ReportSink,
        store: &'a dyn MetricStore,
    ) -> Self {
        Self {
            config,
            source,
            report,
            store,
        }
    }

    /// Runs to completion. Failures are reported through `ok = false`.
    ///
    /// Whatever finished before a failure stays in the outcome: the row
    /// count once aggregation is done, the report location once it is
    /// written.
    pub async fn run(&self) -> RunOutcome {
        let mut outcome = RunOutcome::default();
        if let Err(e) = self.execute(&mut outcome).await {
            error!(
                error = %format!("{e:#}"),
                rows = outcome.rows,
                report = outcome.report.as_deref().unwrap_or("-"),
                "Run failed"
            );
            outcome.ok = false;
            outcome.message = format!("{e:#}");
        }
        outcome
    }

    async fn execute(&self, outcome: &mut RunOutcome) -> Result<()> {
        let keys = self
            .source
            .list_traffic_partitions()
            .await
            .context("listing traffic partitions")?;
        outcome.stats.partitions_listed = keys.len();

        if keys.is_empty() {
            info!("No traffic partitions found");
            outcome.message = "no traffic partitions found".to_string();
            return Ok(());
        }

        let mut rows = self.collect_rows(&keys, &mut outcome.stats).await?;
        if rows.is_empty() {
            info!(stats = ?outcome.stats, "No traffic sample matched an active work");
            outcome.message = "no traffic/work matches on the dates present".to_string();
            return Ok(());
        }

        rows.sort_by(|a, b| {
            (a.date, a.hour, &a.work_id, &a.segment_id).cmp(&(b.date, b.hour, &b.work_id, &b.segment_id))
        });
        outcome.rows = rows.len();

        let location = self
            .report
            .write_report(&rows)
            .await
            .context("writing report")?;
        info!(location = %location, rows = rows.len(), "Report written");
        outcome.report = Some(location);

        outcome.items_written = self.store.upsert(&rows).await.context("upserting metrics")?;
        info!(items_written = outcome.items_written, "Metrics stored");

        outcome.message = format!("{} rows aggregated", rows.len());
        Ok(())
    }

    /// Aggregates every partition in `keys`, in order, without touching the sinks.
    pub async fn collect_rows(&self, keys: &[String], stats: &mut RunStats) -> Result<Vec<OutputRow>> {
        let work_periods: HashSet<Period> = self
            .source
            .list_work_periods()
            .await
            .context("listing work partitions")?
            .into_iter()
            .collect();

        let mut all_rows = Vec::new();
        for key in keys {
            let Some(period) = Period::from_traffic_key(key) else {
                warn!(key = %key, "Skipping partition with unrecognised key");
                stats.partitions_skipped += 1;
                continue;
            };
            if !work_periods.contains(&period) {
                debug!(key = %key, %period, "No works recorded for period");
                stats.partitions_without_works += 1;
                continue;
            }
            let rows = self.process_partition(key, period, stats).await?;
            all_rows.extend(rows);
        }

        info!(
            rows = all_rows.len(),
            matches = stats.matches,
            match_pct = stats.match_pct(),
            "Aggregation complete"
        );
        Ok(all_rows)
    }

    #[tracing::instrument(skip(self, stats), fields(%period))]
    async fn process_partition(
        &self,
        key: &str,
        period: Period,
        stats: &mut RunStats,
    ) -> Result<Vec<OutputRow>> {
        let dates = dates_in_partition(self.source, key).await?;
        stats.dates_seen += dates.len();
        info!(dates = dates.len(), "Dates discovered");

        let mut rows = Vec::new();
        for date in dates {
            rows.extend(self.aggregate_date(key, period, date, stats).await?);
        }
        Ok(rows)
    }

    /// Builds the active-work index for `date` and streams the partition through it.
    #[tracing::instrument(skip(self, stats), fields(%date))]
    pub async fn aggregate_date(
        &self,
        key: &str,
        period: Period,
        date: NaiveDate,
        stats: &mut RunStats,
    ) -> Result<Vec<OutputRow>> {
        let works = self
            .source
            .work_rows(period)
            .await
            .with_context(|| format!("reading works for {period}"))?
            .filter_map(WorkRow::into_event);
        let index = build_active_index(works, date);

        if index.is_empty() {
            debug!("No active works, skipping date");
            stats.dates_without_works += 1;
            return Ok(Vec::new());
        }

        let mut aggregator = Aggregator::new(&index, date, self.config.radius_m);
        let samples = self
            .source
            .traffic_rows(key)
            .await
            .with_context(|| format!("reading traffic partition {key}"))?;
        for row in samples {
            let sample = TrafficSample::from(row);
            stats.record(aggregator.consume(&sample));
        }

        stats.dates_processed += 1;
        if aggregator.is_empty() {
            debug!(works = index.len(), "No sample near an active work");
            return Ok(Vec::new());
        }

        let keys = aggregator.key_count();
        info!(works = index.len(), keys, "Date aggregated");
        Ok(aggregator.finalize())
    }
}

/// Distinct UTC calendar dates present in a traffic partition.
pub async fn dates_in_partition(source: &dyn RecordSource, key: &str) -> Result<BTreeSet<NaiveDate>> {
    let rows = source
        .traffic_rows(key)
        .await
        .with_context(|| format!("reading traffic partition {key}"))?;

    Ok(rows
        .filter_map(|row| parse_utc(row.ts.as_deref()))
        .map(|ts| ts.date_naive())
        .collect())
}
