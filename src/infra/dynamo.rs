//! DynamoDB-backed metric store.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use aws_sdk_dynamodb::types::{AttributeValue, PutRequest, WriteRequest};
use tracing::{info, warn};

use crate::join::types::OutputRow;
use crate::output::{MetricItem, distinct_items};
use crate::services::MetricStore;

/// BatchWriteItem accepts at most 25 requests.
const BATCH_SIZE: usize = 25;
const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE_MS: u64 = 100;

/// Upserts items into a table keyed on `pk` / `sk`.
pub struct DynamoMetricStore {
    client: aws_sdk_dynamodb::Client,
    table: String,
}

impl DynamoMetricStore {
    pub fn new(client: aws_sdk_dynamodb::Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    /// Sends one batch, re-sending unprocessed requests with exponential backoff.
    async fn write_batch(&self, mut pending: Vec<WriteRequest>) -> Result<()> {
        for attempt in 1..=MAX_ATTEMPTS {
            let output = self
                .client
                .batch_write_item()
                .request_items(&self.table, pending)
                .send()
                .await
                .with_context(|| format!("DynamoDB BatchWriteItem failed for '{}'", self.table))?;

            pending = output
                .unprocessed_items
                .and_then(|mut unprocessed| unprocessed.remove(&self.table))
                .unwrap_or_default();
            if pending.is_empty() {
                return Ok(());
            }

            warn!(
                attempt,
                unprocessed = pending.len(),
                "BatchWriteItem left items unprocessed, retrying"
            );
            tokio::time::sleep(Duration::from_millis(BACKOFF_BASE_MS << attempt)).await;
        }

        bail!(
            "{} items still unprocessed in '{}' after {} attempts",
            pending.len(),
            self.table,
            MAX_ATTEMPTS
        )
    }
}

/// Converts an item to DynamoDB attributes. Optional numbers are left out when absent.
pub fn to_attributes(item: &MetricItem) -> HashMap<String, AttributeValue> {
    let mut attrs = HashMap::new();
    let mut text = |name: &str, value: &str| {
        attrs.insert(name.to_string(), AttributeValue::S(value.to_string()));
    };
    text("pk", &item.pk);
    text("sk", &item.sk);
    text("metric_type", &item.metric_type);
    text("work_id", &item.work_id);
    text("segment_id", &item.segment_id);
    text("date", &item.date);
    text("traffic_status", &item.traffic_status);
    text("impact", &item.impact);
    text("level", &item.level);

    attrs.insert("hour".to_string(), AttributeValue::N(item.hour.to_string()));
    for (name, value) in [
        ("avg_flow_per_min", item.avg_flow_per_min),
        ("p90_flow_per_min", item.p90_flow_per_min),
        ("distance_m", item.distance_m),
    ] {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            attrs.insert(name.to_string(), AttributeValue::N(v.to_string()));
        }
    }
    attrs
}

#[async_trait::async_trait]
impl MetricStore for DynamoMetricStore {
    async fn upsert(&self, rows: &[OutputRow]) -> Result<usize> {
        // BatchWriteItem rejects duplicate keys within one request; last write wins.
        let items = distinct_items(rows);

        let mut requests = Vec::with_capacity(items.len());
        for item in items.values() {
            let put = PutRequest::builder()
                .set_item(Some(to_attributes(item)))
                .build()
                .context("building DynamoDB put request")?;
            requests.push(WriteRequest::builder().put_request(put).build());
        }

        let total = requests.len();
        let mut batches = 0;
        while !requests.is_empty() {
            let rest = requests.split_off(requests.len().min(BATCH_SIZE));
            let batch = std::mem::replace(&mut requests, rest);
            self.write_batch(batch).await?;
            batches += 1;
        }

        info!(table = %self.table, items = total, batches, "Metric items upserted");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(avg: Option<f64>) -> OutputRow {
        OutputRow {
            work_id: "W-1".to_string(),
            segment_id: "S-7".to_string(),
            date: "2024-06-02".parse().unwrap(),
            hour: 8,
            avg_flow_per_min: avg,
            p90_flow_per_min: Some(f64::NAN),
            traffic_status: "fluide".to_string(),
            impact: "barrage_partiel".to_string(),
            level: "1".to_string(),
            distance_m: Some(13.25),
        }
    }

    #[test]
    fn test_attributes_keys_and_numbers() {
        let attrs = to_attributes(&MetricItem::from(&row(Some(12.5))));

        assert_eq!(attrs["pk"], AttributeValue::S("WORK#W-1#DATE#2024-06-02".to_string()));
        assert_eq!(attrs["sk"], AttributeValue::S("SEG#S-7#HOUR#8".to_string()));
        assert_eq!(attrs["hour"], AttributeValue::N("8".to_string()));
        assert_eq!(attrs["avg_flow_per_min"], AttributeValue::N("12.5".to_string()));
        assert_eq!(attrs["distance_m"], AttributeValue::N("13.25".to_string()));
    }

    #[test]
    fn test_attributes_omit_absent_and_nan() {
        let attrs = to_attributes(&MetricItem::from(&row(None)));
        assert!(!attrs.contains_key("avg_flow_per_min"));
        assert!(!attrs.contains_key("p90_flow_per_min"));
        assert!(attrs.values().all(|v| !matches!(v, AttributeValue::Null(_))));
    }
}
