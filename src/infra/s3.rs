//! S3-backed source and report sink.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use aws_sdk_s3::primitives::ByteStream;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::join::types::OutputRow;
use crate::output::{gzip, render_report};
use crate::parser::{TrafficRow, WorkRow};
use crate::services::{
    Period, RecordSource, Records, ReportSink, TRAFFIC_FILE, TRAFFIC_PREFIX,
    WORKS_FILE, WORKS_PREFIX, delimited_records,
};

/// Streams clean partitions out of a bucket.
///
/// Each object is downloaded chunk by chunk into a spool file the first time
/// it is read, then every pass reads that file. Objects that do not exist are
/// remembered as empty. Spool files are removed on drop.
pub struct S3Source {
    client: aws_sdk_s3::Client,
    bucket: String,
    spool_dir: PathBuf,
    spooled: Mutex<HashMap<String, Option<PathBuf>>>,
}

impl S3Source {
    pub fn new(
        client: aws_sdk_s3::Client,
        bucket: impl Into<String>,
        spool_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let spool_dir = spool_dir.into();
        fs::create_dir_all(&spool_dir)
            .with_context(|| format!("creating spool directory {}", spool_dir.display()))?;
        Ok(Self {
            client,
            bucket: bucket.into(),
            spool_dir,
            spooled: Mutex::new(HashMap::new()),
        })
    }

    /// Lists keys under `prefix` that end with `/<file_name>`.
    async fn list_keys(&self, prefix: &str, file_name: &str) -> Result<Vec<String>> {
        let suffix = format!("/{file_name}");
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page
                .with_context(|| format!("S3 ListObjectsV2 failed for s3://{}/{prefix}", self.bucket))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    if key.ends_with(&suffix) {
                        keys.push(key.to_string());
                    }
                }
            }
        }

        keys.sort();
        debug!(bucket = %self.bucket, prefix, count = keys.len(), "Listed partitions");
        Ok(keys)
    }

    fn cached(&self, key: &str) -> Result<Option<Option<PathBuf>>> {
        let spooled = self.spooled.lock().map_err(|_| anyhow!("spool index lock poisoned"))?;
        Ok(spooled.get(key).cloned())
    }

    fn remember(&self, key: &str, path: Option<PathBuf>) -> Result<()> {
        let mut spooled = self.spooled.lock().map_err(|_| anyhow!("spool index lock poisoned"))?;
        spooled.insert(key.to_string(), path);
        Ok(())
    }

    /// Local copy of `key`, downloading it on first use. `None` if the object does not exist.
    async fn spool(&self, key: &str) -> Result<Option<PathBuf>> {
        if let Some(known) = self.cached(key)? {
            return Ok(known);
        }

        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    debug!(key, "Object missing, treating as empty");
                    self.remember(key, None)?;
                    return Ok(None);
                }
                return Err(err).with_context(|| format!("S3 GetObject failed for s3://{}/{key}", self.bucket));
            }
        };

        let spool = PartialSpool::new(self.spool_dir.join(key.replace('/', "__")));
        let mut file = BufWriter::new(
            File::create(&spool.path)
                .with_context(|| format!("creating {}", spool.path.display()))?,
        );
        let mut body = response.body;
        let mut bytes = 0usize;
        while let Some(chunk) = body
            .try_next()
            .await
            .with_context(|| format!("reading body of s3://{}/{key}", self.bucket))?
        {
            bytes += chunk.len();
            file.write_all(&chunk)?;
        }
        file.flush()?;
        drop(file);

        info!(key, bytes, "Partition spooled");
        let path = spool.keep();
        self.remember(key, Some(path.clone()))?;
        Ok(Some(path))
    }

    async fn records<T>(&self, key: &str) -> Result<Records<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        match self.spool(key).await? {
            Some(path) => {
                let file =
                    File::open(&path).with_context(|| format!("opening {}", path.display()))?;
                Ok(delimited_records(BufReader::new(file), key.to_string()))
            }
            None => Ok(Box::new(std::iter::empty())),
        }
    }
}

/// A spool file being downloaded. Removed on drop unless [`PartialSpool::keep`] was called.
struct PartialSpool {
    path: PathBuf,
    kept: bool,
}

impl PartialSpool {
    fn new(path: PathBuf) -> Self {
        Self { path, kept: false }
    }

    /// Marks the download complete and hands back its path.
    fn keep(mut self) -> PathBuf {
        self.kept = true;
        self.path.clone()
    }
}

impl Drop for PartialSpool {
    fn drop(&mut self) {
        if self.kept {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed incomplete spool file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove spool file"),
        }
    }
}

impl Drop for S3Source {
    fn drop(&mut self) {
        let spooled = match self.spooled.get_mut() {
            Ok(spooled) => spooled,
            Err(poisoned) => poisoned.into_inner(),
        };
        for path in spooled.values().flatten() {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Failed to remove spool file");
            }
        }
    }
}

#[async_trait::async_trait]
impl RecordSource for S3Source {
    async fn list_traffic_partitions(&self) -> Result<Vec<String>> {
        self.list_keys(TRAFFIC_PREFIX, TRAFFIC_FILE).await
    }

    async fn list_work_periods(&self) -> Result<Vec<Period>> {
        Ok(self
            .list_keys(WORKS_PREFIX, WORKS_FILE)
            .await?
            .iter()
            .filter_map(|key| Period::from_key(key, WORKS_PREFIX))
            .collect())
    }

    async fn traffic_rows(&self, key: &str) -> Result<Records<TrafficRow>> {
        self.records(key).await
    }

    async fn work_rows(&self, period: Period) -> Result<Records<WorkRow>> {
        self.records(&period.works_key()).await
    }
}

/// Uploads raw bytes to an S3 bucket with the given content type.
pub async fn put_bytes(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    body: Vec<u8>,
    content_type: &str,
) -> Result<()> {
    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(body))
        .content_type(content_type)
        .send()
        .await
        .with_context(|| format!("S3 PutObject failed for s3://{bucket}/{key}"))?;

    Ok(())
}

/// Uploads the report as one object, optionally gzip-compressed.
pub struct S3ReportSink {
    client: aws_sdk_s3::Client,
    bucket: String,
    key: String,
    gzip: bool,
}

impl S3ReportSink {
    pub fn new(
        client: aws_sdk_s3::Client,
        bucket: impl Into<String>,
        key: impl Into<String>,
        gzip: bool,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key: key.into(),
            gzip,
        }
    }

    /// Object key actually written (`.gz` appended when compressing).
    pub fn object_key(&self) -> String {
        if self.gzip {
            format!("{}.gz", self.key)
        } else {
            self.key.clone()
        }
    }
}

#[async_trait::async_trait]
impl ReportSink for S3ReportSink {
    async fn write_report(&self, rows: &[OutputRow]) -> Result<String> {
        let rendered = render_report(rows)?;
        let key = self.object_key();
        let (body, content_type) = if self.gzip {
            (gzip(&rendered)?, "application/gzip")
        } else {
            (rendered, "text/csv")
        };

        put_bytes(&self.client, &self.bucket, &key, body, content_type).await?;
        Ok(format!("s3://{}/{}", self.bucket, key))
    }
}
