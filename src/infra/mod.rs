//! Storage adapters for the collaborator traits in [`crate::services`].
//!
//! [`S3Source`] and [`S3ReportSink`] use AWS S3, [`DynamoMetricStore`] uses
//! DynamoDB. The local variants mirror the bucket layout on disk, and the
//! in-memory ones hold everything in process.

pub mod dynamo;
pub mod local;
pub mod memory;
pub mod s3;

pub use dynamo::DynamoMetricStore;
pub use local::{JsonMetricStore, LocalReportSink, LocalSource};
pub use memory::{MemoryMetricStore, MemoryReportSink, MemorySource};
pub use s3::{S3ReportSink, S3Source};
