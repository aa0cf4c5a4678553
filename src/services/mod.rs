//! Interfaces to the storage the join engine reads from and writes to.
//!
//! [`RecordSource`] lists and streams clean partitions.
//! [`ReportSink`] and [`MetricStore`] receive the finished rows of a run.
//! Implementations live in [`crate::infra`].

mod records;
mod sinks;

pub use records::{
    DELIMITER, Period, RecordSource, Records, TRAFFIC_FILE, TRAFFIC_PREFIX, WORKS_FILE,
    WORKS_PREFIX, delimited_records,
};
pub use sinks::{MetricStore, ReportSink};
