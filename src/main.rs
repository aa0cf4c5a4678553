//! CLI entry point for the road-work impact join.
//!
//! Provides subcommands to run the join against S3/DynamoDB, against a local
//! directory tree, and to inspect the dates present in local partitions.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use roadwork_impact::config::Config;
use roadwork_impact::infra::{
    DynamoMetricStore, JsonMetricStore, LocalReportSink, LocalSource, S3ReportSink, S3Source,
};
use roadwork_impact::join::runner::{RunOutcome, Runner, dates_in_partition};
use roadwork_impact::services::{Period, RecordSource};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "roadwork_impact")]
#[command(about = "Joins traffic flow samples with nearby active road works", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the join over S3 partitions and store results in S3 and DynamoDB
    Run {
        /// Bucket holding clean partitions (overrides CLEAN_BUCKET)
        #[arg(long)]
        clean_bucket: Option<String>,

        /// Bucket receiving the report (overrides REPORT_BUCKET)
        #[arg(long)]
        report_bucket: Option<String>,

        /// DynamoDB table for metric items (overrides DDB_TABLE)
        #[arg(long)]
        table: Option<String>,

        /// Object key of the report (overrides REPORT_KEY)
        #[arg(long)]
        report_key: Option<String>,

        /// Match radius in meters (overrides RADIUS_M)
        #[arg(short, long)]
        radius: Option<f64>,

        /// Gzip the report before upload
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
    /// Run the join over a local directory laid out like the clean bucket
    RunLocal {
        /// Directory containing clean/traffic and clean/works
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Directory receiving the report and metrics.json
        #[arg(short, long, default_value = "out")]
        output_dir: PathBuf,

        /// Match radius in meters (overrides RADIUS_M)
        #[arg(short, long)]
        radius: Option<f64>,
    },
    /// List local traffic partitions and the dates found in each
    Dates {
        /// Directory containing clean/traffic
        #[arg(short, long)]
        input_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/roadwork_impact.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("roadwork_impact.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    let outcome = match cli.command {
        Commands::Run {
            clean_bucket,
            report_bucket,
            table,
            report_key,
            radius,
            gzip,
        } => {
            if let Some(v) = clean_bucket {
                config.clean_bucket = v;
            }
            if let Some(v) = report_bucket {
                config.report_bucket = v;
            }
            if let Some(v) = table {
                config.table = v;
            }
            if let Some(v) = report_key {
                config.report_key = v;
            }
            if let Some(r) = radius {
                config = config.with_radius(r)?;
            }
            config.gzip |= gzip;
            run_aws(&config).await?
        }
        Commands::RunLocal {
            input_dir,
            output_dir,
            radius,
        } => {
            if let Some(r) = radius {
                config = config.with_radius(r)?;
            }
            run_local(&config, &input_dir, &output_dir).await
        }
        Commands::Dates { input_dir } => {
            list_dates(&input_dir).await?;
            return Ok(());
        }
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Runs against S3 partitions, an S3 report, and the DynamoDB table.
#[tracing::instrument(skip(config), fields(bucket = %config.clean_bucket, radius_m = config.radius_m))]
async fn run_aws(config: &Config) -> Result<RunOutcome> {
    let aws = aws_config::load_from_env().await;
    let s3 = aws_sdk_s3::Client::new(&aws);

    let source = S3Source::new(s3.clone(), &config.clean_bucket, &config.spool_dir)?;
    let report = S3ReportSink::new(s3, &config.report_bucket, &config.report_key, config.gzip);
    let store = DynamoMetricStore::new(aws_sdk_dynamodb::Client::new(&aws), &config.table);

    info!(
        report_bucket = %config.report_bucket,
        table = %config.table,
        gzip = config.gzip,
        "Starting run"
    );
    Ok(Runner::new(config, &source, &report, &store).run().await)
}

/// Runs against a local directory; writes the report and metrics.json under `output_dir`.
#[tracing::instrument(skip(config), fields(radius_m = config.radius_m))]
async fn run_local(config: &Config, input_dir: &Path, output_dir: &Path) -> RunOutcome {
    let report_name = Path::new(&config.report_key)
        .file_name()
        .unwrap_or(OsStr::new("joined_all.csv"));

    let source = LocalSource::new(input_dir);
    let report = LocalReportSink::new(output_dir.join(report_name));
    let store = JsonMetricStore::new(output_dir.join("metrics.json"));

    Runner::new(config, &source, &report, &store).run().await
}

/// Prints each local traffic partition with the dates it contains.
async fn list_dates(input_dir: &Path) -> Result<()> {
    let source = LocalSource::new(input_dir);
    let keys = source.list_traffic_partitions().await?;
    if keys.is_empty() {
        info!(input_dir = %input_dir.display(), "No traffic partitions found");
    }

    for key in keys {
        if Period::from_traffic_key(&key).is_none() {
            warn!(key = %key, "Unrecognised partition key");
            continue;
        }
        let dates = dates_in_partition(&source, &key).await?;
        let dates: Vec<String> = dates.iter().map(|d| d.to_string()).collect();
        println!("{key}: {}", dates.join(", "));
    }
    Ok(())
}
