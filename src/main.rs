use anyhow::{Context, Result};
use clap::Parser;
use scrdata::{
    config::{self, PublishOptions},
    pipeline::{run_years, YearOutcome},
    publish::{store::StoreTarget, ParquetCompression},
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Publish yearly SCR.data archives to object storage: raw zip plus a
/// processed Parquet file per year.
#[derive(Parser, Debug)]
#[command(name = "scrdata", version)]
struct Args {
    /// GCS bucket name, or `file:///some/dir` to publish into a directory
    #[arg(long, env = "SCR_BUCKET")]
    bucket: String,

    /// Key prefix inside the bucket
    #[arg(long, default_value = config::DEFAULT_PREFIX)]
    prefix: String,

    #[arg(long, default_value_t = config::DEFAULT_START_YEAR)]
    start_year: i32,

    #[arg(long, default_value_t = config::DEFAULT_END_YEAR)]
    end_year: i32,

    /// Local scratch directory for downloads and intermediate files
    #[arg(long, default_value = config::DEFAULT_WORKDIR)]
    workdir: PathBuf,

    /// Re-publish years whose processed object already exists
    #[arg(long)]
    overwrite: bool,

    /// Download archives again even if present in the workdir
    #[arg(long)]
    force_download: bool,

    #[arg(long, value_enum, default_value_t = ParquetCompression::Snappy)]
    compression: ParquetCompression,

    /// Keep rows whose carteira_ativa is zero, negative or missing
    #[arg(long)]
    keep_zero_rows: bool,

    /// Do not derive the ratio columns
    #[arg(long)]
    no_indicators: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    let args = Args::parse();
    // fail fast, before any client is built
    config::validate_year_range(args.start_year, args.end_year)?;
    info!(
        bucket = %args.bucket,
        prefix = %args.prefix,
        start = args.start_year,
        end = args.end_year,
        "startup"
    );

    // ─── 2) clients ─────────────────────────────────────────────────
    let target = StoreTarget::parse(&args.bucket)?;
    let store = target
        .connect()
        .await
        .with_context(|| format!("connecting to {}", args.bucket))?;
    let client = config::http_client(config::HTTP_TIMEOUT)?;

    let opts = PublishOptions {
        prefix: args.prefix,
        workdir: args.workdir,
        overwrite: args.overwrite,
        force_download: args.force_download,
        remove_degenerate_rows: !args.keep_zero_rows,
        derive_indicators: !args.no_indicators,
        compression: args.compression,
        ..Default::default()
    };

    // ─── 3) years, in order ─────────────────────────────────────────
    let outcomes = run_years(args.start_year, args.end_year, store.as_ref(), &opts, &client)
        .await
        .context("publishing SCR.data")?;

    let published = outcomes
        .iter()
        .filter(|o| matches!(o, YearOutcome::Published { .. }))
        .count();
    for o in &outcomes {
        match o {
            YearOutcome::Skipped { year, uri } => info!(year, uri = %uri, "skipped"),
            YearOutcome::Published {
                year,
                processed_uri,
                report,
                ..
            } => info!(year, uri = %processed_uri, rows = report.rows_out, "published"),
        }
    }
    info!(
        published,
        skipped = outcomes.len() - published,
        "all years done"
    );
    Ok(())
}
