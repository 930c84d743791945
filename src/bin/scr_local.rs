// src/bin/scr_local.rs
// Run one year of SCR.data on local disk and print its metadata as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use scrdata::{
    config::{self, PipelineOptions},
    pipeline::run_local,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "scr-local", version)]
struct Args {
    #[arg(long)]
    year: i32,

    /// Root of the `{year}/raw|extracted|processed` layout
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Download and extract again even if files are present
    #[arg(long)]
    force: bool,

    /// Also write a CSV next to the Parquet file
    #[arg(long)]
    csv: bool,

    #[arg(long)]
    no_parquet: bool,

    /// Field delimiter for every file instead of sniffing each one
    #[arg(long)]
    sep: Option<char>,

    /// YAML file with pipeline options; flags given here take precedence
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut opts = match &args.config {
        Some(path) => PipelineOptions::from_yaml_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => PipelineOptions::default(),
    };
    if let Some(dir) = args.base_dir {
        opts.base_dir = dir;
    }
    opts.force_download |= args.force;
    opts.save_csv |= args.csv;
    if args.no_parquet {
        opts.save_parquet = false;
    }
    if args.sep.is_some() {
        opts.delimiter = args.sep;
    }
    info!(year = args.year, base_dir = %opts.base_dir.display(), "local run");

    let client = config::http_client(config::HTTP_TIMEOUT)?;
    let run = run_local(args.year, &opts, &client)
        .await
        .with_context(|| format!("processing year {}", args.year))?;

    println!("{}", serde_json::to_string_pretty(&run.metadata)?);
    Ok(())
}
