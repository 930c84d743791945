// src/bin/check_storage.rs
// Show what the storage client will authenticate with, then probe the
// bucket by listing a few objects.

use anyhow::{Context, Result};
use clap::Parser;
use scrdata::{
    diagnostics::{collect_env, default_adc_path, inspect_adc},
    publish::store::StoreTarget,
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Objects listed by the probe.
const PROBE_LIMIT: usize = 5;

#[derive(Parser, Debug)]
#[command(name = "check-storage", version)]
struct Args {
    #[arg(long, env = "SCR_BUCKET")]
    bucket: String,

    #[arg(long, default_value = "scr/")]
    prefix: String,

    /// Credentials JSON to inspect instead of the ADC default
    #[arg(long)]
    credentials: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_target(false)
        .init();

    let args = Args::parse();

    println!("=== environment ===");
    for entry in collect_env() {
        println!("{}", entry);
    }

    println!("\n=== credentials ===");
    match args.credentials.clone().or_else(default_adc_path) {
        Some(path) if path.exists() => match inspect_adc(&path) {
            Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            Err(e) => error!(path = %path.display(), error = %e, "unreadable credentials"),
        },
        Some(path) => println!("no credentials file at {}", path.display()),
        None => println!("no credentials path found"),
    }

    println!("\n=== bucket ===");
    let target = StoreTarget::parse(&args.bucket)?;
    let store = target
        .connect()
        .await
        .with_context(|| format!("connecting to {}", args.bucket))?;
    let objects = store
        .list(&args.prefix, PROBE_LIMIT)
        .await
        .with_context(|| format!("listing {}", store.uri(&args.prefix)))?;

    if objects.is_empty() {
        println!("no objects under {}", store.uri(&args.prefix));
    } else {
        for o in &objects {
            println!(" - {} ({} bytes)", o.key, o.size);
        }
    }
    info!(count = objects.len(), "storage reachable");
    Ok(())
}
