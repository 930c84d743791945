// src/bin/ptax.rs
// Print PTAX dollar quotes for a date range, optionally saving them as CSV.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use scrdata::{
    config,
    fetch::ptax::{fetch_dollar_quotes, latest, write_quotes_csv},
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ptax", version)]
struct Args {
    /// First day, YYYY-MM-DD
    #[arg(long)]
    start: NaiveDate,

    /// Last day, YYYY-MM-DD
    #[arg(long)]
    end: NaiveDate,

    #[arg(long)]
    csv: Option<PathBuf>,

    #[arg(long, default_value = config::PTAX_BASE_URL, hide = true)]
    base_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let client = config::http_client(config::PTAX_TIMEOUT)?;
    let quotes = fetch_dollar_quotes(&client, &args.base_url, args.start, args.end)
        .await
        .context("querying PTAX")?;

    if quotes.is_empty() {
        println!("no quotes between {} and {}", args.start, args.end);
        return Ok(());
    }

    println!("{:<24} {:>10} {:>10}", "dataHoraCotacao", "compra", "venda");
    for q in &quotes {
        println!(
            "{:<24} {:>10.4} {:>10.4}",
            q.quoted_at.format("%Y-%m-%d %H:%M:%S"),
            q.buy,
            q.sell
        );
    }
    if let Some(last) = latest(&quotes) {
        info!(
            count = quotes.len(),
            buy = last.buy,
            sell = last.sell,
            at = %last.quoted_at,
            "latest quote"
        );
    }

    if let Some(path) = &args.csv {
        write_quotes_csv(&quotes, path)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "quotes saved");
    }
    Ok(())
}
