//! PTAX dollar quotes over a date range.
//!
//! The OData endpoint takes its range as quoted `MM-DD-YYYY` parameters and
//! answers `{"value": [{cotacaoCompra, cotacaoVenda, dataHoraCotacao}, ...]}`.
//! An empty `value` is a normal "no data" answer (weekends, holidays).

use chrono::{NaiveDate, NaiveDateTime};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tracing::{debug, instrument};

use crate::error::{PipelineError, Result};

const MAX_ROWS: u32 = 10_000;
const SELECT_FIELDS: &str = "cotacaoCompra,cotacaoVenda,dataHoraCotacao";
const ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PtaxQuote {
    #[serde(rename = "cotacaoCompra")]
    pub buy: f64,
    #[serde(rename = "cotacaoVenda")]
    pub sell: f64,
    #[serde(rename = "dataHoraCotacao", deserialize_with = "de_quote_time")]
    pub quoted_at: NaiveDateTime,
}

#[derive(Debug, Deserialize)]
struct ODataResponse {
    #[serde(default)]
    value: Vec<PtaxQuote>,
}

fn de_quote_time<'de, D>(d: D) -> std::result::Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(d)?;
    parse_quote_time(&s).ok_or_else(|| serde::de::Error::custom(format!("bad quote time {s:?}")))
}

/// `"2024-01-02 13:04:28.064"`, with or without the fraction.
fn parse_quote_time(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

fn odata_date(d: NaiveDate) -> String {
    format!("'{}'", d.format("%m-%d-%Y"))
}

pub fn dollar_period_url(base: &str) -> String {
    format!(
        "{}/CotacaoDolarPeriodo(dataInicial=@dataInicial,dataFinalCotacao=@dataFinalCotacao)",
        base.trim_end_matches('/')
    )
}

/// Fetch buy/sell quotes for `start..=end`, oldest first.
#[instrument(level = "info", skip(client, base))]
pub async fn fetch_dollar_quotes(
    client: &Client,
    base: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<PtaxQuote>> {
    if start > end {
        return Err(PipelineError::InvalidArgument(format!(
            "start date {} is after end date {}",
            start, end
        )));
    }

    let url = dollar_period_url(base);
    let top = MAX_ROWS.to_string();
    let params = [
        ("@dataInicial", odata_date(start)),
        ("@dataFinalCotacao", odata_date(end)),
        ("$format", "json".to_string()),
        ("$select", SELECT_FIELDS.to_string()),
        ("$top", top),
    ];

    let resp = client
        .get(&url)
        .query(&params)
        .send()
        .await
        .map_err(|e| PipelineError::fetch(&url, None, e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let detail: String = body.chars().take(ERROR_BODY_CHARS).collect();
        return Err(PipelineError::fetch(&url, Some(status.as_u16()), detail));
    }

    let payload: ODataResponse = resp
        .json()
        .await
        .map_err(|e| PipelineError::fetch(&url, Some(status.as_u16()), e.to_string()))?;

    let mut quotes = payload.value;
    quotes.sort_by_key(|q| q.quoted_at);
    debug!(count = quotes.len(), "quotes received");
    Ok(quotes)
}

/// Most recent quote, if any.
pub fn latest(quotes: &[PtaxQuote]) -> Option<&PtaxQuote> {
    quotes.iter().max_by_key(|q| q.quoted_at)
}

/// Write quotes as CSV with the service's own column names.
pub fn write_quotes_csv(quotes: &[PtaxQuote], path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["cotacaoCompra", "cotacaoVenda", "dataHoraCotacao"])?;
    for q in quotes {
        wtr.write_record([
            q.buy.to_string(),
            q.sell.to_string(),
            q.quoted_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
