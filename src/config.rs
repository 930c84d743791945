// src/config.rs
use serde::Deserialize;
use std::{
    fs,
    ops::RangeInclusive,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::{PipelineError, Result};
use crate::publish::ParquetCompression;

/// Yearly SCR.data archives published by the central bank.
pub const SCR_ARCHIVE_URL_TEMPLATE: &str = "https://www.bcb.gov.br/pda/desig/scrdata_{year}.zip";

/// OData service for the PTAX reference rate.
pub const PTAX_BASE_URL: &str = "https://olinda.bcb.gov.br/olinda/servico/PTAX/versao/v1/odata";

pub const VALID_YEARS: RangeInclusive<i32> = 1900..=2100;

/// Yearly archives run to a few hundred MB; downloads get a long leash.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(300);
pub const PTAX_TIMEOUT: Duration = Duration::from_secs(30);

/// Name of the provenance column appended to every loaded row.
pub const SOURCE_COLUMN: &str = "__arquivo_origem";

pub const DEFAULT_BASE_DIR: &str = "data/scrdata";
pub const DEFAULT_WORKDIR: &str = "data_work";
pub const DEFAULT_PREFIX: &str = "scr";
pub const DEFAULT_START_YEAR: i32 = 2012;
pub const DEFAULT_END_YEAR: i32 = 2025;

pub fn validate_year(year: i32) -> Result<()> {
    if VALID_YEARS.contains(&year) {
        Ok(())
    } else {
        Err(PipelineError::InvalidArgument(format!(
            "year {} outside {}..={}",
            year,
            VALID_YEARS.start(),
            VALID_YEARS.end()
        )))
    }
}

pub fn validate_year_range(start: i32, end: i32) -> Result<RangeInclusive<i32>> {
    if start > end {
        return Err(PipelineError::InvalidArgument(format!(
            "start year {} is after end year {}",
            start, end
        )));
    }
    validate_year(start)?;
    validate_year(end)?;
    Ok(start..=end)
}

pub fn archive_file_name(year: i32) -> String {
    format!("scrdata_{}.zip", year)
}

/// On-disk layout for one year's run:
/// `{base}/{year}/raw`, `{base}/{year}/extracted`, `{base}/{year}/processed`.
#[derive(Debug, Clone)]
pub struct YearPaths {
    pub year: i32,
    pub raw_dir: PathBuf,
    pub extracted_dir: PathBuf,
    pub processed_dir: PathBuf,
}

impl YearPaths {
    pub fn new(base: &Path, year: i32) -> Self {
        let year_dir = base.join(year.to_string());
        Self {
            year,
            raw_dir: year_dir.join("raw"),
            extracted_dir: year_dir.join("extracted"),
            processed_dir: year_dir.join("processed"),
        }
    }

    pub fn zip_path(&self) -> PathBuf {
        self.raw_dir.join(archive_file_name(self.year))
    }

    pub fn parquet_path(&self) -> PathBuf {
        self.processed_dir
            .join(format!("scrdata_{}.parquet", self.year))
    }

    pub fn csv_path(&self) -> PathBuf {
        self.processed_dir.join(format!("scrdata_{}.csv", self.year))
    }

    pub fn create_all(&self) -> Result<()> {
        for d in [&self.raw_dir, &self.extracted_dir, &self.processed_dir] {
            fs::create_dir_all(d)?;
        }
        Ok(())
    }
}

/// Options for a single local-mode run. Every field has a default so a YAML
/// override file only needs the keys it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub base_dir: PathBuf,
    pub archive_url_template: String,
    pub force_download: bool,
    /// Skip delimiter sniffing and use this one for every file.
    pub delimiter: Option<char>,
    pub save_parquet: bool,
    pub save_csv: bool,
    pub add_source_column: bool,
    pub remove_degenerate_rows: bool,
    pub derive_indicators: bool,
    pub compression: ParquetCompression,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            archive_url_template: SCR_ARCHIVE_URL_TEMPLATE.to_string(),
            force_download: false,
            delimiter: None,
            save_parquet: true,
            save_csv: false,
            add_source_column: true,
            remove_degenerate_rows: true,
            derive_indicators: true,
            compression: ParquetCompression::default(),
        }
    }
}

impl PipelineOptions {
    /// Load overrides from a YAML file; missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)?;
        let opts: PipelineOptions = serde_yaml::from_str(&text)?;
        Ok(opts)
    }
}

/// Options for the object-storage batch run.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub prefix: String,
    pub workdir: PathBuf,
    pub archive_url_template: String,
    pub overwrite: bool,
    pub force_download: bool,
    pub remove_degenerate_rows: bool,
    pub derive_indicators: bool,
    pub compression: ParquetCompression,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            workdir: PathBuf::from(DEFAULT_WORKDIR),
            archive_url_template: SCR_ARCHIVE_URL_TEMPLATE.to_string(),
            overwrite: false,
            force_download: false,
            remove_degenerate_rows: true,
            derive_indicators: true,
            compression: ParquetCompression::default(),
        }
    }
}

pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PipelineError::fetch("<client>", None, e.to_string()))
}
