// src/publish/mod.rs
use arrow::{csv::WriterBuilder, record_batch::RecordBatch};
use parquet::{
    arrow::ArrowWriter,
    basic::{BrotliLevel, Compression, GzipLevel, ZstdLevel},
    file::{metadata::KeyValue, properties::WriterProperties},
};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

use crate::error::Result;

/// Object storage backends the processed data can be published to.
pub mod store;

/// Parquet codec, named the way it is spelled on the command line and in YAML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    #[default]
    Snappy,
    Zstd,
    Gzip,
    Brotli,
    Lz4,
    None,
}

impl ParquetCompression {
    pub fn codec(self) -> Compression {
        match self {
            Self::Snappy => Compression::SNAPPY,
            Self::Zstd => Compression::ZSTD(ZstdLevel::default()),
            Self::Gzip => Compression::GZIP(GzipLevel::default()),
            Self::Brotli => Compression::BROTLI(BrotliLevel::default()),
            Self::Lz4 => Compression::LZ4_RAW,
            Self::None => Compression::UNCOMPRESSED,
        }
    }
}

/// Descriptive metadata carried next to the processed table. Not part of
/// the schema: it travels as Parquet key/value metadata and as JSON.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatasetMetadata {
    pub year: i32,
    pub source_url: String,
    pub zip_path: PathBuf,
    pub extracted_dir: PathBuf,
    pub parquet_path: Option<PathBuf>,
    pub csv_path: Option<PathBuf>,
    pub csv_files: usize,
    pub raw_rows: usize,
    pub processed_rows: usize,
    pub processed_columns: usize,
    pub inconsistent_rows: usize,
}

impl DatasetMetadata {
    /// One Parquet key per field, prefixed with `scrdata.`.
    pub fn key_values(&self) -> Vec<KeyValue> {
        let value = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => return Vec::new(),
        };
        value
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                let text = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                KeyValue::new(format!("scrdata.{}", k), text)
            })
            .collect()
    }
}

/// Object keys for one year under `prefix`:
/// `{prefix}/raw/ano={year}/scrdata_{year}.zip` and
/// `{prefix}/processed/ano={year}/scrdata_{year}.parquet`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKeys {
    pub raw: String,
    pub processed: String,
}

impl ObjectKeys {
    pub fn for_year(prefix: &str, year: i32) -> Self {
        let prefix = prefix.trim_matches('/');
        let join = |part: &str, file: String| {
            if prefix.is_empty() {
                format!("{}/ano={}/{}", part, year, file)
            } else {
                format!("{}/{}/ano={}/{}", prefix, part, year, file)
            }
        };
        Self {
            raw: join("raw", format!("scrdata_{}.zip", year)),
            processed: join("processed", format!("scrdata_{}.parquet", year)),
        }
    }
}

/// Write `batch` as a single Parquet file. The file is written next to
/// `path` and renamed into place once closed. Returns the size in bytes.
#[instrument(level = "info", skip(batch, path, metadata), fields(path = %path.display(), rows = batch.num_rows()))]
pub fn write_parquet(
    batch: &RecordBatch,
    path: &Path,
    compression: ParquetCompression,
    metadata: Option<&DatasetMetadata>,
) -> Result<u64> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);

    let props = WriterProperties::builder()
        .set_compression(compression.codec())
        .set_key_value_metadata(metadata.map(DatasetMetadata::key_values))
        .build();

    let file = File::create(&tmp)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;

    fs::rename(&tmp, path)?;
    let bytes = fs::metadata(path)?.len();
    info!(bytes, codec = ?compression, "parquet written");
    Ok(bytes)
}

/// Write `batch` as comma-separated UTF-8 with a BOM, so spreadsheet tools
/// pick the right encoding for accented text.
#[instrument(level = "info", skip(batch, path), fields(path = %path.display(), rows = batch.num_rows()))]
pub fn write_csv(batch: &RecordBatch, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);

    let mut file = File::create(&tmp)?;
    file.write_all(b"\xEF\xBB\xBF")?;
    let mut writer = WriterBuilder::new().with_header(true).build(file);
    writer.write(batch)?;
    drop(writer);

    fs::rename(&tmp, path)?;
    info!("csv written");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}
