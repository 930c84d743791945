// src/pipeline.rs
use reqwest::Client;
use std::{fmt, path::PathBuf};
use tracing::{error, info, instrument};

use crate::config::{validate_year, validate_year_range, PipelineOptions, PublishOptions, YearPaths};
use crate::error::{PipelineError, Result};
use crate::fetch::zips::ensure_archive;
use crate::process::{
    extract::safe_extract,
    load::{load_directory, LoadOptions},
    transform::{process_scrdata, Processed, TransformOptions, TransformReport},
};
use crate::publish::{store::ObjectStore, write_csv, write_parquet, DatasetMetadata, ObjectKeys};

/// Where one year's object-storage run is. Transitions only move forward;
/// a failure leaves the stage at the step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearStage {
    Pending,
    SkipCheck,
    Skipped,
    Downloading,
    UploadingRaw,
    Extracting,
    Loading,
    Transforming,
    PersistingLocal,
    UploadingProcessed,
    Done,
}

impl fmt::Display for YearStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::SkipCheck => "skip-check",
            Self::Skipped => "skipped",
            Self::Downloading => "downloading",
            Self::UploadingRaw => "uploading-raw",
            Self::Extracting => "extracting",
            Self::Loading => "loading",
            Self::Transforming => "transforming",
            Self::PersistingLocal => "persisting-local",
            Self::UploadingProcessed => "uploading-processed",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

struct Progress {
    year: i32,
    stage: YearStage,
}

impl Progress {
    fn enter(&mut self, next: YearStage) {
        info!(year = self.year, from = %self.stage, to = %next, "stage");
        self.stage = next;
    }
}

/// Result of a local-mode run.
#[derive(Debug)]
pub struct LocalRun {
    pub raw_rows: usize,
    pub processed: Processed,
    pub metadata: DatasetMetadata,
}

#[derive(Debug)]
pub enum YearOutcome {
    /// The processed object was already there; nothing else ran.
    Skipped { year: i32, uri: String },
    Published {
        year: i32,
        raw_uri: String,
        processed_uri: String,
        report: TransformReport,
        metadata: DatasetMetadata,
    },
}

impl YearOutcome {
    pub fn year(&self) -> i32 {
        match self {
            Self::Skipped { year, .. } | Self::Published { year, .. } => *year,
        }
    }
}

/// Run CPU-bound work on the blocking pool and wait for it.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

fn delimiter_byte(c: Option<char>) -> Result<Option<u8>> {
    match c {
        None => Ok(None),
        Some(c) if c.is_ascii() => Ok(Some(c as u8)),
        Some(c) => Err(PipelineError::InvalidArgument(format!(
            "delimiter {:?} is not a single-byte character",
            c
        ))),
    }
}

/// Download, extract, load and transform one year on local disk, then
/// write Parquet and/or CSV under `{base}/{year}/processed`.
#[instrument(level = "info", skip(opts, client))]
pub async fn run_local(year: i32, opts: &PipelineOptions, client: &Client) -> Result<LocalRun> {
    validate_year(year)?;
    let delimiter = delimiter_byte(opts.delimiter)?;

    let paths = YearPaths::new(&opts.base_dir, year);
    paths.create_all()?;

    let fetch = ensure_archive(
        client,
        &opts.archive_url_template,
        year,
        &paths.zip_path(),
        opts.force_download,
    )
    .await?;

    // a fresh archive must not be mixed with files from an older one
    let force_extract = opts.force_download || fetch.downloaded;
    let (zip, dir) = (fetch.path.clone(), paths.extracted_dir.clone());
    blocking(move || safe_extract(&zip, &dir, force_extract)).await?;

    let load_opts = LoadOptions {
        delimiter,
        add_source_column: opts.add_source_column,
    };
    let dir = paths.extracted_dir.clone();
    let loaded = blocking(move || load_directory(&dir, &load_opts)).await?;
    let raw_rows = loaded.batch.num_rows();
    let csv_files = loaded.files.len();

    let transform_opts = TransformOptions {
        remove_degenerate_rows: opts.remove_degenerate_rows,
        derive_indicators: opts.derive_indicators,
    };
    let raw = loaded.batch;
    let processed = blocking(move || process_scrdata(&raw, &transform_opts)).await?;

    let metadata = DatasetMetadata {
        year,
        source_url: fetch.url.clone(),
        zip_path: fetch.path.clone(),
        extracted_dir: paths.extracted_dir.clone(),
        parquet_path: opts.save_parquet.then(|| paths.parquet_path()),
        csv_path: opts.save_csv.then(|| paths.csv_path()),
        csv_files,
        raw_rows,
        processed_rows: processed.report.rows_out,
        processed_columns: processed.report.columns_out,
        inconsistent_rows: processed.report.inconsistent_rows,
    };

    if let Some(path) = metadata.parquet_path.clone() {
        let (batch, meta, codec) = (processed.batch.clone(), metadata.clone(), opts.compression);
        blocking(move || write_parquet(&batch, &path, codec, Some(&meta))).await?;
    }
    if let Some(path) = metadata.csv_path.clone() {
        let batch = processed.batch.clone();
        blocking(move || write_csv(&batch, &path)).await?;
    }

    info!(
        year,
        raw_rows,
        rows = processed.report.rows_out,
        columns = processed.report.columns_out,
        "local run complete"
    );
    Ok(LocalRun {
        raw_rows,
        processed,
        metadata,
    })
}

/// Publish one year to `store`.
///
/// Unless `overwrite` is set, an existing processed object skips the whole
/// year before anything is downloaded or written. A failure aborts the
/// year at that stage; objects uploaded earlier stay where they are.
#[instrument(level = "info", skip(store, opts, client))]
pub async fn run_year_to_store(
    year: i32,
    store: &dyn ObjectStore,
    opts: &PublishOptions,
    client: &Client,
) -> Result<YearOutcome> {
    validate_year(year)?;
    let mut progress = Progress {
        year,
        stage: YearStage::Pending,
    };
    let result = publish_year(year, store, opts, client, &mut progress).await;
    if let Err(e) = &result {
        error!(year, stage = %progress.stage, error = %e, "year failed");
    }
    result
}

async fn publish_year(
    year: i32,
    store: &dyn ObjectStore,
    opts: &PublishOptions,
    client: &Client,
    progress: &mut Progress,
) -> Result<YearOutcome> {
    let keys = ObjectKeys::for_year(&opts.prefix, year);
    let processed_uri = store.uri(&keys.processed);

    progress.enter(YearStage::SkipCheck);
    if !opts.overwrite && store.exists(&keys.processed).await? {
        progress.enter(YearStage::Skipped);
        info!(year, uri = %processed_uri, "already published, skipping year");
        return Ok(YearOutcome::Skipped {
            year,
            uri: processed_uri,
        });
    }

    let paths = YearPaths::new(&opts.workdir, year);
    paths.create_all()?;

    progress.enter(YearStage::Downloading);
    let fetch = ensure_archive(
        client,
        &opts.archive_url_template,
        year,
        &paths.zip_path(),
        opts.force_download,
    )
    .await?;

    progress.enter(YearStage::UploadingRaw);
    store.upload_file(&fetch.path, &keys.raw).await?;
    let raw_uri = store.uri(&keys.raw);

    progress.enter(YearStage::Extracting);
    let (zip, dir) = (fetch.path.clone(), paths.extracted_dir.clone());
    blocking(move || safe_extract(&zip, &dir, true)).await?;

    progress.enter(YearStage::Loading);
    let dir = paths.extracted_dir.clone();
    let loaded = blocking(move || load_directory(&dir, &LoadOptions::default())).await?;
    let raw_rows = loaded.batch.num_rows();
    let csv_files = loaded.files.len();

    progress.enter(YearStage::Transforming);
    let transform_opts = TransformOptions {
        remove_degenerate_rows: opts.remove_degenerate_rows,
        derive_indicators: opts.derive_indicators,
    };
    let raw = loaded.batch;
    let processed = blocking(move || process_scrdata(&raw, &transform_opts)).await?;

    progress.enter(YearStage::PersistingLocal);
    let parquet_path: PathBuf = paths.parquet_path();
    let metadata = DatasetMetadata {
        year,
        source_url: fetch.url.clone(),
        zip_path: fetch.path.clone(),
        extracted_dir: paths.extracted_dir.clone(),
        parquet_path: Some(parquet_path.clone()),
        csv_path: None,
        csv_files,
        raw_rows,
        processed_rows: processed.report.rows_out,
        processed_columns: processed.report.columns_out,
        inconsistent_rows: processed.report.inconsistent_rows,
    };
    {
        let (batch, meta, path, codec) = (
            processed.batch.clone(),
            metadata.clone(),
            parquet_path.clone(),
            opts.compression,
        );
        blocking(move || write_parquet(&batch, &path, codec, Some(&meta))).await?;
    }

    progress.enter(YearStage::UploadingProcessed);
    store.upload_file(&parquet_path, &keys.processed).await?;

    progress.enter(YearStage::Done);
    Ok(YearOutcome::Published {
        year,
        raw_uri,
        processed_uri,
        report: processed.report,
        metadata,
    })
}

/// Publish `start..=end` one year at a time. The first failing year stops
/// the run; later years are not attempted.
pub async fn run_years(
    start: i32,
    end: i32,
    store: &dyn ObjectStore,
    opts: &PublishOptions,
    client: &Client,
) -> Result<Vec<YearOutcome>> {
    let years = validate_year_range(start, end)?;
    let mut outcomes = Vec::with_capacity(years.clone().count());
    for year in years {
        outcomes.push(run_year_to_store(year, store, opts, client).await?);
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::store::LocalStore;
    use std::io::{Cursor, Write};
    use tempfile::tempdir;
    use zip::{write::FileOptions, CompressionMethod, ZipWriter};

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = ZipWriter::new(Cursor::new(&mut buf));
            let options: FileOptions<'_, ()> =
                FileOptions::default().compression_method(CompressionMethod::Stored);
            for (name, body) in entries {
                zip.start_file(*name, options).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    fn sample_zip() -> Vec<u8> {
        zip_bytes(&[
            (
                "scrdata_202002.csv",
                "data_base;uf;carteira_ativa;carteira_inadimplencia\n\
                 2020-02-29;SP;1.000,00;50\n\
                 2020-02-29;RJ;0;1\n",
            ),
            (
                "scrdata_202001.csv",
                "data_base;uf;carteira_ativa;carteira_inadimplencia\n2020-01-31;MG;200;10\n",
            ),
        ])
    }

    fn publish_opts(workdir: PathBuf, server: &mockito::Server) -> PublishOptions {
        PublishOptions {
            workdir,
            archive_url_template: format!("{}/scrdata_{{year}}.zip", server.url()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_existing_processed_object_skips_year() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let tmp = tempdir().unwrap();
        let store = LocalStore::new(tmp.path().join("bucket"));
        let marker = tmp.path().join("marker.parquet");
        std::fs::write(&marker, b"x").unwrap();
        let keys = ObjectKeys::for_year("scr", 2020);
        store.upload_file(&marker, &keys.processed).await.unwrap();

        let workdir = tmp.path().join("work");
        let opts = publish_opts(workdir.clone(), &server);
        let out = run_year_to_store(2020, &store, &opts, &Client::new())
            .await
            .unwrap();

        assert!(matches!(out, YearOutcome::Skipped { year: 2020, .. }));
        assert!(!workdir.exists());
        assert!(!store.exists(&keys.raw).await.unwrap());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_publish_then_skip() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/scrdata_2020.zip")
            .with_status(200)
            .with_body(sample_zip())
            .expect(1)
            .create_async()
            .await;

        let tmp = tempdir().unwrap();
        let store = LocalStore::new(tmp.path().join("bucket"));
        let opts = publish_opts(tmp.path().join("work"), &server);
        let client = Client::new();

        let out = run_year_to_store(2020, &store, &opts, &client).await.unwrap();
        match &out {
            YearOutcome::Published {
                report, metadata, ..
            } => {
                assert_eq!(report.rows_in, 3);
                assert_eq!(report.rows_removed, 1);
                assert_eq!(report.rows_out, 2);
                assert_eq!(metadata.csv_files, 2);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let keys = ObjectKeys::for_year("scr", 2020);
        assert!(store.exists(&keys.raw).await.unwrap());
        assert!(store.exists(&keys.processed).await.unwrap());

        let again = run_year_to_store(2020, &store, &opts, &client).await.unwrap();
        assert!(matches!(again, YearOutcome::Skipped { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_first_failure_stops_remaining_years() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/scrdata_2019.zip")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;
        let later = server
            .mock("GET", "/scrdata_2020.zip")
            .expect(0)
            .create_async()
            .await;

        let tmp = tempdir().unwrap();
        let store = LocalStore::new(tmp.path().join("bucket"));
        let opts = publish_opts(tmp.path().join("work"), &server);

        let err = run_years(2019, 2020, &store, &opts, &Client::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Fetch { status: Some(500), .. }));
        failing.assert_async().await;
        later.assert_async().await;
    }

    #[tokio::test]
    async fn test_inverted_range_is_invalid() {
        let tmp = tempdir().unwrap();
        let store = LocalStore::new(tmp.path());
        let err = run_years(2021, 2020, &store, &PublishOptions::default(), &Client::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_run_local_writes_outputs() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/scrdata_2020.zip")
            .with_status(200)
            .with_body(sample_zip())
            .create_async()
            .await;

        let tmp = tempdir().unwrap();
        let opts = PipelineOptions {
            base_dir: tmp.path().to_path_buf(),
            archive_url_template: format!("{}/scrdata_{{year}}.zip", server.url()),
            save_csv: true,
            ..Default::default()
        };

        let run = run_local(2020, &opts, &Client::new()).await.unwrap();
        assert_eq!(run.raw_rows, 3);
        assert_eq!(run.processed.batch.num_rows(), 2);
        assert_eq!(run.metadata.csv_files, 2);

        let paths = YearPaths::new(tmp.path(), 2020);
        assert!(paths.parquet_path().is_file());
        assert!(paths.csv_path().is_file());
        assert!(paths.extracted_dir.join("scrdata_202001.csv").is_file());
    }

    #[tokio::test]
    async fn test_run_local_rejects_bad_year_before_io() {
        let tmp = tempdir().unwrap();
        let opts = PipelineOptions {
            base_dir: tmp.path().join("base"),
            ..Default::default()
        };
        let err = run_local(2101, &opts, &Client::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument(_)));
        assert!(!tmp.path().join("base").exists());
    }
}
