// src/process/load.rs
use arrow::{
    array::{ArrayRef, StringArray, StringBuilder},
    datatypes::{DataType, Field, Schema},
    record_batch::{RecordBatch, RecordBatchOptions},
};
use glob::{glob_with, MatchOptions, Pattern};
use std::{
    collections::HashMap,
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, instrument, warn};

use crate::config::SOURCE_COLUMN;
use crate::error::{PipelineError, Result};
use crate::process::{
    convert::infer_float_column,
    schema::concat_tables,
    transform::is_text_column,
    utils::{decode_text, normalize_column_name, sniff_delimiter, TextEncoding},
};

/// Bytes read from the head of a file to guess its delimiter.
pub const SNIFF_BYTES: u64 = 50_000;

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Use this delimiter instead of sniffing each file.
    pub delimiter: Option<u8>,
    pub add_source_column: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            add_source_column: true,
        }
    }
}

/// Result of loading a directory of monthly files.
#[derive(Debug)]
pub struct Loaded {
    pub batch: RecordBatch,
    pub files: Vec<PathBuf>,
}

/// All `*.csv` files under `dir` (any depth, any case), sorted by path.
pub fn find_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/**/*.csv", Pattern::escape(&dir.to_string_lossy()));
    let opts = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };
    let mut files: Vec<PathBuf> = glob_with(&pattern, opts)
        .map_err(|e| PipelineError::load(dir, e))?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// First [`SNIFF_BYTES`] of a file, lossily decoded.
pub fn read_sample(path: &Path) -> Result<String> {
    let mut buf = Vec::new();
    File::open(path)?.take(SNIFF_BYTES).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Read one delimited file into an all-`Utf8` batch.
///
/// Empty cells are null. Short rows are padded with nulls; a row with
/// more non-empty fields than the header is an error. Repeated header
/// names get `.1`, `.2`, ... suffixes.
#[instrument(level = "debug", skip(path), fields(file = %path.display()))]
pub fn read_csv_file(path: &Path, delimiter: u8, add_source: bool) -> Result<RecordBatch> {
    let bytes = fs::read(path)?;
    let (text, encoding) = decode_text(bytes);
    if encoding == TextEncoding::Latin1 {
        warn!(file = %path.display(), "not valid UTF-8, read as Latin-1");
    }

    let (headers, mut builders, rows) =
        parse_delimited(&text, delimiter).map_err(|detail| PipelineError::load(path, detail))?;

    let mut fields: Vec<Field> = headers
        .iter()
        .map(|h| Field::new(h, DataType::Utf8, true))
        .collect();
    let mut columns: Vec<ArrayRef> = builders
        .iter_mut()
        .map(|b| Arc::new(b.finish()) as ArrayRef)
        .collect();

    if add_source {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        fields.push(Field::new(SOURCE_COLUMN, DataType::Utf8, true));
        columns.push(Arc::new(StringArray::from(vec![name.as_str(); rows])));
    }

    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    let batch = RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), columns, &options)?;
    debug!(rows, columns = batch.num_columns(), "file read");
    Ok(batch)
}

type Parsed = (Vec<String>, Vec<StringBuilder>, usize);

fn parse_delimited(text: &str, delimiter: u8) -> std::result::Result<Parsed, String> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = dedupe_headers(
        rdr.headers()
            .map_err(|e| e.to_string())?
            .iter()
            .map(str::to_string)
            .collect(),
    );
    let width = headers.len();
    let mut builders: Vec<StringBuilder> = (0..width).map(|_| StringBuilder::new()).collect();
    let mut rows = 0usize;

    for (idx, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| format!("record {}: {}", idx + 1, e))?;

        if record.iter().skip(width).any(|v| !v.is_empty()) {
            return Err(format!(
                "record {} has {} fields, header has {}",
                idx + 1,
                record.len(),
                width
            ));
        }

        for (col, b) in builders.iter_mut().enumerate() {
            match record.get(col) {
                Some(v) if !v.is_empty() => b.append_value(v),
                _ => b.append_null(),
            }
        }
        rows += 1;
    }

    Ok((headers, builders, rows))
}

fn dedupe_headers(raw: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.into_iter()
        .map(|h| {
            let n = seen.entry(h.clone()).or_insert(0);
            let out = if *n == 0 { h } else { format!("{}.{}", h, n) };
            *n += 1;
            out
        })
        .collect()
}

/// Load and concatenate `paths` in order. Columns missing from a file are
/// null for its rows.
///
/// Number columns are recognised per file, before stacking: a column whose
/// every value in that file is a plain float becomes `Float64`. When the
/// same column is numeric in one file and text in another, the merge keeps
/// it numeric and reads the text side as a locale number, so `1000.5` from
/// a comma-delimited file and `1.000,00` from a semicolon one both survive.
/// Categorical, date and provenance columns are never promoted.
#[instrument(level = "info", skip(paths, opts), fields(files = paths.len()))]
pub fn load_csv_files(paths: &[PathBuf], opts: &LoadOptions) -> Result<RecordBatch> {
    let mut parts = Vec::with_capacity(paths.len());
    for p in paths {
        let delimiter = match opts.delimiter {
            Some(d) => d,
            None => sniff_delimiter(&read_sample(p)?),
        };
        debug!(file = %p.display(), delimiter = %(delimiter as char), "reading");
        let text = read_csv_file(p, delimiter, opts.add_source_column)?;
        parts.push(promote_numeric_columns(&text)?);
    }

    let batch = concat_tables(&parts)?;
    info!(
        rows = batch.num_rows(),
        columns = batch.num_columns(),
        "raw table consolidated"
    );
    Ok(batch)
}

/// Find the CSV files under `dir` and load them.
pub fn load_directory(dir: &Path, opts: &LoadOptions) -> Result<Loaded> {
    let files = find_csv_files(dir)?;
    if files.is_empty() {
        return Err(PipelineError::EmptyInput {
            dir: dir.to_path_buf(),
        });
    }
    info!(count = files.len(), dir = %dir.display(), "CSV files found");
    let batch = load_csv_files(&files, opts)?;
    Ok(Loaded { batch, files })
}

fn promote_numeric_columns(batch: &RecordBatch) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields = Vec::with_capacity(schema.fields().len());
    let mut columns = Vec::with_capacity(schema.fields().len());

    for (f, col) in schema.fields().iter().zip(batch.columns()) {
        let promoted = match col.as_any().downcast_ref::<StringArray>() {
            Some(text) if !is_text_column(&normalize_column_name(f.name())) => {
                infer_float_column(text)
            }
            _ => None,
        };
        match promoted {
            Some(floats) => {
                fields.push(Field::new(f.name(), DataType::Float64, true));
                columns.push(Arc::new(floats) as ArrayRef);
            }
            None => {
                fields.push(f.as_ref().clone());
                columns.push(col.clone());
            }
        }
    }

    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        columns,
        &options,
    )?)
}
