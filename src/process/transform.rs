// src/process/transform.rs
use arrow::{
    array::{
        Array, ArrayRef, BooleanArray, Date32Array, Float64Array, Int32Array, StringArray,
        UInt32Array,
    },
    compute::{filter_record_batch, take_record_batch},
    datatypes::{DataType, Field, Schema},
    record_batch::{RecordBatch, RecordBatchOptions},
};
use chrono::Datelike;
use serde::Serialize;
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info, instrument, warn};

use crate::config::SOURCE_COLUMN;
use crate::error::Result;
use crate::process::{convert, utils::normalize_column_name};

pub const DATE_COLUMN: &str = "data_base";
pub const YEAR_COLUMN: &str = "ano";
pub const MONTH_COLUMN: &str = "mes";
pub const ACTIVE_PORTFOLIO: &str = "carteira_ativa";
pub const PAST_DUE_PORTFOLIO: &str = "carteira_vencida";

/// Text columns never run through numeric coercion.
pub const CATEGORICAL_COLUMNS: &[&str] = &[
    "uf",
    "segmento",
    "cliente",
    "cnae_ocupacao",
    "porte",
    "modalidade",
    "submodalidade",
    "origem",
    "indexador",
];

/// Whether a normalized column name is kept as text rather than coerced
/// to a number: the categorical columns, the date parts and provenance.
pub fn is_text_column(name: &str) -> bool {
    CATEGORICAL_COLUMNS.contains(&name)
        || [DATE_COLUMN, YEAR_COLUMN, MONTH_COLUMN, SOURCE_COLUMN].contains(&name)
}

/// (output, numerator, denominator)
pub const INDICATORS: &[(&str, &str, &str)] = &[
    ("taxa_inadimplencia", "carteira_inadimplencia", ACTIVE_PORTFOLIO),
    ("perc_carteira_vencida", PAST_DUE_PORTFOLIO, ACTIVE_PORTFOLIO),
    ("taxa_ativo_problematico", "ativo_problematico", ACTIVE_PORTFOLIO),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformOptions {
    /// Drop rows whose `carteira_ativa` is not strictly positive.
    pub remove_degenerate_rows: bool,
    pub derive_indicators: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            remove_degenerate_rows: true,
            derive_indicators: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformReport {
    pub rows_in: usize,
    pub rows_removed: usize,
    /// Rows where `carteira_vencida > carteira_ativa`. Reported, never acted on.
    pub inconsistent_rows: usize,
    pub null_dates: usize,
    pub rows_out: usize,
    pub columns_out: usize,
}

#[derive(Debug)]
pub struct Processed {
    pub batch: RecordBatch,
    pub report: TransformReport,
}

/// Working set of named columns between steps.
struct Columns {
    fields: Vec<Field>,
    arrays: Vec<ArrayRef>,
    rows: usize,
}

impl Columns {
    fn index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    fn float(&self, name: &str) -> Option<&Float64Array> {
        let i = self.index(name)?;
        self.arrays[i].as_any().downcast_ref::<Float64Array>()
    }

    /// Replace a column in place, or append it.
    fn put(&mut self, name: &str, array: ArrayRef) {
        let field = Field::new(name, array.data_type().clone(), true);
        match self.index(name) {
            Some(i) => {
                self.fields[i] = field;
                self.arrays[i] = array;
            }
            None => {
                self.fields.push(field);
                self.arrays.push(array);
            }
        }
    }

    fn into_batch(self) -> Result<RecordBatch> {
        let options = RecordBatchOptions::new().with_row_count(Some(self.rows));
        Ok(RecordBatch::try_new_with_options(
            Arc::new(Schema::new(self.fields)),
            self.arrays,
            &options,
        )?)
    }
}

/// Turn the consolidated raw table into the analytical one.
///
/// Bad cells never fail the run: unparseable dates and numbers become
/// nulls, degenerate rows are filtered (when enabled) and inconsistent
/// rows are only counted. Errors come from Arrow itself.
#[instrument(level = "info", skip(raw, opts), fields(rows = raw.num_rows()))]
pub fn process_scrdata(raw: &RecordBatch, opts: &TransformOptions) -> Result<Processed> {
    let mut report = TransformReport {
        rows_in: raw.num_rows(),
        ..Default::default()
    };

    // 1) names
    let mut cols = normalize_names(raw);

    // 2) base date, year, month
    if let Some(i) = cols.index(DATE_COLUMN) {
        let dates = convert::to_date_column(&cols.arrays[i]);
        report.null_dates = dates.null_count();
        let (years, months) = split_date(&dates);
        cols.put(DATE_COLUMN, dates);
        cols.put(YEAR_COLUMN, Arc::new(years));
        cols.put(MONTH_COLUMN, Arc::new(months));
        if report.null_dates > 0 {
            warn!(null_dates = report.null_dates, "unparseable base dates set to null");
        }
    }

    // 3) locale numbers
    coerce_numeric_columns(&mut cols);

    // 4) ratios
    if opts.derive_indicators {
        for (out, num, den) in INDICATORS {
            let ratio = match (cols.float(num), cols.float(den)) {
                (Some(n), Some(d)) => safe_ratio(n, d),
                _ => {
                    debug!(indicator = out, "source columns missing, skipped");
                    continue;
                }
            };
            cols.put(out, Arc::new(ratio));
        }
    }

    let mut batch = cols.into_batch()?;

    // 5) degenerate rows
    if opts.remove_degenerate_rows {
        if let Some(mask) = positive_mask(&batch, ACTIVE_PORTFOLIO) {
            let before = batch.num_rows();
            batch = filter_record_batch(&batch, &mask)?;
            report.rows_removed = before - batch.num_rows();
            info!(removed = report.rows_removed, "rows without active portfolio dropped");
        }
    }

    // 6) consistency, diagnostic only
    report.inconsistent_rows = count_exceeding(&batch, PAST_DUE_PORTFOLIO, ACTIVE_PORTFOLIO);
    if report.inconsistent_rows > 0 {
        warn!(
            count = report.inconsistent_rows,
            "rows with carteira_vencida above carteira_ativa"
        );
    }

    // 7) order by base date
    if let Some(indices) = date_order(&batch) {
        batch = take_record_batch(&batch, &indices)?;
    }

    report.rows_out = batch.num_rows();
    report.columns_out = batch.num_columns();
    info!(
        rows_out = report.rows_out,
        columns_out = report.columns_out,
        "transform complete"
    );
    Ok(Processed { batch, report })
}

fn normalize_names(raw: &RecordBatch) -> Columns {
    let mut seen: HashSet<String> = HashSet::new();
    let mut fields = Vec::with_capacity(raw.num_columns());

    for f in raw.schema().fields() {
        let base = normalize_column_name(f.name());
        let mut name = base.clone();
        let mut n = 1;
        while !seen.insert(name.clone()) {
            name = format!("{}.{}", base, n);
            n += 1;
        }
        if name != base {
            // case or accent variants of one header stay separate columns
            warn!(column = %f.name(), renamed = %name, "normalized column name collides, suffixed");
        }
        fields.push(Field::new(name, f.data_type().clone(), true));
    }

    Columns {
        fields,
        arrays: raw.columns().to_vec(),
        rows: raw.num_rows(),
    }
}

fn split_date(dates: &ArrayRef) -> (Int32Array, Int32Array) {
    match dates.as_any().downcast_ref::<Date32Array>() {
        Some(d) => {
            let years = (0..d.len())
                .map(|i| d.value_as_date(i).filter(|_| d.is_valid(i)).map(|x| x.year()))
                .collect();
            let months = (0..d.len())
                .map(|i| {
                    d.value_as_date(i)
                        .filter(|_| d.is_valid(i))
                        .map(|x| x.month() as i32)
                })
                .collect();
            (years, months)
        }
        None => (
            Int32Array::new_null(dates.len()),
            Int32Array::new_null(dates.len()),
        ),
    }
}

fn coerce_numeric_columns(cols: &mut Columns) {
    for i in 0..cols.fields.len() {
        let name = cols.fields[i].name().clone();
        if is_text_column(&name) {
            continue;
        }
        let Some(text) = cols.arrays[i].as_any().downcast_ref::<StringArray>() else {
            continue;
        };
        let numbers = convert::coerce_locale_numeric(text);
        debug!(column = %name, nulls = numbers.null_count(), "coerced to number");
        cols.fields[i] = Field::new(name, DataType::Float64, true);
        cols.arrays[i] = Arc::new(numbers);
    }
}

/// `num / den`, null wherever either side is null, the divisor is zero or
/// the quotient is not finite.
pub fn safe_ratio(num: &Float64Array, den: &Float64Array) -> Float64Array {
    num.iter()
        .zip(den.iter())
        .map(|(n, d)| match (n, d) {
            (Some(n), Some(d)) if d != 0.0 => Some(n / d).filter(|r| r.is_finite()),
            _ => None,
        })
        .collect()
}

fn float_column<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a Float64Array> {
    batch
        .column_by_name(name)?
        .as_any()
        .downcast_ref::<Float64Array>()
}

fn positive_mask(batch: &RecordBatch, name: &str) -> Option<BooleanArray> {
    let col = float_column(batch, name)?;
    Some(
        col.iter()
            .map(|v| Some(v.is_some_and(|x| x > 0.0)))
            .collect(),
    )
}

fn count_exceeding(batch: &RecordBatch, left: &str, right: &str) -> usize {
    match (float_column(batch, left), float_column(batch, right)) {
        (Some(l), Some(r)) => l
            .iter()
            .zip(r.iter())
            .filter(|(a, b)| matches!((a, b), (Some(a), Some(b)) if a > b))
            .count(),
        _ => 0,
    }
}

/// Stable ascending order on `data_base`, null dates last.
fn date_order(batch: &RecordBatch) -> Option<UInt32Array> {
    let dates = batch
        .column_by_name(DATE_COLUMN)?
        .as_any()
        .downcast_ref::<Date32Array>()?;
    let mut idx: Vec<u32> = (0..dates.len() as u32).collect();
    idx.sort_by_key(|&i| {
        let i = i as usize;
        if dates.is_valid(i) {
            (false, dates.value(i))
        } else {
            (true, 0)
        }
    });
    Some(UInt32Array::from(idx))
}
