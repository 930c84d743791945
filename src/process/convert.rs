use crate::process::{date_parser, utils};
use arrow::{
    array::{
        new_null_array, Array, ArrayRef, Date32Builder, Float64Array, Float64Builder, StringArray,
    },
    datatypes::DataType,
};
use std::sync::Arc;

/// Parse a Brazilian-formatted number: `"1.234,56"` → `1234.56`.
///
/// `.` is a thousands separator and is dropped, `,` is the decimal mark.
/// Returns `None` for anything that is not a finite number afterwards.
pub fn parse_locale_number(raw: &str) -> Option<f64> {
    let cleaned = utils::clean_str(raw);
    if cleaned.is_empty() {
        return None;
    }
    let normalized = cleaned.replace('.', "").replace(',', ".");
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Coerce a text column cell by cell; failures become nulls.
pub fn coerce_locale_numeric(arr: &StringArray) -> Float64Array {
    let mut b = Float64Builder::with_capacity(arr.len());
    for opt in arr.iter() {
        b.append_option(opt.and_then(parse_locale_number));
    }
    b.finish()
}

/// Turn a base-date column into `Date32`. Text is parsed with
/// [`date_parser::parse_date`]; a float column that was inferred from
/// `YYYYMMDD` integers is read back as digits.
pub fn to_date_column(arr: &ArrayRef) -> ArrayRef {
    let mut b = Date32Builder::with_capacity(arr.len());

    match arr.data_type() {
        DataType::Utf8 => {
            let Some(s) = arr.as_any().downcast_ref::<StringArray>() else {
                return new_null_array(&DataType::Date32, arr.len());
            };
            for opt in s.iter() {
                b.append_option(opt.and_then(date_parser::parse_date).map(date_parser::to_date32));
            }
        }
        DataType::Float64 => {
            let Some(f) = arr.as_any().downcast_ref::<Float64Array>() else {
                return new_null_array(&DataType::Date32, arr.len());
            };
            for opt in f.iter() {
                let d = opt
                    .filter(|v| v.fract() == 0.0)
                    .and_then(|v| date_parser::parse_date(&format!("{}", v as i64)));
                b.append_option(d.map(date_parser::to_date32));
            }
        }
        DataType::Date32 => return arr.clone(),
        _ => b.append_nulls(arr.len()),
    }

    Arc::new(b.finish())
}

/// Promote a text column to `Float64` when every non-null cell is a plain
/// float literal. Returns `None` when the column should stay text.
pub fn infer_float_column(arr: &StringArray) -> Option<Float64Array> {
    let mut seen = false;
    for v in arr.iter().flatten() {
        if utils::infer_arrow_dtype_from_str(v.trim()) != DataType::Float64 {
            return None;
        }
        seen = true;
    }
    if !seen {
        return None;
    }
    Some(
        arr.iter()
            .map(|opt| opt.and_then(|v| v.trim().parse::<f64>().ok()))
            .collect(),
    )
}
