use arrow::{
    array::{new_null_array, Array, ArrayRef, StringArray},
    compute::{cast, concat_batches},
    datatypes::{DataType, Field, Schema, SchemaRef},
    record_batch::RecordBatch,
};
use std::{collections::HashMap, sync::Arc};

use crate::error::Result;
use crate::process::convert::coerce_locale_numeric;

/// Union of several schemas, in order of first appearance. Every field is
/// nullable since any file may lack it. A name seen as both `Float64` and
/// `Utf8` stays `Float64`; any other conflict is widened to `Utf8`.
pub fn merge_schemas(schemas: &[SchemaRef]) -> Schema {
    let mut order: Vec<String> = Vec::new();
    let mut types: HashMap<String, DataType> = HashMap::new();

    for schema in schemas {
        for f in schema.fields() {
            match types.get(f.name()) {
                None => {
                    order.push(f.name().clone());
                    types.insert(f.name().clone(), f.data_type().clone());
                }
                Some(existing) if existing != f.data_type() => {
                    let widened = match (existing, f.data_type()) {
                        (DataType::Float64, DataType::Utf8) | (DataType::Utf8, DataType::Float64) => {
                            DataType::Float64
                        }
                        _ => DataType::Utf8,
                    };
                    types.insert(f.name().clone(), widened);
                }
                Some(_) => {}
            }
        }
    }

    let fields: Vec<Field> = order
        .into_iter()
        .map(|name| {
            let dt = types.remove(&name).unwrap_or(DataType::Utf8);
            Field::new(name, dt, true)
        })
        .collect();
    Schema::new(fields)
}

/// Re-shape `batch` onto `target`: columns it lacks become all-null,
/// columns of another type are cast. Text going into a `Float64` column is
/// read as a locale number (`1.000,00`), not with Arrow's plain cast.
pub fn align_to_schema(batch: &RecordBatch, target: &SchemaRef) -> Result<RecordBatch> {
    let src = batch.schema();
    let mut cols: Vec<ArrayRef> = Vec::with_capacity(target.fields().len());

    for f in target.fields() {
        let col = match src.index_of(f.name()) {
            Ok(i) => {
                let arr = batch.column(i);
                if arr.data_type() == f.data_type() {
                    arr.clone()
                } else if let (Some(text), DataType::Float64) =
                    (arr.as_any().downcast_ref::<StringArray>(), f.data_type())
                {
                    Arc::new(coerce_locale_numeric(text)) as ArrayRef
                } else {
                    cast(arr, f.data_type())?
                }
            }
            Err(_) => new_null_array(f.data_type(), batch.num_rows()),
        };
        cols.push(col);
    }

    Ok(RecordBatch::try_new(target.clone(), cols)?)
}

/// Outer-join style concatenation: merge schemas, align, stack.
pub fn concat_tables(batches: &[RecordBatch]) -> Result<RecordBatch> {
    let schemas: Vec<SchemaRef> = batches.iter().map(|b| b.schema()).collect();
    let merged = Arc::new(merge_schemas(&schemas));

    let aligned = batches
        .iter()
        .map(|b| align_to_schema(b, &merged))
        .collect::<Result<Vec<_>>>()?;

    Ok(concat_batches(&merged, &aligned)?)
}
