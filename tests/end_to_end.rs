// tests/end_to_end.rs
use arrow::array::{Array, Date32Array, Float64Array, StringArray};
use chrono::NaiveDate;
use scrdata::{
    config::SOURCE_COLUMN,
    error::PipelineError,
    process::{
        extract::safe_extract,
        load::{load_directory, LoadOptions},
        transform::{process_scrdata, TransformOptions},
    },
};
use std::{
    fs,
    io::{Cursor, Write},
    path::Path,
};
use tempfile::tempdir;
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

fn write_zip(path: &Path, entries: &[(&str, &str)]) {
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
    fs::write(path, buf).unwrap();
}

#[test]
fn two_files_with_different_columns() {
    let tmp = tempdir().unwrap();
    let zip_path = tmp.path().join("scrdata_2020.zip");
    // the later month comes first in name order, so sorting is observable
    write_zip(
        &zip_path,
        &[
            (
                "a_202003.csv",
                "Data_Base;UF;Carteira_Ativa\n2020-03-31;SP;2.000,00\n2020-03-31;RJ;500,00\n",
            ),
            (
                "b_202001.csv",
                "Data_Base,UF,Carteira_Ativa,Carteira_Inadimplencia\n\
                 2020-01-31,MG,1000,50\n\
                 2020-02-29,BA,400,\n",
            ),
        ],
    );
    let extracted = tmp.path().join("extracted");

    let outcome = safe_extract(&zip_path, &extracted, false).unwrap();
    assert_eq!(outcome.files_written, 2);

    let loaded = load_directory(&extracted, &LoadOptions::default()).unwrap();
    assert_eq!(loaded.files.len(), 2);
    assert_eq!(loaded.batch.num_rows(), 4);

    let processed = process_scrdata(&loaded.batch, &TransformOptions::default()).unwrap();
    let batch = &processed.batch;
    assert_eq!(processed.report.rows_out, 4);
    assert_eq!(processed.report.rows_removed, 0);

    let dates = batch
        .column_by_name("data_base")
        .unwrap()
        .as_any()
        .downcast_ref::<Date32Array>()
        .unwrap();
    let ordered: Vec<NaiveDate> = (0..dates.len())
        .map(|i| dates.value_as_date(i).unwrap())
        .collect();
    let mut sorted = ordered.clone();
    sorted.sort();
    assert_eq!(ordered, sorted);

    let source = batch
        .column_by_name(SOURCE_COLUMN)
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    let rate = batch
        .column_by_name("taxa_inadimplencia")
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();

    for i in 0..batch.num_rows() {
        match source.value(i) {
            "a_202003.csv" => assert!(rate.is_null(i), "row {i} should have no rate"),
            "b_202001.csv" if dates.value_as_date(i) == NaiveDate::from_ymd_opt(2020, 1, 31) => {
                assert_eq!(rate.value(i), 0.05)
            }
            // blank delinquency cell
            "b_202001.csv" => assert!(rate.is_null(i)),
            other => panic!("unexpected source {other}"),
        }
    }

    let ativa = batch
        .column_by_name("carteira_ativa")
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    let mut values: Vec<f64> = ativa.iter().flatten().collect();
    values.sort_by(f64::total_cmp);
    assert_eq!(values, vec![400.0, 500.0, 1000.0, 2000.0]);
}

#[test]
fn decimal_styles_differ_between_files() {
    let tmp = tempdir().unwrap();
    let zip_path = tmp.path().join("scrdata_2020.zip");
    write_zip(
        &zip_path,
        &[
            (
                "a_202001.csv",
                "Data_Base;UF;Carteira_Ativa\n2020-01-31;SP;1.000,00\n",
            ),
            (
                "b_202002.csv",
                "Data_Base,UF,Carteira_Ativa,Carteira_Inadimplencia\n2020-02-29,RJ,1000.5,50.25\n",
            ),
        ],
    );
    let extracted = tmp.path().join("extracted");
    safe_extract(&zip_path, &extracted, false).unwrap();

    let loaded = load_directory(&extracted, &LoadOptions::default()).unwrap();
    let processed = process_scrdata(&loaded.batch, &TransformOptions::default()).unwrap();
    let batch = &processed.batch;
    assert_eq!(processed.report.rows_out, 2);

    let ativa = batch
        .column_by_name("carteira_ativa")
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    let rate = batch
        .column_by_name("taxa_inadimplencia")
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();

    // sorted by date: the SP row from January first
    assert_eq!(ativa.value(0), 1000.0);
    assert_eq!(ativa.value(1), 1000.5);
    assert!(rate.is_null(0));
    assert!((rate.value(1) - 50.25 / 1000.5).abs() < 1e-12);
}

#[test]
fn zip_slip_leaves_nothing_behind() {
    let tmp = tempdir().unwrap();
    let zip_path = tmp.path().join("evil.zip");
    write_zip(
        &zip_path,
        &[("ok.csv", "a\n1\n"), ("nested/../../escape.csv", "a\n1\n")],
    );
    let dest = tmp.path().join("out");

    let err = safe_extract(&zip_path, &dest, false).unwrap_err();
    assert!(matches!(err, PipelineError::Security { .. }));
    assert!(!tmp.path().join("escape.csv").exists());
    assert!(!dest.join("ok.csv").exists());
}
