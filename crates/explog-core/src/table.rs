//! Tabular in-memory representation and file readers.
//!
//! `Table` is the shape everything funnels into: ordered column names plus
//! one JSON-valued map per row. Readers exist for line-record JSON (a
//! top-level array of objects is also accepted), CSV with inferred schema,
//! and Parquet.

use std::collections::HashMap;
use std::fs::File;
use std::io::Seek;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::{json, Value};

use crate::error::{ExplogError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<HashMap<String, Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<HashMap<String, Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[HashMap<String, Value>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&HashMap<String, Value>> {
        self.rows.get(index)
    }

    /// The column/data split used by table-artifact viewers.
    pub fn to_artifact_json(&self) -> Value {
        let data: Vec<Vec<Value>> = self
            .rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        json!({ "columns": self.columns, "data": data })
    }
}

/// Read a tabular file, dispatching on the extension.
pub fn read_table(path: &Path) -> Result<Table> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "json" => read_json_records(path),
        "csv" => read_csv(path),
        "parquet" => read_parquet(path),
        _ => Err(ExplogError::UnsupportedFormat(format!(".{ext}"))),
    }
}

/// Parse line-record JSON: one object per line, or a top-level array of
/// objects.
pub fn read_json_records(path: &Path) -> Result<Table> {
    let text = std::fs::read_to_string(path)?;
    let trimmed = text.trim_start();
    let records: Vec<serde_json::Map<String, Value>> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        let mut records = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line)?);
        }
        records
    };

    let mut columns: Vec<String> = Vec::new();
    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let mut row = HashMap::with_capacity(record.len());
        for (key, value) in record {
            if !columns.contains(&key) {
                columns.push(key.clone());
            }
            row.insert(key, value);
        }
        rows.push(row);
    }
    Ok(Table::new(columns, rows))
}

fn read_csv(path: &Path) -> Result<Table> {
    let mut file = File::open(path)?;
    let format = Format::default().with_header(true);
    let (schema, _) = format.infer_schema(&mut file, None)?;
    file.rewind()?;
    let reader = ReaderBuilder::new(Arc::new(schema))
        .with_format(format)
        .build(file)?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    batches_to_table(&batches)
}

fn read_parquet(path: &Path) -> Result<Table> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let reader = builder.build()?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    batches_to_table(&batches)
}

fn batches_to_table(batches: &[RecordBatch]) -> Result<Table> {
    let Some(first) = batches.first() else {
        return Ok(Table::default());
    };
    let columns: Vec<String> = first
        .schema()
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect();
    let mut rows = Vec::new();
    for batch in batches {
        rows.extend(record_batch_to_rows(batch)?);
    }
    Ok(Table::new(columns, rows))
}

fn record_batch_to_rows(batch: &RecordBatch) -> Result<Vec<HashMap<String, Value>>> {
    let schema = batch.schema();
    let n = batch.num_rows();
    let mut rows = vec![HashMap::new(); n];

    for (col_idx, field) in schema.fields().iter().enumerate() {
        let col = batch.column(col_idx);
        let name = field.name().clone();

        for row_idx in 0..n {
            if col.is_null(row_idx) {
                rows[row_idx].insert(name.clone(), Value::Null);
                continue;
            }
            let val = match field.data_type() {
                DataType::Float64 => {
                    let arr = col.as_any().downcast_ref::<Float64Array>().unwrap();
                    let f = arr.value(row_idx);
                    if f.is_nan() || f.is_infinite() {
                        Value::Null
                    } else {
                        json!(f)
                    }
                }
                DataType::Int64 => {
                    let arr = col.as_any().downcast_ref::<Int64Array>().unwrap();
                    json!(arr.value(row_idx))
                }
                DataType::Boolean => {
                    let arr = col.as_any().downcast_ref::<BooleanArray>().unwrap();
                    json!(arr.value(row_idx))
                }
                DataType::Utf8 => {
                    let arr = col.as_any().downcast_ref::<StringArray>().unwrap();
                    json!(arr.value(row_idx))
                }
                DataType::Timestamp(TimeUnit::Microsecond, _) => {
                    let arr = col
                        .as_any()
                        .downcast_ref::<TimestampMicrosecondArray>()
                        .unwrap();
                    let micros = arr.value(row_idx);
                    let dt = DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_default();
                    json!(dt.to_rfc3339())
                }
                _ => arrow::util::display::array_value_to_string(col, row_idx)
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            };
            rows[row_idx].insert(name.clone(), val);
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn json_array_of_records_parses() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("results.json");
        std::fs::write(&path, r#"[{"accuracy": 0.92, "model": "baseline"}]"#).unwrap();

        let table = read_json_records(&path).unwrap();
        assert_eq!(table.num_rows(), 1);
        let row = table.row(0).unwrap();
        assert_eq!(row.get("accuracy"), Some(&json!(0.92)));
        assert_eq!(row.get("model"), Some(&json!("baseline")));
    }

    #[test]
    fn line_record_json_parses() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("scores.json");
        std::fs::write(&path, "{\"score\": 1}\n{\"score\": 2, \"note\": \"x\"}\n").unwrap();

        let table = read_json_records(&path).unwrap();
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.columns(), ["score", "note"]);
        assert_eq!(table.row(1).unwrap().get("note"), Some(&json!("x")));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.json");
        std::fs::write(&path, "{not json at all").unwrap();
        assert!(read_json_records(&path).is_err());
    }

    #[test]
    fn csv_parses_with_inferred_schema() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("runs.csv");
        std::fs::write(&path, "name,score\nalpha,1.5\nbeta,2.0\n").unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.columns(), ["name", "score"]);
        assert_eq!(table.row(0).unwrap().get("name"), Some(&json!("alpha")));
        assert_eq!(table.row(1).unwrap().get("score"), Some(&json!(2.0)));
    }

    #[test]
    fn parquet_round_trips_through_the_metric_store() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("metrics.parquet");
        crate::storage::append_metrics(
            &path,
            &[
                crate::models::MetricPoint::new("loss", 0.25),
                crate::models::MetricPoint::new("acc", 0.9),
            ],
        )
        .unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.columns(), ["key", "value", "timestamp"]);
        assert_eq!(table.row(0).unwrap().get("key"), Some(&json!("loss")));
        assert_eq!(table.row(1).unwrap().get("value"), Some(&json!(0.9)));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = read_table(Path::new("input.txt")).unwrap_err();
        match err {
            ExplogError::UnsupportedFormat(ext) => assert_eq!(ext, ".txt"),
            other => panic!("expected UnsupportedFormat, got {other}"),
        }
    }

    #[test]
    fn artifact_json_uses_column_order() {
        let table = Table::new(
            vec!["b".into(), "a".into()],
            vec![HashMap::from([
                ("a".to_string(), json!(1)),
                ("b".to_string(), json!(2)),
            ])],
        );
        assert_eq!(
            table.to_artifact_json(),
            json!({ "columns": ["b", "a"], "data": [[2, 1]] })
        );
    }
}
