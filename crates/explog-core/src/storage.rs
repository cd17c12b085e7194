//! Storage helpers for the file-store backend: YAML documents and the
//! Parquet metric log.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Float64Array, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::error::Result;
use crate::models::{MetricPoint, RunMetadata};

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

// ─── YAML I/O ────────────────────────────────────────────────────────────────

pub fn save_yaml<T: serde::Serialize>(path: &Path, data: &T) -> Result<()> {
    let content = serde_yaml::to_string(data)?;
    fs::write(path, content)?;
    Ok(())
}

pub fn load_yaml<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

pub fn save_run_metadata(run_dir: &Path, meta: &RunMetadata) -> Result<()> {
    save_yaml(&run_dir.join("run.yaml"), meta)
}

pub fn load_run_metadata(run_dir: &Path) -> Result<RunMetadata> {
    let content = fs::read_to_string(run_dir.join("run.yaml"))?;
    Ok(serde_yaml::from_str(&content)?)
}

// ─── Parquet metric log ──────────────────────────────────────────────────────

fn metric_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Float64, false),
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
    ]))
}

fn points_to_batch(points: &[MetricPoint]) -> Result<RecordBatch> {
    let keys: Vec<&str> = points.iter().map(|p| p.key.as_str()).collect();
    let values: Vec<f64> = points.iter().map(|p| p.value).collect();
    let timestamps: Vec<i64> = points.iter().map(|p| p.timestamp.timestamp_micros()).collect();

    Ok(RecordBatch::try_new(
        metric_schema(),
        vec![
            Arc::new(StringArray::from(keys)),
            Arc::new(Float64Array::from(values)),
            Arc::new(
                TimestampMicrosecondArray::from(timestamps)
                    .with_timezone_opt(Some("UTC".to_string())),
            ),
        ],
    )?)
}

/// Append metric points to the Parquet log.
/// Strategy: read existing, concat, write back. Flushes are batched, so the
/// O(n) rewrite is acceptable at this volume.
pub fn append_metrics(path: &Path, points: &[MetricPoint]) -> Result<()> {
    if points.is_empty() {
        return Ok(());
    }
    let new_batch = points_to_batch(points)?;
    let final_batch = if path.exists() {
        let existing = read_parquet_batch(path)?;
        let schema = existing.schema();
        arrow::compute::concat_batches(&schema, &[existing, new_batch])?
    } else {
        new_batch
    };
    write_parquet(path, &final_batch)
}

/// Read the full metric log back.
pub fn read_metrics(path: &Path) -> Result<Vec<MetricPoint>> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let batch = read_parquet_batch(path)?;
    let n = batch.num_rows();
    let keys = batch
        .column(0)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| crate::error::ExplogError::Other("metric log has no key column".into()))?;
    let values = batch
        .column(1)
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| crate::error::ExplogError::Other("metric log has no value column".into()))?;
    let timestamps = batch
        .column(2)
        .as_any()
        .downcast_ref::<TimestampMicrosecondArray>()
        .ok_or_else(|| {
            crate::error::ExplogError::Other("metric log has no timestamp column".into())
        })?;

    let mut points = Vec::with_capacity(n);
    for idx in 0..n {
        points.push(MetricPoint {
            key: keys.value(idx).to_string(),
            value: values.value(idx),
            timestamp: DateTime::<Utc>::from_timestamp_micros(timestamps.value(idx))
                .unwrap_or_default(),
        });
    }
    Ok(points)
}

fn read_parquet_batch(path: &Path) -> Result<RecordBatch> {
    let file = fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let mut reader = builder.build()?;
    let mut batches = vec![];
    for batch in &mut reader {
        batches.push(batch?);
    }
    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(metric_schema()));
    }
    if batches.len() == 1 {
        return Ok(batches.remove(0));
    }
    let schema = batches[0].schema();
    Ok(arrow::compute::concat_batches(&schema, &batches)?)
}

fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = fs::File::create(path)?;
    let props = WriterProperties::builder()
        .set_compression(parquet::basic::Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunStatus;
    use tempfile::TempDir;

    #[test]
    fn metrics_append_across_flushes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("metrics.parquet");

        append_metrics(&path, &[MetricPoint::new("loss", 0.5)]).unwrap();
        append_metrics(
            &path,
            &[MetricPoint::new("loss", 0.4), MetricPoint::new("acc", 0.8)],
        )
        .unwrap();

        let points = read_metrics(&path).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].key, "loss");
        assert_eq!(points[2].value, 0.8);
    }

    #[test]
    fn read_metrics_on_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(read_metrics(&tmp.path().join("none.parquet"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn run_metadata_round_trips() {
        let tmp = TempDir::new().unwrap();
        let meta = RunMetadata {
            run_id: "abc123".into(),
            name: "run_x".into(),
            experiment: "exp".into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            duration_secs: None,
        };
        save_run_metadata(tmp.path(), &meta).unwrap();
        let loaded = load_run_metadata(tmp.path()).unwrap();
        assert_eq!(loaded.run_id, "abc123");
        assert_eq!(loaded.status, RunStatus::Running);
        assert!(loaded.finished_at.is_none());
    }
}
