//! The built-in file-store tracking backend.
//!
//! Runs live under `<root>/<experiment>/<run_name>/` as a `run.yaml`
//! metadata file, a Parquet metric log, YAML param/tag maps, an
//! `inputs.yaml` dataset list and an `artifacts/` tree.
//!
//! Metric, param and tag submission is a channel send; a background task on
//! a dedicated single-worker runtime owns the file handles, batches metric
//! rows and flushes them periodically. Artifacts, tables and input datasets
//! are written synchronously in the calling thread, mirroring the tracking
//! SDKs whose async mode covers only the scalar stream.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{ExplogError, Result};
use crate::models::{Dataset, DatasetMeta, MetricPoint, RunInfo, RunMetadata, RunStatus};
use crate::storage;
use crate::table::Table;
use crate::tracking::TrackingBackend;

const FLUSH_INTERVAL_ROWS: usize = 50;
const FLUSH_INTERVAL_MS: u64 = 500;

/// Commands sent to the background store task.
enum StoreCommand {
    Metric(MetricPoint),
    Param { key: String, value: String },
    Tag { key: String, value: String },
    /// Force flush the current buffers to disk.
    Flush(oneshot::Sender<()>),
    /// Flush everything and write final run metadata.
    Shutdown {
        status: RunStatus,
        reply: oneshot::Sender<()>,
    },
}

struct RunEngine {
    sender: mpsc::UnboundedSender<StoreCommand>,
    /// Keep the runtime alive as long as the run is active.
    runtime: Arc<Runtime>,
    run_dir: PathBuf,
}

pub struct FileStore {
    root: PathBuf,
    experiment: Option<String>,
    async_logging: bool,
    active: Option<RunInfo>,
    engine: Option<RunEngine>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            experiment: None,
            async_logging: true,
            active: None,
            engine: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the active run, if any.
    pub fn run_dir(&self) -> Option<&Path> {
        self.engine.as_ref().map(|engine| engine.run_dir.as_path())
    }

    fn engine(&self) -> Result<&RunEngine> {
        self.engine.as_ref().ok_or(ExplogError::RunNotActive)
    }

    fn send(&self, command: StoreCommand) -> Result<()> {
        self.engine()?
            .sender
            .send(command)
            .map_err(|_| ExplogError::ChannelClosed)?;
        if !self.async_logging {
            self.flush()?;
        }
        Ok(())
    }

    /// Block until the background task has drained and written everything.
    pub fn flush(&self) -> Result<()> {
        let engine = self.engine()?;
        let (tx, rx) = oneshot::channel();
        engine
            .sender
            .send(StoreCommand::Flush(tx))
            .map_err(|_| ExplogError::ChannelClosed)?;
        engine
            .runtime
            .block_on(rx)
            .map_err(|_| ExplogError::ChannelClosed)
    }

    fn artifacts_dir(&self) -> Result<PathBuf> {
        Ok(self.engine()?.run_dir.join("artifacts"))
    }
}

impl TrackingBackend for FileStore {
    fn set_experiment(&mut self, name: &str) -> Result<()> {
        self.experiment = Some(name.to_string());
        Ok(())
    }

    fn start_run(&mut self, run_name: &str) -> Result<RunInfo> {
        if self.active.is_some() {
            return Err(ExplogError::Other(
                "a run is already active on this backend".into(),
            ));
        }
        let experiment = self
            .experiment
            .clone()
            .unwrap_or_else(|| "Default".to_string());
        let run_dir = self.root.join(&experiment).join(run_name);
        storage::ensure_dir(&run_dir)?;
        storage::ensure_dir(&run_dir.join("artifacts"))?;

        let run_id = Uuid::new_v4().simple().to_string();
        let meta = RunMetadata {
            run_id: run_id.clone(),
            name: run_name.to_string(),
            experiment: experiment.clone(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            duration_secs: None,
        };
        storage::save_run_metadata(&run_dir, &meta)?;

        let runtime = Arc::new(
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("explog-store")
                .enable_all()
                .build()?,
        );
        let (sender, receiver) = mpsc::unbounded_channel::<StoreCommand>();
        runtime.spawn(background_task(receiver, run_dir.clone()));

        info!(
            experiment = %experiment,
            run = %run_name,
            run_id = %run_id,
            "file store run started"
        );

        self.engine = Some(RunEngine {
            sender,
            runtime,
            run_dir,
        });
        let info = RunInfo {
            run_id,
            run_name: run_name.to_string(),
        };
        self.active = Some(info.clone());
        Ok(info)
    }

    fn end_run(&mut self, status: RunStatus) -> Result<()> {
        let engine = self.engine.take().ok_or(ExplogError::RunNotActive)?;
        self.active = None;

        let (tx, rx) = oneshot::channel();
        engine
            .sender
            .send(StoreCommand::Shutdown { status, reply: tx })
            .map_err(|_| ExplogError::ChannelClosed)?;
        engine
            .runtime
            .block_on(rx)
            .map_err(|_| ExplogError::ChannelClosed)
    }

    fn active_run(&self) -> Option<&RunInfo> {
        self.active.as_ref()
    }

    fn enable_async_logging(&mut self, enabled: bool) -> Result<()> {
        self.async_logging = enabled;
        Ok(())
    }

    fn enable_autolog(&mut self, integration: &str) -> Result<()> {
        // The file store has nothing to instrument.
        info!(integration = integration, "autolog has no effect on the file store backend");
        Ok(())
    }

    fn log_metric(&mut self, key: &str, value: f64) -> Result<()> {
        self.send(StoreCommand::Metric(MetricPoint::new(key, value)))
    }

    fn log_param(&mut self, key: &str, value: &str) -> Result<()> {
        self.send(StoreCommand::Param {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    fn set_tag(&mut self, key: &str, value: &str) -> Result<()> {
        self.send(StoreCommand::Tag {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    fn log_artifact(&mut self, local_path: &Path, artifact_dir: &Path) -> Result<()> {
        let file_name = local_path.file_name().ok_or_else(|| {
            ExplogError::Other(format!(
                "artifact path {} has no file name",
                local_path.display()
            ))
        })?;
        let dest_dir = self.artifacts_dir()?.join(artifact_dir);
        storage::ensure_dir(&dest_dir)?;
        fs::copy(local_path, dest_dir.join(file_name))?;
        Ok(())
    }

    fn log_table(&mut self, table: &Table, artifact_file: &Path) -> Result<()> {
        let dest = self.artifacts_dir()?.join(artifact_file);
        if let Some(parent) = dest.parent() {
            storage::ensure_dir(parent)?;
        }
        let content = serde_json::to_string_pretty(&table.to_artifact_json())?;
        fs::write(dest, content)?;
        Ok(())
    }

    fn log_input(&mut self, dataset: &Dataset) -> Result<()> {
        let path = self.engine()?.run_dir.join("inputs.yaml");
        let mut inputs: Vec<DatasetMeta> = storage::load_yaml(&path)?;
        inputs.push(DatasetMeta::from(dataset));
        storage::save_yaml(&path, &inputs)?;
        info!(name = %dataset.name, rows = dataset.table.num_rows(), "recorded input dataset");
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if self.engine.is_some() {
            let status = if std::thread::panicking() {
                RunStatus::Failed
            } else {
                RunStatus::Finished
            };
            if let Err(err) = self.end_run(status) {
                error!("failed to finalize run on drop: {err}");
            }
        }
    }
}

// ─── Background store task ───────────────────────────────────────────────────

async fn background_task(mut receiver: mpsc::UnboundedReceiver<StoreCommand>, run_dir: PathBuf) {
    let metrics_path = run_dir.join("metrics.parquet");
    let params_path = run_dir.join("params.yaml");
    let tags_path = run_dir.join("tags.yaml");

    let mut metric_buffer: Vec<MetricPoint> = Vec::with_capacity(FLUSH_INTERVAL_ROWS * 2);
    let mut flush_ticker = interval(Duration::from_millis(FLUSH_INTERVAL_MS));
    flush_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            // Prioritize incoming commands
            biased;

            cmd = receiver.recv() => {
                match cmd {
                    None => {
                        flush_metrics(&metrics_path, &mut metric_buffer);
                        break;
                    }
                    Some(StoreCommand::Metric(point)) => {
                        metric_buffer.push(point);
                        if metric_buffer.len() >= FLUSH_INTERVAL_ROWS {
                            flush_metrics(&metrics_path, &mut metric_buffer);
                        }
                    }
                    Some(StoreCommand::Param { key, value }) => {
                        merge_yaml_entry(&params_path, key, value);
                    }
                    Some(StoreCommand::Tag { key, value }) => {
                        merge_yaml_entry(&tags_path, key, value);
                    }
                    Some(StoreCommand::Flush(reply)) => {
                        flush_metrics(&metrics_path, &mut metric_buffer);
                        let _ = reply.send(());
                    }
                    Some(StoreCommand::Shutdown { status, reply }) => {
                        flush_metrics(&metrics_path, &mut metric_buffer);
                        finalize_run(&run_dir, status);
                        let _ = reply.send(());
                        break;
                    }
                }
            }

            // Periodic flush
            _ = flush_ticker.tick() => {
                if !metric_buffer.is_empty() {
                    flush_metrics(&metrics_path, &mut metric_buffer);
                }
            }
        }
    }
}

fn flush_metrics(path: &Path, buffer: &mut Vec<MetricPoint>) {
    if buffer.is_empty() {
        return;
    }
    if let Err(e) = storage::append_metrics(path, buffer) {
        error!("failed to flush metrics: {e}");
    }
    buffer.clear();
}

fn merge_yaml_entry(path: &Path, key: String, value: String) {
    let mut existing: HashMap<String, String> = storage::load_yaml(path).unwrap_or_default();
    existing.insert(key, value);
    if let Err(e) = storage::save_yaml(path, &existing) {
        error!("failed to save {}: {e}", path.display());
    }
}

fn finalize_run(run_dir: &Path, status: RunStatus) {
    match storage::load_run_metadata(run_dir) {
        Ok(mut meta) => {
            let finished_at = Utc::now();
            let duration =
                (finished_at - meta.started_at).num_milliseconds() as f64 / 1000.0;
            meta.status = status;
            meta.finished_at = Some(finished_at);
            meta.duration_secs = Some(duration);
            if let Err(e) = storage::save_run_metadata(run_dir, &meta) {
                error!("failed to write final run metadata: {e}");
            }
        }
        Err(e) => error!("failed to load run metadata for finalization: {e}"),
    }
}
