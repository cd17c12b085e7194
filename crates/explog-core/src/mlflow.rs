//! The experiment logger: run lifecycle, metadata tagging and the data
//! dispatch rules for dicts, files and input datasets.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::MlflowLoggerConfig;
use crate::error::{ExplogError, Result};
use crate::meta;
use crate::models::{Dataset, RunStatus};
use crate::table;
use crate::tracking::{backend_for_uri, TrackingBackend};

/// Extensions treated as template files by `log_experiment_data`.
const TEMPLATE_EXTENSIONS: &[&str] = &["jinja2", "j2"];

/// What an experiment logger can do. One backend-specific implementation
/// ships here; others plug in behind the same interface.
pub trait ExperimentLogger {
    /// Begin the run: select the experiment, start a backend run, tag it.
    fn start(&mut self) -> Result<()>;

    /// Finalize the active run. Called exactly once per run, on every exit
    /// path.
    fn close(&mut self) -> Result<()>;

    /// Log a mapping: numeric values become metrics, strings become
    /// params, anything else is serialized and logged as a param.
    fn log_dict(&mut self, data: &HashMap<String, Value>) -> Result<()>;

    /// Log a batch of experiment data files as artifacts and, where
    /// applicable, tables.
    fn log_experiment_data(&mut self, data_paths: &[PathBuf]) -> Result<()>;

    /// Record a tabular file as the run's input dataset.
    fn log_input(&mut self, input_path: &Path) -> Result<()>;
}

/// Run `body` inside a started run, closing it on every exit path.
///
/// If the body fails, the run is still closed and the body's error
/// propagates; a close error never masks it.
pub fn with_run<L, T, F>(logger: &mut L, body: F) -> Result<T>
where
    L: ExperimentLogger,
    F: FnOnce(&mut L) -> Result<T>,
{
    logger.start()?;
    let outcome = body(logger);
    let closed = logger.close();
    match outcome {
        Ok(value) => {
            closed?;
            Ok(value)
        }
        Err(err) => Err(err),
    }
}

pub struct MlflowLogger {
    config: MlflowLoggerConfig,
    backend: Box<dyn TrackingBackend>,
    run_name: Option<String>,
}

impl MlflowLogger {
    /// Build a logger against the configured tracking endpoint.
    ///
    /// Resolves the URI by `remote_flag` (failing if the selected one is
    /// absent), constructs the backend for it, and enables asynchronous
    /// submission. A set `trace` flag turns on `openai` auto-instrumentation.
    pub fn new(config: MlflowLoggerConfig) -> Result<Self> {
        // Existing environment variables win over the dotenv file.
        let _ = dotenvy::dotenv();

        let uri = config.selected_tracking_uri()?.clone();
        if config.remote_flag {
            info!(%uri, "using remote tracking URI");
        } else {
            info!(%uri, "using local tracking URI");
        }
        let backend = backend_for_uri(&uri)?;
        Self::with_backend(config, backend)
    }

    /// Like [`MlflowLogger::new`], with a caller-supplied backend.
    pub fn with_backend(
        config: MlflowLoggerConfig,
        mut backend: Box<dyn TrackingBackend>,
    ) -> Result<Self> {
        backend.enable_async_logging(true)?;
        if config.trace {
            backend.enable_autolog("openai")?;
            info!("openai autologging enabled");
        }
        info!("experiment tracking enabled with async submission");
        Ok(Self {
            run_name: config.run_name.clone(),
            config,
            backend,
        })
    }

    pub fn config(&self) -> &MlflowLoggerConfig {
        &self.config
    }

    fn require_active(&self) -> Result<()> {
        if self.backend.active_run().is_some() {
            Ok(())
        } else {
            Err(ExplogError::RunNotActive)
        }
    }

    fn generate_run_name() -> String {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(6).collect();
        format!("run_{timestamp}_{suffix}")
    }

    fn log_run_tags(&mut self) -> Result<()> {
        let project_name = self.config.project_name.clone();
        self.backend.set_tag("project_name", &project_name)?;
        if let Some(version) = meta::project_version() {
            self.backend.set_tag("project_version", &version)?;
        }
        if let Some(commit) = meta::git_commit() {
            self.backend.set_tag("git_commit", &commit)?;
        }
        if let Some(branch) = meta::git_branch() {
            self.backend.set_tag("git_branch", &branch)?;
        }
        let host = meta::host_name().unwrap_or_else(|| "unknown".to_string());
        self.backend.set_tag("run_host", &host)?;
        self.backend
            .set_tag("run_datetime", &Utc::now().to_rfc3339())?;
        Ok(())
    }

    /// Artifact directory for a data file: the configured artifact root
    /// plus the file's parent directory name.
    fn artifact_dir_for(&self, path: &Path) -> PathBuf {
        let parent = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        Path::new(&self.config.artifact_path).join(parent)
    }

    /// Stage a template file as plain text and log it as a file artifact.
    /// The content is copied verbatim; the staging file is removed after
    /// the log call.
    fn log_template(&mut self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "logging template");
        let staging = tempfile::tempdir()?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("template");
        let dest = staging.path().join(format!("{file_name}.txt"));
        let content = fs::read_to_string(path)?;
        fs::write(&dest, content)?;
        let artifact_dir = self.artifact_dir_for(path);
        self.backend.log_artifact(&dest, &artifact_dir)
    }
}

impl ExperimentLogger for MlflowLogger {
    fn start(&mut self) -> Result<()> {
        if self.backend.active_run().is_some() {
            return Err(ExplogError::Other(
                "an experiment run is already active on this logger".into(),
            ));
        }
        let run_name = self
            .run_name
            .get_or_insert_with(Self::generate_run_name)
            .clone();
        let experiment = self.config.instance.clone();
        self.backend.set_experiment(&experiment)?;
        let run = self.backend.start_run(&run_name)?;
        info!(run = %run_name, "started experiment run");
        info!(run_id = %run.run_id, "active run ID");
        self.log_run_tags()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(run) = self.backend.active_run() {
            info!(run_id = %run.run_id, "results submitted for run");
        }
        self.backend.end_run(RunStatus::Finished)
    }

    fn log_dict(&mut self, data: &HashMap<String, Value>) -> Result<()> {
        self.require_active()?;
        for (key, value) in data {
            match value {
                Value::Number(n) => {
                    self.backend.log_metric(key, n.as_f64().unwrap_or(f64::NAN))?;
                }
                Value::String(s) => {
                    self.backend.log_param(key, s)?;
                }
                other => {
                    self.backend.log_param(key, &other.to_string())?;
                }
            }
        }
        Ok(())
    }

    fn log_experiment_data(&mut self, data_paths: &[PathBuf]) -> Result<()> {
        self.require_active()?;
        for data_path in data_paths {
            if !data_path.exists() {
                warn!(path = %data_path.display(), "data path does not exist, skipping");
                continue;
            }

            let ext = data_path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .unwrap_or_default();

            // Table viewers cannot render csv, so only json gets parsed.
            if ext == "json" {
                match table::read_json_records(data_path) {
                    Ok(parsed) => {
                        let file_name = data_path
                            .file_name()
                            .and_then(|n| n.to_str())
                            .unwrap_or("table.json");
                        let parent = data_path
                            .parent()
                            .and_then(|p| p.file_name())
                            .map(|n| n.to_os_string())
                            .unwrap_or_default();
                        self.backend
                            .log_table(&parsed, &Path::new(&parent).join(file_name))?;
                        if parsed.num_rows() == 1 {
                            if let Some(row) = parsed.row(0) {
                                self.log_dict(row)?;
                            }
                            // A one-record result file also logs its fields,
                            // and ends the whole batch here.
                            return Ok(());
                        }
                    }
                    Err(err) => {
                        error!(path = %data_path.display(), "error reading JSON file: {err}");
                    }
                }
            } else if TEMPLATE_EXTENSIONS.contains(&ext.as_str()) {
                self.log_template(data_path)?;
                continue;
            }

            let artifact_dir = self.artifact_dir_for(data_path);
            self.backend.log_artifact(data_path, &artifact_dir)?;
            info!(path = %data_path.display(), "logged artifact");
        }
        Ok(())
    }

    fn log_input(&mut self, input_path: &Path) -> Result<()> {
        self.require_active()?;
        if !input_path.exists() {
            return Err(ExplogError::InputNotFound(input_path.to_path_buf()));
        }
        info!(path = %input_path.display(), "loading input data");
        let parsed = table::read_table(input_path)?;
        let dataset = Dataset::from_table(parsed, input_path);
        self.backend.log_input(&dataset)
    }
}

impl Drop for MlflowLogger {
    fn drop(&mut self) {
        if self.backend.active_run().is_some() {
            let status = if std::thread::panicking() {
                RunStatus::Failed
            } else {
                RunStatus::Finished
            };
            if let Err(err) = self.backend.end_run(status) {
                error!("failed to finalize run on drop: {err}");
            }
        }
    }
}
