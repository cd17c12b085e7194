//! explog-core: configuration, logging sink and experiment tracking for
//! explog.
//!
//! The pieces, in dependency order: layered settings resolution
//! ([`config`]), the process config owner ([`provider`]), the stdout log
//! sink ([`logging`]), and the experiment logger ([`mlflow`]) which issues
//! metric/param/tag/artifact calls against a pluggable
//! [`TrackingBackend`](tracking::TrackingBackend). The built-in backend
//! ([`store`]) writes a local run tree and submits scalars through a
//! background task, so logging calls return before any I/O completes.

pub mod config;
pub mod error;
pub mod logging;
pub mod meta;
pub mod mlflow;
pub mod models;
pub mod provider;
pub mod storage;
pub mod store;
pub mod table;
pub mod tracking;

pub use config::{GlobalConfig, MlflowLoggerConfig, SettingsSources, SettingsSpec};
pub use error::{ExplogError, Result};
pub use logging::init_logging;
pub use mlflow::{with_run, ExperimentLogger, MlflowLogger};
pub use models::{Dataset, DatasetMeta, MetricPoint, RunInfo, RunStatus};
pub use provider::ConfigProvider;
pub use store::FileStore;
pub use table::{read_table, Table};
pub use tracking::{backend_for_uri, TrackingBackend};
