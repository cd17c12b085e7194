//! The tracking-backend capability seam.
//!
//! `TrackingBackend` is the surface this crate consumes from a tracking
//! service: experiment selection, run start/end, and the metric, param,
//! tag, artifact, table and input-dataset submissions. The built-in
//! implementation is the local [`FileStore`](crate::store::FileStore);
//! anything else (a remote SDK, a test double) plugs in through
//! [`MlflowLogger::with_backend`](crate::mlflow::MlflowLogger::with_backend).

use std::path::Path;

use url::Url;

use crate::error::{ExplogError, Result};
use crate::models::{Dataset, RunInfo, RunStatus};
use crate::store::FileStore;
use crate::table::Table;

pub trait TrackingBackend: Send {
    fn set_experiment(&mut self, name: &str) -> Result<()>;

    fn start_run(&mut self, run_name: &str) -> Result<RunInfo>;

    fn end_run(&mut self, status: RunStatus) -> Result<()>;

    fn active_run(&self) -> Option<&RunInfo>;

    /// When enabled, metric/param/tag submission is fire-and-forget; the
    /// backend is responsible for eventual delivery and for flushing when
    /// the run ends.
    fn enable_async_logging(&mut self, enabled: bool) -> Result<()>;

    /// Turn on automatic instrumentation of a named external integration.
    fn enable_autolog(&mut self, integration: &str) -> Result<()>;

    fn log_metric(&mut self, key: &str, value: f64) -> Result<()>;

    fn log_param(&mut self, key: &str, value: &str) -> Result<()>;

    fn set_tag(&mut self, key: &str, value: &str) -> Result<()>;

    /// Store a copy of `local_path` under the run's `artifact_dir`.
    fn log_artifact(&mut self, local_path: &Path, artifact_dir: &Path) -> Result<()>;

    /// Store a table artifact at the run-relative `artifact_file`.
    fn log_table(&mut self, table: &Table, artifact_file: &Path) -> Result<()>;

    /// Record a dataset as the run's input.
    fn log_input(&mut self, dataset: &Dataset) -> Result<()>;
}

/// Construct the backend for a tracking URI.
///
/// `file://` URIs resolve to the built-in file store. No network client
/// ships with this crate, so any other scheme is rejected here; callers
/// with a remote SDK inject it as a custom [`TrackingBackend`].
pub fn backend_for_uri(uri: &Url) -> Result<Box<dyn TrackingBackend>> {
    match uri.scheme() {
        "file" => {
            let root = uri.to_file_path().map_err(|()| {
                ExplogError::Config(format!("tracking URI {uri} is not a usable local path"))
            })?;
            Ok(Box::new(FileStore::new(root)))
        }
        scheme => Err(ExplogError::Config(format!(
            "no built-in tracking client for scheme `{scheme}` ({uri}); \
             provide a custom backend instead"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_uri_resolves_to_the_file_store() {
        let uri = Url::parse("file:///tmp/explog-mlruns").unwrap();
        assert!(backend_for_uri(&uri).is_ok());
    }

    #[test]
    fn non_file_scheme_is_a_configuration_error() {
        let uri = Url::parse("https://tracking.example.com:5000/").unwrap();
        let err = match backend_for_uri(&uri) {
            Ok(_) => panic!("expected a configuration error"),
            Err(err) => err,
        };
        match err {
            ExplogError::Config(message) => assert!(message.contains("https")),
            other => panic!("expected Config, got {other}"),
        }
    }
}
