//! Construction and ownership of the process configuration.
//!
//! `ConfigProvider` owns exactly one `GlobalConfig` and one
//! `MlflowLoggerConfig`. The intended pattern is explicit: build it once at
//! process start and pass references to whatever needs settings. For hosts
//! that want the classic process-wide instance, `shared()` caches a single
//! provider behind a `OnceLock`; construction failures are returned to the
//! caller and never cached, so a later call re-attempts.

use std::path::Path;
use std::sync::{Mutex, OnceLock};

use crate::config::{GlobalConfig, MlflowLoggerConfig};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ConfigProvider {
    global: GlobalConfig,
    mlflow: MlflowLoggerConfig,
}

impl ConfigProvider {
    /// Resolve both settings structs against their declared YAML files,
    /// relative to the current working directory.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Like [`ConfigProvider::load`], with config paths rooted at `base`.
    pub fn load_from(base: &Path) -> Result<Self> {
        Ok(Self {
            global: GlobalConfig::load_from(base)?,
            mlflow: MlflowLoggerConfig::load_from(base)?,
        })
    }

    pub fn global_config(&self) -> &GlobalConfig {
        &self.global
    }

    pub fn mlflow_config(&self) -> &MlflowLoggerConfig {
        &self.mlflow
    }

    /// The process-wide provider, constructed on first access.
    ///
    /// Initialization is double-checked: a mutex serializes construction so
    /// at most one thread runs it, while readers after initialization go
    /// through the lock-free `OnceLock` fast path.
    pub fn shared() -> Result<&'static Self> {
        static CELL: OnceLock<ConfigProvider> = OnceLock::new();
        Self::shared_in(&CELL, Path::new("."))
    }

    fn shared_in(cell: &'static OnceLock<Self>, base: &Path) -> Result<&'static Self> {
        if let Some(provider) = cell.get() {
            return Ok(provider);
        }
        static INIT: Mutex<()> = Mutex::new(());
        let _guard = INIT.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(provider) = cell.get() {
            return Ok(provider);
        }
        let provider = Self::load_from(base)?;
        Ok(cell.get_or_init(|| provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_configs(dir: &Path) {
        fs::create_dir_all(dir.join("configs")).unwrap();
        fs::write(dir.join(crate::config::GLOBAL_CONFIG_FILE), "log_level: info\n").unwrap();
        fs::write(
            dir.join(crate::config::MLFLOW_CONFIG_FILE),
            concat!(
                "tracking_uri: file:///tmp/mlruns\n",
                "instance: provider-test\n",
                "project_name: explog\n",
                "remote_flag: false\n",
                "trace: false\n",
                "templates_path: templates\n",
                "artifact_path: data\n",
            ),
        )
        .unwrap();
    }

    #[test]
    fn shared_returns_the_identical_instance() {
        static CELL: OnceLock<ConfigProvider> = OnceLock::new();
        let tmp = TempDir::new().unwrap();
        write_configs(tmp.path());

        let first = ConfigProvider::shared_in(&CELL, tmp.path()).unwrap();
        let second = ConfigProvider::shared_in(&CELL, tmp.path()).unwrap();
        assert!(std::ptr::eq(first, second));
        assert_eq!(first.mlflow_config().instance, "provider-test");
    }

    #[test]
    fn construction_failure_is_not_cached() {
        static CELL: OnceLock<ConfigProvider> = OnceLock::new();
        let tmp = TempDir::new().unwrap();

        // No config files yet: the required fields cannot resolve.
        assert!(ConfigProvider::shared_in(&CELL, tmp.path()).is_err());

        write_configs(tmp.path());
        let provider = ConfigProvider::shared_in(&CELL, tmp.path()).unwrap();
        assert_eq!(provider.global_config().log_level, "info");
    }
}
