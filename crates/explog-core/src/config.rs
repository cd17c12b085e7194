//! Layered settings resolution and the typed configuration structs.
//!
//! A settings struct resolves each field against an ordered stack of
//! sources: init arguments, the process environment, a dotenv file,
//! file-based secrets, and finally a declared YAML file. The first source
//! that defines a key wins. Keys are matched case-insensitively.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use url::Url;

use crate::error::{ExplogError, Result};

pub const GLOBAL_CONFIG_FILE: &str = "configs/global.yaml";
pub const MLFLOW_CONFIG_FILE: &str = "configs/mlflow_logger.yaml";

/// Named settings sources, in precedence order (earlier overrides later).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Init,
    Env,
    DotEnv,
    FileSecrets,
    Yaml,
}

/// Declares where a settings struct reads its layers from.
#[derive(Debug, Clone)]
pub struct SettingsSpec {
    pub section: &'static str,
    pub yaml_file: Option<PathBuf>,
    pub dotenv_file: Option<PathBuf>,
    pub secrets_dir: Option<PathBuf>,
}

impl SettingsSpec {
    pub fn new(section: &'static str) -> Self {
        Self {
            section,
            yaml_file: None,
            dotenv_file: Some(PathBuf::from(".env")),
            secrets_dir: None,
        }
    }

    pub fn with_yaml(mut self, path: impl Into<PathBuf>) -> Self {
        self.yaml_file = Some(path.into());
        self
    }

    pub fn with_dotenv(mut self, path: impl Into<PathBuf>) -> Self {
        self.dotenv_file = Some(path.into());
        self
    }

    pub fn with_secrets_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.secrets_dir = Some(path.into());
        self
    }
}

/// The materialized source stack for one settings struct.
///
/// The YAML layer is present only when the spec declared a file for it; a
/// declared file that does not exist contributes an empty layer, while a
/// file that fails to parse is a configuration error.
#[derive(Debug)]
pub struct SettingsSources {
    section: &'static str,
    layers: Vec<(SourceKind, HashMap<String, Value>)>,
}

impl SettingsSources {
    pub fn load(spec: &SettingsSpec, init: HashMap<String, Value>) -> Result<Self> {
        let mut layers = Vec::with_capacity(5);
        layers.push((SourceKind::Init, lowercase_keys(init)));
        layers.push((SourceKind::Env, env_layer()));
        layers.push((SourceKind::DotEnv, dotenv_layer(spec.dotenv_file.as_deref())?));
        layers.push((
            SourceKind::FileSecrets,
            secrets_layer(spec.secrets_dir.as_deref())?,
        ));
        if let Some(path) = &spec.yaml_file {
            layers.push((SourceKind::Yaml, yaml_layer(path)?));
        }
        Ok(Self {
            section: spec.section,
            layers,
        })
    }

    /// First source defining the key wins. A YAML `null` counts as absent.
    fn lookup(&self, key: &str) -> Option<&Value> {
        let key = key.to_ascii_lowercase();
        self.layers
            .iter()
            .find_map(|(_, layer)| layer.get(&key).filter(|value| !value.is_null()))
    }

    pub fn get_string(&self, field: &'static str) -> Result<Option<String>> {
        self.lookup(field)
            .map(|value| self.coerce_string(field, value))
            .transpose()
    }

    pub fn require_string(&self, field: &'static str) -> Result<String> {
        self.get_string(field)?.ok_or(ExplogError::MissingField {
            section: self.section,
            field,
        })
    }

    pub fn get_bool(&self, field: &'static str) -> Result<Option<bool>> {
        self.lookup(field)
            .map(|value| self.coerce_bool(field, value))
            .transpose()
    }

    pub fn require_bool(&self, field: &'static str) -> Result<bool> {
        self.get_bool(field)?.ok_or(ExplogError::MissingField {
            section: self.section,
            field,
        })
    }

    pub fn get_url(&self, field: &'static str) -> Result<Option<Url>> {
        match self.get_string(field)? {
            None => Ok(None),
            Some(raw) => Url::parse(&raw)
                .map(Some)
                .map_err(|_| self.invalid(field, &raw, "a URL")),
        }
    }

    pub fn get_path(&self, field: &'static str) -> Result<Option<PathBuf>> {
        Ok(self.get_string(field)?.map(PathBuf::from))
    }

    pub fn require_path(&self, field: &'static str) -> Result<PathBuf> {
        self.get_path(field)?.ok_or(ExplogError::MissingField {
            section: self.section,
            field,
        })
    }

    fn coerce_string(&self, field: &'static str, value: &Value) -> Result<String> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(self.invalid(field, &display_value(other), "a string")),
        }
    }

    fn coerce_bool(&self, field: &'static str, value: &Value) -> Result<bool> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(self.invalid(field, s, "a boolean")),
            },
            other => Err(self.invalid(field, &display_value(other), "a boolean")),
        }
    }

    fn invalid(&self, field: &'static str, value: &str, expected: &'static str) -> ExplogError {
        ExplogError::InvalidField {
            section: self.section,
            field,
            value: value.to_string(),
            expected,
        }
    }
}

fn display_value(value: &Value) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_else(|_| format!("{value:?}"))
}

fn lowercase_keys(map: HashMap<String, Value>) -> HashMap<String, Value> {
    map.into_iter()
        .map(|(key, value)| (key.to_ascii_lowercase(), value))
        .collect()
}

fn env_layer() -> HashMap<String, Value> {
    std::env::vars()
        .map(|(key, value)| (key.to_ascii_lowercase(), Value::String(value)))
        .collect()
}

fn dotenv_layer(path: Option<&Path>) -> Result<HashMap<String, Value>> {
    let mut layer = HashMap::new();
    let Some(path) = path else {
        return Ok(layer);
    };
    if !path.exists() {
        return Ok(layer);
    }
    let iter = dotenvy::from_path_iter(path).map_err(|e| {
        ExplogError::Config(format!("failed to read dotenv file {}: {e}", path.display()))
    })?;
    for item in iter {
        let (key, value) = item.map_err(|e| {
            ExplogError::Config(format!("malformed dotenv file {}: {e}", path.display()))
        })?;
        layer.insert(key.to_ascii_lowercase(), Value::String(value));
    }
    Ok(layer)
}

/// One value per file, keyed by file name. Used for secrets mounted as files.
fn secrets_layer(dir: Option<&Path>) -> Result<HashMap<String, Value>> {
    let mut layer = HashMap::new();
    let Some(dir) = dir else {
        return Ok(layer);
    };
    if !dir.is_dir() {
        return Ok(layer);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            let value = fs::read_to_string(entry.path())?;
            layer.insert(
                name.to_ascii_lowercase(),
                Value::String(value.trim_end().to_string()),
            );
        }
    }
    Ok(layer)
}

fn yaml_layer(path: &Path) -> Result<HashMap<String, Value>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = fs::read_to_string(path)?;
    let value: Value = serde_yaml::from_str(&content)
        .map_err(|e| ExplogError::Config(format!("invalid YAML in {}: {e}", path.display())))?;
    match value {
        Value::Null => Ok(HashMap::new()),
        Value::Mapping(mapping) => {
            let mut layer = HashMap::new();
            for (key, value) in mapping {
                if let Value::String(key) = key {
                    layer.insert(key.to_ascii_lowercase(), value);
                }
            }
            Ok(layer)
        }
        _ => Err(ExplogError::Config(format!(
            "expected a mapping at the top level of {}",
            path.display()
        ))),
    }
}

/// Application-wide settings, read from `configs/global.yaml`.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub log_level: String,
}

impl GlobalConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    pub fn load_from(base: &Path) -> Result<Self> {
        let spec = SettingsSpec::new("GlobalConfig")
            .with_yaml(base.join(GLOBAL_CONFIG_FILE))
            .with_dotenv(base.join(".env"));
        Self::resolve(&SettingsSources::load(&spec, HashMap::new())?)
    }

    pub fn resolve(sources: &SettingsSources) -> Result<Self> {
        Ok(Self {
            log_level: sources.require_string("log_level")?,
        })
    }
}

/// Settings for the tracking-backend logger, read from
/// `configs/mlflow_logger.yaml`.
///
/// Exactly one of `tracking_uri`/`remote_tracking_uri` is in effect at a
/// time, selected by `remote_flag`.
#[derive(Debug, Clone)]
pub struct MlflowLoggerConfig {
    pub tracking_uri: Option<Url>,
    pub remote_tracking_uri: Option<Url>,
    pub instance: String,
    pub project_name: String,
    pub remote_flag: bool,
    pub trace: bool,
    pub templates_path: PathBuf,
    pub artifact_path: String,
    pub run_name: Option<String>,
}

impl MlflowLoggerConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    pub fn load_from(base: &Path) -> Result<Self> {
        let spec = SettingsSpec::new("MlflowLoggerConfig")
            .with_yaml(base.join(MLFLOW_CONFIG_FILE))
            .with_dotenv(base.join(".env"));
        Self::resolve(&SettingsSources::load(&spec, HashMap::new())?)
    }

    pub fn resolve(sources: &SettingsSources) -> Result<Self> {
        Ok(Self {
            tracking_uri: sources.get_url("tracking_uri")?,
            remote_tracking_uri: sources.get_url("remote_tracking_uri")?,
            instance: sources.require_string("instance")?,
            project_name: sources.require_string("project_name")?,
            remote_flag: sources.require_bool("remote_flag")?,
            trace: sources.require_bool("trace")?,
            templates_path: sources.require_path("templates_path")?,
            artifact_path: sources.require_string("artifact_path")?,
            run_name: sources.get_string("run_name")?,
        })
    }

    /// The tracking endpoint in effect, selected by `remote_flag`.
    pub fn selected_tracking_uri(&self) -> Result<&Url> {
        if self.remote_flag {
            self.remote_tracking_uri
                .as_ref()
                .ok_or(ExplogError::MissingField {
                    section: "MlflowLoggerConfig",
                    field: "remote_tracking_uri",
                })
        } else {
            self.tracking_uri.as_ref().ok_or(ExplogError::MissingField {
                section: "MlflowLoggerConfig",
                field: "tracking_uri",
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn yaml_spec(tmp: &TempDir, content: &str) -> SettingsSpec {
        let path = tmp.path().join("settings.yaml");
        fs::write(&path, content).unwrap();
        SettingsSpec::new("TestConfig")
            .with_yaml(path)
            .with_dotenv(tmp.path().join(".env"))
    }

    #[test]
    fn init_overrides_env_overrides_yaml() {
        let tmp = TempDir::new().unwrap();
        let spec = yaml_spec(&tmp, "ept_layer_key: from-yaml\n");

        std::env::set_var("EPT_LAYER_KEY", "from-env");

        let init = HashMap::from([(
            "ept_layer_key".to_string(),
            Value::String("from-init".to_string()),
        )]);
        let sources = SettingsSources::load(&spec, init).unwrap();
        assert_eq!(
            sources.get_string("ept_layer_key").unwrap().as_deref(),
            Some("from-init")
        );

        let sources = SettingsSources::load(&spec, HashMap::new()).unwrap();
        assert_eq!(
            sources.get_string("ept_layer_key").unwrap().as_deref(),
            Some("from-env")
        );

        std::env::remove_var("EPT_LAYER_KEY");
        let sources = SettingsSources::load(&spec, HashMap::new()).unwrap();
        assert_eq!(
            sources.get_string("ept_layer_key").unwrap().as_deref(),
            Some("from-yaml")
        );
    }

    #[test]
    fn env_matching_is_case_insensitive() {
        let tmp = TempDir::new().unwrap();
        let spec = yaml_spec(&tmp, "");
        std::env::set_var("EPT_CASE_KEY", "shouting");
        let sources = SettingsSources::load(&spec, HashMap::new()).unwrap();
        assert_eq!(
            sources.get_string("ept_case_key").unwrap().as_deref(),
            Some("shouting")
        );
        std::env::remove_var("EPT_CASE_KEY");
    }

    #[test]
    fn dotenv_layer_loses_to_env() {
        let tmp = TempDir::new().unwrap();
        let dotenv = tmp.path().join(".env");
        fs::write(&dotenv, "EPT_DOTENV_KEY=from-dotenv\n").unwrap();
        let spec = yaml_spec(&tmp, "");

        let sources = SettingsSources::load(&spec, HashMap::new()).unwrap();
        assert_eq!(
            sources.get_string("ept_dotenv_key").unwrap().as_deref(),
            Some("from-dotenv")
        );

        std::env::set_var("EPT_DOTENV_KEY", "from-env");
        let sources = SettingsSources::load(&spec, HashMap::new()).unwrap();
        assert_eq!(
            sources.get_string("ept_dotenv_key").unwrap().as_deref(),
            Some("from-env")
        );
        std::env::remove_var("EPT_DOTENV_KEY");
    }

    #[test]
    fn secrets_layer_reads_file_per_key() {
        let tmp = TempDir::new().unwrap();
        let secrets = tmp.path().join("secrets");
        fs::create_dir(&secrets).unwrap();
        fs::write(secrets.join("ept_secret_key"), "hunter2\n").unwrap();
        let spec = yaml_spec(&tmp, "").with_secrets_dir(secrets);
        let sources = SettingsSources::load(&spec, HashMap::new()).unwrap();
        assert_eq!(
            sources.get_string("ept_secret_key").unwrap().as_deref(),
            Some("hunter2")
        );
    }

    #[test]
    fn missing_required_field_names_section_and_field() {
        let tmp = TempDir::new().unwrap();
        let spec = yaml_spec(&tmp, "");
        let sources = SettingsSources::load(&spec, HashMap::new()).unwrap();
        let err = sources.require_string("ept_absent_key").unwrap_err();
        match err {
            ExplogError::MissingField { section, field } => {
                assert_eq!(section, "TestConfig");
                assert_eq!(field, "ept_absent_key");
            }
            other => panic!("expected MissingField, got {other}"),
        }
    }

    #[test]
    fn coercion_failure_names_value_and_expected_type() {
        let tmp = TempDir::new().unwrap();
        let spec = yaml_spec(&tmp, "ept_bool_key: maybe\nept_url_key: 'not a url'\n");
        let sources = SettingsSources::load(&spec, HashMap::new()).unwrap();

        match sources.get_bool("ept_bool_key").unwrap_err() {
            ExplogError::InvalidField {
                value, expected, ..
            } => {
                assert_eq!(value, "maybe");
                assert_eq!(expected, "a boolean");
            }
            other => panic!("expected InvalidField, got {other}"),
        }

        match sources.get_url("ept_url_key").unwrap_err() {
            ExplogError::InvalidField { expected, .. } => assert_eq!(expected, "a URL"),
            other => panic!("expected InvalidField, got {other}"),
        }
    }

    #[test]
    fn bool_coercion_accepts_common_spellings() {
        let tmp = TempDir::new().unwrap();
        let spec = yaml_spec(&tmp, "a: 'true'\nb: '0'\nc: 'YES'\nd: false\n");
        let sources = SettingsSources::load(&spec, HashMap::new()).unwrap();
        assert_eq!(sources.get_bool("a").unwrap(), Some(true));
        assert_eq!(sources.get_bool("b").unwrap(), Some(false));
        assert_eq!(sources.get_bool("c").unwrap(), Some(true));
        assert_eq!(sources.get_bool("d").unwrap(), Some(false));
    }

    #[test]
    fn null_yaml_value_counts_as_absent() {
        let tmp = TempDir::new().unwrap();
        let spec = yaml_spec(&tmp, "ept_null_key: null\n");
        let sources = SettingsSources::load(&spec, HashMap::new()).unwrap();
        assert_eq!(sources.get_string("ept_null_key").unwrap(), None);
    }

    #[test]
    fn missing_yaml_file_is_an_empty_layer() {
        let tmp = TempDir::new().unwrap();
        let spec = SettingsSpec::new("TestConfig")
            .with_yaml(tmp.path().join("nope.yaml"))
            .with_dotenv(tmp.path().join(".env"));
        let sources = SettingsSources::load(&spec, HashMap::new()).unwrap();
        assert_eq!(sources.get_string("anything").unwrap(), None);
    }

    #[test]
    fn malformed_yaml_is_a_configuration_error() {
        let tmp = TempDir::new().unwrap();
        let spec = yaml_spec(&tmp, "not: [valid\n");
        let err = SettingsSources::load(&spec, HashMap::new()).unwrap_err();
        assert!(matches!(err, ExplogError::Config(_)));
    }

    #[test]
    fn unknown_yaml_keys_are_tolerated() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("configs")).unwrap();
        fs::write(
            tmp.path().join(GLOBAL_CONFIG_FILE),
            "log_level: debug\nsome_future_knob: 7\n",
        )
        .unwrap();
        let config = GlobalConfig::load_from(tmp.path()).unwrap();
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn mlflow_config_resolves_from_yaml() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("configs")).unwrap();
        fs::write(
            tmp.path().join(MLFLOW_CONFIG_FILE),
            concat!(
                "tracking_uri: file:///tmp/mlruns\n",
                "instance: assessments\n",
                "project_name: explog\n",
                "remote_flag: false\n",
                "trace: true\n",
                "templates_path: templates\n",
                "artifact_path: data\n",
            ),
        )
        .unwrap();
        let config = MlflowLoggerConfig::load_from(tmp.path()).unwrap();
        assert_eq!(config.instance, "assessments");
        assert!(config.trace);
        assert!(!config.remote_flag);
        assert_eq!(config.run_name, None);
        assert_eq!(
            config.selected_tracking_uri().unwrap().as_str(),
            "file:///tmp/mlruns"
        );
    }

    #[test]
    fn selected_tracking_uri_follows_remote_flag() {
        let local = Url::parse("file:///tmp/local").unwrap();
        let remote = Url::parse("https://tracking.example.com/").unwrap();
        let mut config = MlflowLoggerConfig {
            tracking_uri: Some(local.clone()),
            remote_tracking_uri: Some(remote.clone()),
            instance: "i".into(),
            project_name: "p".into(),
            remote_flag: false,
            trace: false,
            templates_path: PathBuf::from("templates"),
            artifact_path: "data".into(),
            run_name: None,
        };
        assert_eq!(config.selected_tracking_uri().unwrap(), &local);

        config.remote_flag = true;
        assert_eq!(config.selected_tracking_uri().unwrap(), &remote);

        config.remote_tracking_uri = None;
        let err = config.selected_tracking_uri().unwrap_err();
        assert!(matches!(
            err,
            ExplogError::MissingField {
                field: "remote_tracking_uri",
                ..
            }
        ));
    }
}
