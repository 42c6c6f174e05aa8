//! Application configuration.
//!
//! Layers, later wins: built-in defaults, the config file (YAML or JSON), then
//! `GATEHOUSE__`-prefixed environment variables with `__` between path segments
//! (`GATEHOUSE__GATE__TIMEOUT=5s`).

use std::path::{Path, PathBuf};

use permission_tree::{CompilerLimits, DEFAULT_MAX_DEPTH, DEFAULT_MAX_NODES};
use request_gate::GateConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{ConsoleError, ConsoleResult};

pub const ENV_PREFIX: &str = "GATEHOUSE";
pub const ENV_SEPARATOR: &str = "__";

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub gate: GateConfig,
    pub permissions: PermissionsConfig,
    pub session: SessionConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Endpoint answering the session's permission tree.
    pub menu_path: String,
    /// Optional view manifest; without it every menu leaf binds the not-found view.
    pub views_manifest: Option<PathBuf>,
    pub max_depth: usize,
    pub max_nodes: usize,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            menu_path: "/permission/menu".to_string(),
            views_manifest: None,
            max_depth: DEFAULT_MAX_DEPTH,
            max_nodes: DEFAULT_MAX_NODES,
        }
    }
}

impl PermissionsConfig {
    pub fn limits(&self) -> CompilerLimits {
        CompilerLimits {
            max_depth: self.max_depth,
            max_nodes: self.max_nodes,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Where the CLI keeps the signed-in session between invocations.
    pub state_file: Option<PathBuf>,
}

impl SessionConfig {
    pub fn state_file(&self) -> Option<PathBuf> {
        self.state_file.clone().or_else(|| {
            dirs::data_local_dir().map(|dir| dir.join("gatehouse").join("session.json"))
        })
    }
}

/// `<config_dir>/gatehouse/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gatehouse").join("config.yaml"))
}

impl AppConfig {
    /// Loads the layered configuration. An explicitly named file must exist; the default
    /// location is optional.
    pub fn load(path: Option<&Path>) -> ConsoleResult<Self> {
        let defaults = config::Config::try_from(&AppConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConsoleError::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                builder = builder.add_source(config::File::from(path.to_path_buf()));
            }
            None => {
                if let Some(default_path) = default_config_path() {
                    builder =
                        builder.add_source(config::File::from(default_path).required(false));
                }
            }
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;
        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConsoleResult<()> {
        self.gate.deadlines()?;
        if self.permissions.max_depth == 0 || self.permissions.max_nodes == 0 {
            return Err(ConsoleError::Config(
                "permission limits must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    fn write_config(contents: &str, suffix: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn file_overrides_defaults() {
        let file = write_config(
            "gate:\n  base_url: https://console.example.com/api\n  timeout: 5s\npermissions:\n  max_depth: 8\n",
            ".yaml",
        );
        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.gate.base_url, "https://console.example.com/api");
        assert_eq!(config.gate.timeout, "5s");
        assert_eq!(config.gate.download_timeout, "60s");
        assert_eq!(config.permissions.max_depth, 8);
        assert_eq!(config.permissions.max_nodes, DEFAULT_MAX_NODES);
    }

    #[test]
    #[serial]
    fn environment_wins_over_file() {
        let file = write_config(r#"{"gate": {"timeout": "5s"}}"#, ".json");
        env::set_var("GATEHOUSE__GATE__TIMEOUT", "12s");
        let config = AppConfig::load(Some(file.path()));
        env::remove_var("GATEHOUSE__GATE__TIMEOUT");
        assert_eq!(config.unwrap().gate.timeout, "12s");
    }

    #[test]
    #[serial]
    fn invalid_durations_are_rejected() {
        let file = write_config("gate:\n  timeout: soon\n", ".yaml");
        let err = AppConfig::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    #[serial]
    fn missing_explicit_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/gatehouse.yaml"))).unwrap_err();
        assert!(matches!(err, ConsoleError::Config(_)));
    }
}
