//! Harness configuration model.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `LIMITLAB_*` environment variables. Command-line flags are applied last by
//! the binary.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CLEANUP_TIMEOUT_SECS, DEFAULT_RUN_TIMEOUT_SECS, ENV_PREFIX};
use crate::error::{CommonError, Result};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CommonError::Config {
                message: format!("unknown log format '{other}' (expected text or json)"),
            }),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Root configuration of the harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Runtime endpoint (`unix:///path` or `tcp://host:port`).
    /// `None` uses the local defaults, honouring `DOCKER_HOST`.
    pub docker_host: Option<String>,
    /// Overall deadline of one scenario, in seconds.
    pub run_timeout_secs: u64,
    /// Timeout of the container teardown step, in seconds.
    pub cleanup_timeout_secs: u64,
    /// Default log filter directive.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            run_timeout_secs: DEFAULT_RUN_TIMEOUT_SECS,
            cleanup_timeout_secs: DEFAULT_CLEANUP_TIMEOUT_SECS,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl HarnessConfig {
    /// Loads the configuration from an optional YAML file and the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if an
    /// environment override holds an invalid value.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a YAML configuration file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CommonError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parses a YAML document. An empty document yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not match the schema.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies `LIMITLAB_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric or enum override cannot be parsed.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(host) = var("DOCKER_HOST") {
            self.docker_host = Some(host).filter(|h| !h.trim().is_empty());
        }
        if let Some(raw) = var("RUN_TIMEOUT_SECS") {
            self.run_timeout_secs = parse_secs("RUN_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = var("CLEANUP_TIMEOUT_SECS") {
            self.cleanup_timeout_secs = parse_secs("CLEANUP_TIMEOUT_SECS", &raw)?;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(raw) = var("LOG_FORMAT") {
            self.log_format = raw.parse()?;
        }
        Ok(())
    }

    /// Checks value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error if a timeout is zero or the log level is blank.
    pub fn validate(&self) -> Result<()> {
        if self.run_timeout_secs == 0 {
            return Err(CommonError::Config {
                message: "run_timeout_secs must be greater than zero".into(),
            });
        }
        if self.cleanup_timeout_secs == 0 {
            return Err(CommonError::Config {
                message: "cleanup_timeout_secs must be greater than zero".into(),
            });
        }
        if self.log_level.trim().is_empty() {
            return Err(CommonError::Config {
                message: "log_level must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Overall deadline of one scenario.
    #[must_use]
    pub const fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    /// Timeout of the container teardown step.
    #[must_use]
    pub const fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<u64> {
    raw.trim().parse().map_err(|_| CommonError::Config {
        message: format!("{ENV_PREFIX}{key} must be a whole number of seconds, got '{raw}'"),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_constants() {
        let cfg = HarnessConfig::default();
        assert_eq!(cfg.run_timeout(), Duration::from_secs(600));
        assert_eq!(cfg.cleanup_timeout(), Duration::from_secs(15));
        assert_eq!(cfg.log_format, LogFormat::Text);
        assert!(cfg.docker_host.is_none());
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let cfg = HarnessConfig::from_yaml("cleanup_timeout_secs: 30\nlog_format: json\n").unwrap();
        assert_eq!(cfg.cleanup_timeout_secs, 30);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.run_timeout_secs, 600);
    }

    #[test]
    fn empty_yaml_is_default() {
        assert_eq!(HarnessConfig::from_yaml("  \n").unwrap(), HarnessConfig::default());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = HarnessConfig::from_yaml("run_timeout: 3\n").unwrap_err();
        assert!(matches!(err, CommonError::Yaml { .. }));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg = HarnessConfig::from_yaml("run_timeout_secs: 30\n").unwrap();
        cfg.apply_overrides(env(&[
            ("LIMITLAB_RUN_TIMEOUT_SECS", "45"),
            ("LIMITLAB_DOCKER_HOST", "unix:///run/user/1000/docker.sock"),
            ("LIMITLAB_LOG_FORMAT", "JSON"),
        ]))
        .unwrap();
        assert_eq!(cfg.run_timeout_secs, 45);
        assert_eq!(
            cfg.docker_host.as_deref(),
            Some("unix:///run/user/1000/docker.sock")
        );
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn blank_docker_host_override_clears_value() {
        let mut cfg = HarnessConfig {
            docker_host: Some("tcp://10.0.0.1:2375".into()),
            ..HarnessConfig::default()
        };
        cfg.apply_overrides(env(&[("LIMITLAB_DOCKER_HOST", " ")])).unwrap();
        assert!(cfg.docker_host.is_none());
    }

    #[test]
    fn invalid_timeout_override_is_config_error() {
        let mut cfg = HarnessConfig::default();
        let err = cfg
            .apply_overrides(env(&[("LIMITLAB_CLEANUP_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("LIMITLAB_CLEANUP_TIMEOUT_SECS"));
    }

    #[test]
    fn zero_timeout_fails_validation() {
        let cfg = HarnessConfig {
            cleanup_timeout_secs: 0,
            ..HarnessConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn from_file_reads_yaml() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "docker_host: tcp://127.0.0.1:2375").expect("write");
        let cfg = HarnessConfig::from_file(file.path()).expect("load");
        assert_eq!(cfg.docker_host.as_deref(), Some("tcp://127.0.0.1:2375"));
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = HarnessConfig::from_file(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, CommonError::Io { .. }));
    }
}
