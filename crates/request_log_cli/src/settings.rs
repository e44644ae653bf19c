use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use request_log::{IngestConfig, IngestLimits, ScheduleSettings};
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;
const DEFAULT_CONFIG_POLL_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// The process configuration file.
///
/// ```toml
/// log_file = "logs/request_logs.log"
/// database = "request_logs.sqlite3"
/// run_timeout_secs = 300
///
/// [schedule]
/// enabled = true
/// cadence_kind = "minutes"
/// interval = 5
/// ```
///
/// Relative paths are resolved against the directory holding the config file.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub log_file: PathBuf,
    pub database: PathBuf,
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    #[serde(default = "default_config_poll_secs")]
    pub config_poll_secs: u64,
    #[serde(default)]
    pub schedule: ScheduleSettings,
}

fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}

fn default_config_poll_secs() -> u64 {
    DEFAULT_CONFIG_POLL_SECS
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: AppConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        if let Some(base) = path.parent() {
            config.log_file = base.join(&config.log_file);
            config.database = base.join(&config.database);
        }
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_line_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_line_bytes",
                reason: "must be positive".to_string(),
            });
        }
        if self.config_poll_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "config_poll_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.run_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid {
                field: "run_timeout_secs",
                reason: "must be positive when set".to_string(),
            });
        }
        Ok(())
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            limits: IngestLimits {
                max_line_bytes: self.max_line_bytes,
                ..IngestLimits::default()
            },
            ..IngestConfig::default()
        }
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config_poll_secs)
    }
}

/// Names of the settings that differ between `old` and `new`, schedule settings first.
pub fn changed_settings(old: &AppConfig, new: &AppConfig) -> Vec<&'static str> {
    let (a, b) = (&old.schedule, &new.schedule);
    let checks = [
        ("enabled", a.enabled != b.enabled),
        ("cadence_kind", a.cadence_kind != b.cadence_kind),
        ("interval", a.interval != b.interval),
        ("time_of_day", a.time_of_day != b.time_of_day),
        ("timezone", a.timezone != b.timezone),
        ("weekday", a.weekday != b.weekday),
        ("log_file", old.log_file != new.log_file),
        ("database", old.database != new.database),
        ("run_timeout_secs", old.run_timeout_secs != new.run_timeout_secs),
        ("max_line_bytes", old.max_line_bytes != new.max_line_bytes),
        ("config_poll_secs", old.config_poll_secs != new.config_poll_secs),
    ];
    checks
        .into_iter()
        .filter_map(|(name, changed)| changed.then_some(name))
        .collect()
}
