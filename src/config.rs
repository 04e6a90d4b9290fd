//! Configuration loading
//!
//! Configuration is read from `$XDG_CONFIG_HOME/kubesight/config.toml`
//! (`~/.config/kubesight/config.toml`). A missing file means defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use kubesight_analysis::AnalysisConfig;
use kubesight_logs::Redactor;
use kubesight_server::ServerConfig;
use kubesight_types::TriggerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid redaction pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub trigger: TriggerConfig,
    pub analysis: AnalysisConfig,
    pub redaction: RedactionConfig,
    pub kube: KubeConfig,
    pub logging: LoggingConfig,
}

/// `[stream]` section
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StreamConfig {
    /// Backlog lines fetched when the viewer gives no lookback
    pub tail_lines: i64,
    pub demo_min_delay_ms: u64,
    pub demo_max_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            tail_lines: 200,
            demo_min_delay_ms: 150,
            demo_max_delay_ms: 900,
        }
    }
}

impl StreamConfig {
    pub fn demo_delays(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.demo_min_delay_ms),
            Duration::from_millis(self.demo_max_delay_ms),
        )
    }
}

/// `[redaction]` section
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RedactionConfig {
    /// Extra regexes whose matches are redacted after the built-in rules
    pub patterns: Vec<String>,
}

/// `[kube]` section
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct KubeConfig {
    pub enabled: bool,
    /// Kubeconfig context (defaults to the current one)
    pub context: Option<String>,
    /// Cluster label reported with analysis requests
    pub cluster: Option<String>,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            context: None,
            cluster: None,
        }
    }
}

/// `[logging]` section
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let path = Self::config_path();
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/kubesight/config.toml`
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kubesight")
            .join("config.toml")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.tail_lines < 0 {
            return Err(ConfigError::Invalid(
                "stream.tail_lines must not be negative".to_string(),
            ));
        }
        if self.stream.demo_min_delay_ms > self.stream.demo_max_delay_ms {
            return Err(ConfigError::Invalid(
                "stream.demo_min_delay_ms must not exceed stream.demo_max_delay_ms".to_string(),
            ));
        }
        if self.trigger.line_threshold == 0 || self.trigger.tail_window == 0 {
            return Err(ConfigError::Invalid(
                "trigger.line_threshold and trigger.tail_window must be positive".to_string(),
            ));
        }
        self.redactor()?;
        Ok(())
    }

    /// Built-in redaction plus the configured patterns
    pub fn redactor(&self) -> Result<Redactor, ConfigError> {
        self.redaction
            .patterns
            .iter()
            .try_fold(Redactor::new(), |redactor, pattern| {
                redactor
                    .with_pattern(pattern)
                    .map_err(|source| ConfigError::Pattern {
                        pattern: pattern.clone(),
                        source,
                    })
            })
    }

    /// Cluster label for analysis metadata, defaulting to the context name
    pub fn cluster_label(&self, context: Option<&str>) -> Option<String> {
        self.kube
            .cluster
            .clone()
            .or_else(|| context.map(str::to_string))
    }
}
