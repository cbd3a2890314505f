use crate::format::LogFormat;
use crate::level::Level;
use crate::pipeline::{
    EVENT_QUEUE_CAPACITY, EVENT_SAMPLE_ONE_IN, LOG_QUEUE_CAPACITY, PipelineSettings,
};
use crate::producer::{DEFAULT_INPUT_BUFFER, RestProxyConfig};
use crate::producer::http::parse_broker_addrs;
use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid broker address: {0}")]
    InvalidBroker(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about = "Structured logging with broker delivery", long_about = None)]
#[serde(default)]
pub struct Config {
    /// Log file path; the dated file is written next to it and the path
    /// itself becomes a link to the current file
    #[arg(long, env = "CLOG_PATH", default_value = "logs/app.log")]
    pub path: PathBuf,

    /// Minimum log level (unknown values fall back to debug)
    #[arg(long, env = "CLOG_LEVEL", default_value = "debug")]
    pub level: String,

    /// Output format for both the file and shipped log lines
    #[arg(long, env = "CLOG_FORMAT", value_enum, default_value = "json")]
    pub format: LogFormat,

    /// Echo log lines to stdout
    #[arg(long, env = "CLOG_STDOUT", action = ArgAction::Set, default_value_t = true)]
    pub stdout: bool,

    /// Days a rotated log file is kept
    #[arg(long, env = "CLOG_MAX_AGE_DAYS", default_value = "30")]
    pub max_age_days: u64,

    /// `;`-delimited broker addresses; delivery is disabled when unset
    #[arg(long, env = "CLOG_BROKER_ADDRS")]
    pub broker_addrs: Option<String>,

    #[arg(long, env = "CLOG_EVENT_TOPIC", default_value = "event")]
    pub event_topic: String,

    #[arg(long, env = "CLOG_LOG_TOPIC", default_value = "log")]
    pub log_topic: String,

    #[arg(long, env = "CLOG_EVENT_QUEUE_CAPACITY", default_value = "1024")]
    pub event_queue_capacity: usize,

    #[arg(long, env = "CLOG_LOG_QUEUE_CAPACITY", default_value = "2048")]
    pub log_queue_capacity: usize,

    /// Keep one in N filtered events
    #[arg(long, env = "CLOG_EVENT_SAMPLE_ONE_IN", default_value = "10")]
    pub event_sample_one_in: u32,

    /// Broker request timeout in milliseconds
    #[arg(long, env = "CLOG_BROKER_TIMEOUT_MS", default_value = "5000")]
    pub broker_timeout_ms: u64,

    /// Configuration file path (optional, TOML)
    #[arg(long, env = "CLOG_CONFIG_FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("logs/app.log"),
            level: "debug".to_string(),
            format: LogFormat::Json,
            stdout: true,
            max_age_days: 30,
            broker_addrs: None,
            event_topic: "event".to_string(),
            log_topic: "log".to_string(),
            event_queue_capacity: EVENT_QUEUE_CAPACITY,
            log_queue_capacity: LOG_QUEUE_CAPACITY,
            event_sample_one_in: EVENT_SAMPLE_ONE_IN,
            broker_timeout_ms: 5000,
            config_file: None,
        }
    }
}

impl Config {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::parse_from(args);
        config.validate()?;
        Ok(config)
    }

    /// CLI flags and `CLOG_*` variables; a `--config-file` replaces both.
    pub fn from_args_and_env<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::parse_from(args);
        match &config.config_file {
            Some(path) => Self::from_file(path),
            None => {
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Log path must not be empty".to_string(),
            ));
        }

        if self.max_age_days == 0 {
            return Err(ConfigError::InvalidConfig(
                "Max age must be at least one day".to_string(),
            ));
        }

        if self.event_queue_capacity == 0 || self.log_queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "Queue capacities must be greater than 0".to_string(),
            ));
        }

        if self.event_sample_one_in == 0 {
            return Err(ConfigError::InvalidConfig(
                "Event sampling ratio must be greater than 0".to_string(),
            ));
        }

        if self.broker_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Broker timeout must be greater than 0".to_string(),
            ));
        }

        if let Some(addrs) = &self.broker_addrs {
            parse_broker_addrs(addrs).map_err(|e| ConfigError::InvalidBroker(e.to_string()))?;

            if self.broker_configured()
                && (self.event_topic.trim().is_empty() || self.log_topic.trim().is_empty())
            {
                return Err(ConfigError::InvalidConfig(
                    "Topic names must not be empty when a broker is configured".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Whether at least one non-blank broker address is set.
    pub fn broker_configured(&self) -> bool {
        self.broker_addrs
            .as_deref()
            .is_some_and(|addrs| addrs.split(';').any(|addr| !addr.trim().is_empty()))
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days * 24 * 60 * 60)
    }

    pub fn broker_timeout(&self) -> Duration {
        Duration::from_millis(self.broker_timeout_ms)
    }

    pub fn pipeline_settings(&self, levels: Vec<Level>) -> PipelineSettings {
        PipelineSettings {
            event_topic: self.event_topic.clone(),
            log_topic: self.log_topic.clone(),
            levels,
            event_queue_capacity: self.event_queue_capacity,
            log_queue_capacity: self.log_queue_capacity,
            event_sample_one_in: self.event_sample_one_in,
            producer_buffer: DEFAULT_INPUT_BUFFER,
        }
    }

    pub fn transport_config(&self) -> RestProxyConfig {
        RestProxyConfig {
            timeout: self.broker_timeout(),
            ..RestProxyConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::from_args(["clog"]).unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.stdout);
        assert_eq!(config.event_queue_capacity, 1024);
        assert_eq!(config.log_queue_capacity, 2048);
        assert_eq!(config.event_sample_one_in, 10);
        assert_eq!(config.max_age(), Duration::from_secs(30 * 24 * 3600));
        assert!(!config.broker_configured());
    }

    #[test]
    fn test_cli_overrides() {
        let config = Config::from_args([
            "clog",
            "--path",
            "/tmp/svc.log",
            "--level",
            "warn",
            "--format",
            "text",
            "--stdout",
            "false",
            "--broker-addrs",
            "kafka-1:8082;kafka-2:8082",
        ])
        .unwrap();

        assert_eq!(config.path, PathBuf::from("/tmp/svc.log"));
        assert_eq!(config.format, LogFormat::Text);
        assert!(!config.stdout);
        assert!(config.broker_configured());
    }

    #[test]
    fn test_blank_broker_list_is_not_configured() {
        let config = Config {
            broker_addrs: Some(" ; ".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
        assert!(!config.broker_configured());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let zero_queue = Config {
            log_queue_capacity: 0,
            ..Config::default()
        };
        assert!(matches!(
            zero_queue.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));

        let no_topic = Config {
            broker_addrs: Some("kafka:8082".to_string()),
            event_topic: String::new(),
            ..Config::default()
        };
        assert!(no_topic.validate().is_err());

        let bad_broker = Config {
            broker_addrs: Some("http://[bad".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            bad_broker.validate(),
            Err(ConfigError::InvalidBroker(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
path = "/var/log/svc/app.log"
level = "info"
format = "text"
broker_addrs = "kafka:8082"
log_queue_capacity = 16
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Text);
        assert_eq!(config.log_queue_capacity, 16);
        // unset keys keep their defaults
        assert_eq!(config.event_queue_capacity, 1024);
        assert_eq!(config.event_topic, "event");
    }

    #[test]
    fn test_pipeline_settings_carry_levels() {
        let config = Config::default();
        let settings = config.pipeline_settings(vec![Level::Error, Level::Fatal]);
        assert_eq!(settings.levels, vec![Level::Error, Level::Fatal]);
        assert_eq!(settings.log_topic, "log");
    }
}
