//! Entry point wiring the logger, its metadata hooks and, when a broker is
//! configured, the delivery pipeline.

use crate::bridge::LoggerLayer;
use crate::config::{Config, ConfigError};
use crate::format::{FIELD_KEY_LEVEL, FIELD_KEY_MSG};
use crate::hooks::{CallerHook, RequestIdHook, TraceIdHook};
use crate::level::{Level, hook_levels};
use crate::logger::{Logger, ReloadError};
use crate::pipeline::{FIELD_KEY_EVENT_TYPE, Identity, Pipeline, PipelineError};
use crate::producer::Transport;
use crate::record::Fields;
use crate::writer::{MultiWriter, RotatingFile, WriterError};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub const FIELD_KEY_NEED_FILTER: &str = "need_filter";

#[derive(Error, Debug)]
pub enum ClogError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("log file error: {0}")]
    Writer(#[from] WriterError),
    #[error("delivery pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Handle returned by initialization. Clone it into whatever needs to log;
/// call [`Clog::shutdown`] once, last, before the process exits.
#[derive(Clone, Debug)]
pub struct Clog {
    logger: Logger,
    pipeline: Pipeline,
}

impl Clog {
    /// Opens the log file, installs the metadata hooks and connects the
    /// delivery pipeline when `broker_addrs` is set. An unreachable broker
    /// is an error.
    pub async fn init(config: Config) -> Result<Self, ClogError> {
        let (logger, level) = build_logger(&config)?;

        let pipeline = match config.broker_addrs.as_deref() {
            Some(addrs) if config.broker_configured() => {
                let connected = Pipeline::connect(
                    addrs,
                    config.transport_config(),
                    config.pipeline_settings(hook_levels(level)),
                    Identity::resolve(),
                    logger.formatter(),
                )
                .await;
                match connected {
                    Ok(pipeline) => pipeline,
                    Err(e) => {
                        logger.error(format!("broker pipeline init failed: {e}, addr: {addrs}"));
                        return Err(e.into());
                    }
                }
            }
            _ => Pipeline::disabled(),
        };

        Ok(Self::assemble(logger, pipeline))
    }

    /// Like [`Clog::init`] but delivers through `transport` instead of
    /// connecting to `broker_addrs`. Must be called within a tokio runtime.
    pub fn init_with_transport<T: Transport>(
        config: Config,
        transport: T,
        identity: Identity,
    ) -> Result<Self, ClogError> {
        let (logger, level) = build_logger(&config)?;
        let pipeline = Pipeline::with_transport(
            transport,
            config.pipeline_settings(hook_levels(level)),
            identity,
            logger.formatter(),
        )?;

        Ok(Self::assemble(logger, pipeline))
    }

    fn assemble(logger: Logger, pipeline: Pipeline) -> Self {
        if pipeline.is_enabled() {
            logger.add_hook(Arc::new(pipeline.clone()));
        }
        logger.info(format!("clog v{}", crate::VERSION));

        Self { logger, pipeline }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Ships a business event. See [`Pipeline::submit_event`]; with no
    /// broker configured this does nothing.
    pub fn log_event(&self, fields: Fields, need_filter: bool) -> Result<(), ClogError> {
        self.pipeline.submit_event(fields, need_filter)?;
        Ok(())
    }

    /// Routes one decoded JSON object: objects carrying `event_type` become
    /// events (honouring an optional boolean `need_filter`), anything else a
    /// log line at its `level`, info when absent or unknown.
    #[track_caller]
    pub fn ingest(&self, mut fields: Fields) -> Result<(), ClogError> {
        if fields.contains_key(FIELD_KEY_EVENT_TYPE) {
            let need_filter = fields
                .remove(FIELD_KEY_NEED_FILTER)
                .and_then(|value| value.as_bool())
                .unwrap_or(false);
            return self.log_event(fields, need_filter);
        }

        let level = fields
            .remove(FIELD_KEY_LEVEL)
            .and_then(|value| value.as_str().and_then(|raw| raw.parse::<Level>().ok()))
            .unwrap_or(Level::Info);
        let message = match fields.remove(FIELD_KEY_MSG) {
            Some(Value::String(message)) => message,
            Some(other) => other.to_string(),
            None => String::new(),
        };

        self.logger.with_fields(fields).log(level, message);
        Ok(())
    }

    /// Level hot-reload callback. The previous level stays in effect when
    /// `value` is not a valid level string.
    pub fn reload_level(&self, value: &Value) -> Result<Level, ReloadError> {
        let level = self.logger.reload_level(value)?;
        tracing::info!(%level, "log level reloaded");
        Ok(level)
    }

    /// A `tracing` layer that routes events through this logger.
    pub fn layer(&self) -> LoggerLayer {
        LoggerLayer::new(self.logger.clone())
    }

    /// Flushes and closes the delivery pipeline.
    pub async fn shutdown(&self) {
        self.pipeline.shutdown().await;
    }
}

fn build_logger(config: &Config) -> Result<(Logger, Level), ClogError> {
    config.validate()?;

    if !config.path.exists()
        && let Some(dir) = config.path.parent()
        && !dir.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("mkdir {} error: {e}", dir.display());
    }

    let file = RotatingFile::new(&config.path, config.max_age())?;

    let level = config.level.parse::<Level>().unwrap_or_else(|e| {
        eprintln!("Parse log level error, {e}, falling back to debug");
        Level::Debug
    });

    let mut out = MultiWriter::new();
    if config.stdout {
        out = out.with(std::io::stdout());
    }
    out = out.with(file);

    let logger = Logger::new(out, config.format.formatter(), level);
    logger.add_hook(Arc::new(CallerHook::new()));
    logger.add_hook(Arc::new(RequestIdHook::new()));
    logger.add_hook(Arc::new(TraceIdHook::new()));

    Ok((logger, level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        Config {
            path: dir.path().join("nested/app.log"),
            stdout: false,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_init_without_broker() {
        let dir = TempDir::new().unwrap();
        let clog = Clog::init(config_in(&dir)).await.unwrap();

        assert!(!clog.pipeline().is_enabled());
        assert_eq!(clog.logger().hook_count(), 3);
        assert_eq!(clog.logger().level(), Level::Debug);
        assert!(dir.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn test_unknown_level_falls_back_to_debug() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            level: "loud".to_string(),
            ..config_in(&dir)
        };
        let clog = Clog::init(config).await.unwrap();
        assert_eq!(clog.logger().level(), Level::Debug);
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_init() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            broker_addrs: Some("127.0.0.1:1".to_string()),
            broker_timeout_ms: 500,
            ..config_in(&dir)
        };
        assert!(matches!(
            Clog::init(config).await,
            Err(ClogError::Pipeline(PipelineError::Connect(_)))
        ));
    }

    #[tokio::test]
    async fn test_reload_keeps_level_on_bad_input() {
        let dir = TempDir::new().unwrap();
        let clog = Clog::init(config_in(&dir)).await.unwrap();

        assert_eq!(
            clog.reload_level(&Value::String("error".into())).unwrap(),
            Level::Error
        );
        assert!(clog.reload_level(&Value::Bool(true)).is_err());
        assert!(clog.reload_level(&Value::String("nope".into())).is_err());
        assert_eq!(clog.logger().level(), Level::Error);
    }
}
