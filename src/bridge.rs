use crate::context::Context;
use crate::level::Level;
use crate::logger::Logger;
use crate::record::{CallSite, Fields, LogRecord};
use serde_json::{Value, json};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context as LayerContext;

/// Targets of the HTTP stack under the broker transport. Their events
/// describe the delivery of records; forwarding them would make every
/// publish produce more records to publish.
pub const TRANSPORT_TARGETS: &[&str] = &[
    "reqwest",
    "hyper",
    "hyper_util",
    "h2",
    "rustls",
    "tokio_rustls",
    "want",
];

/// Feeds `tracing` events into a [`Logger`] so they get the same hooks,
/// formatting and sinks as direct calls.
///
/// Events emitted by this crate or by the transport stack are skipped; they
/// would otherwise loop back into the delivery pipeline that produced them.
pub struct LoggerLayer {
    logger: Logger,
    skipped: Vec<String>,
}

impl LoggerLayer {
    pub fn new(logger: Logger) -> Self {
        let skipped = std::iter::once(env!("CARGO_CRATE_NAME"))
            .chain(TRANSPORT_TARGETS.iter().copied())
            .map(str::to_string)
            .collect();
        Self { logger, skipped }
    }

    /// Also ignores events whose target is `target` or one of its modules.
    pub fn skip_target(mut self, target: impl Into<String>) -> Self {
        self.skipped.push(target.into());
        self
    }

    fn is_skipped(&self, target: &str) -> bool {
        self.skipped.iter().any(|prefix| {
            target
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
        })
    }
}

struct FieldVisitor {
    message: Option<String>,
    fields: Fields,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.fields
                .insert(field.name().to_string(), json!(format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), json!(value));
    }
}

impl<S: Subscriber> Layer<S> for LoggerLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
        let metadata = event.metadata();
        if self.is_skipped(metadata.target()) {
            return;
        }

        let level = Level::from(metadata.level());
        if !self.logger.is_enabled(level) {
            return;
        }

        let mut visitor = FieldVisitor {
            message: None,
            fields: Fields::new(),
        };
        event.record(&mut visitor);

        let caller = match (metadata.file(), metadata.line()) {
            (Some(file), Some(line)) => Some(CallSite::new(file, line)),
            _ => None,
        };

        let record = LogRecord::new(level, visitor.message.unwrap_or_default())
            .with_fields(visitor.fields)
            .with_context(Context::current())
            .with_caller(caller);
        self.logger.dispatch(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::JsonFormatter;
    use crate::hooks::{CallerHook, RequestIdHook};
    use parking_lot::Mutex;
    use std::io::Write;
    use std::sync::Arc;
    use tracing_subscriber::prelude::*;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn parsed(capture: &Capture) -> Vec<Value> {
        String::from_utf8(capture.0.lock().clone())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_tracing_events_reach_logger() {
        let capture = Capture::default();
        let logger = Logger::new(capture.clone(), Arc::new(JsonFormatter), Level::Info);
        logger.add_hook(Arc::new(CallerHook::new()));
        let subscriber = tracing_subscriber::registry().with(LoggerLayer::new(logger));

        let line = tracing::subscriber::with_default(subscriber, || {
            let line = line!() + 1;
            tracing::warn!(target: "app", user = "bob", retries = 3_u64, "payment slow");
            tracing::debug!(target: "app", "filtered out");
            line
        });

        let lines = parsed(&capture);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["msg"], "payment slow");
        assert_eq!(lines[0]["user"], "bob");
        assert_eq!(lines[0]["retries"], 3);
        assert_eq!(lines[0]["file"], format!("src/bridge.rs:{line}"));
    }

    #[test]
    fn test_own_events_are_skipped() {
        let capture = Capture::default();
        let logger = Logger::new(capture.clone(), Arc::new(JsonFormatter), Level::Trace);
        let subscriber = tracing_subscriber::registry().with(LoggerLayer::new(logger));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("from inside the crate");
        });

        assert!(parsed(&capture).is_empty());
    }

    #[test]
    fn test_transport_events_are_skipped() {
        let capture = Capture::default();
        let logger = Logger::new(capture.clone(), Arc::new(JsonFormatter), Level::Trace);
        let layer = LoggerLayer::new(logger).skip_target("noisy_dep");
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!(target: "hyper_util::client::legacy::pool", "reuse idle connection");
            tracing::debug!(target: "reqwest::connect", "starting new connection");
            tracing::trace!(target: "h2", "send frame");
            tracing::info!(target: "noisy_dep::worker", "tick");
            tracing::info!(target: "hyperion", "kept");
        });

        let lines = parsed(&capture);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["msg"], "kept");
    }

    #[tokio::test]
    async fn test_scoped_context_is_attached() {
        let capture = Capture::default();
        let logger = Logger::new(capture.clone(), Arc::new(JsonFormatter), Level::Info);
        logger.add_hook(Arc::new(RequestIdHook::new()));
        let subscriber = tracing_subscriber::registry().with(LoggerLayer::new(logger));
        let _guard = tracing::subscriber::set_default(subscriber);

        Context::new()
            .with_request_id("req-9")
            .scope(async {
                tracing::info!(target: "app", "inside request");
            })
            .await;

        assert_eq!(parsed(&capture)[0]["requestId"], "req-9");
    }
}
