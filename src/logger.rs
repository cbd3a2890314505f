//! Multi-level structured logger with pluggable hooks.
//!
//! A [`Logger`] is a cheap-clone handle. Records below the current minimum
//! level are discarded before any hook runs; the minimum level can be swapped
//! at runtime with [`Logger::set_level`] or [`Logger::reload_level`].

use crate::context::Context;
use crate::format::Formatter;
use crate::hooks::Hook;
use crate::level::{Level, LevelParseError};
use crate::record::{CallSite, Fields, LogRecord};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fmt;
use std::io::Write;
use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("reloaded log level is not a string: {value}")]
    NotAString { value: Value },
    #[error("parse log level failed: {0}")]
    InvalidLevel(#[from] LevelParseError),
}

struct LoggerInner {
    level: AtomicU8,
    hooks: RwLock<Vec<Arc<dyn Hook>>>,
    formatter: Arc<dyn Formatter>,
    out: Mutex<Box<dyn Write + Send>>,
}

#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    pub fn new(
        out: impl Write + Send + 'static,
        formatter: Arc<dyn Formatter>,
        level: Level,
    ) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                level: AtomicU8::new(level as u8),
                hooks: RwLock::new(Vec::new()),
                formatter,
                out: Mutex::new(Box::new(out)),
            }),
        }
    }

    pub fn level(&self) -> Level {
        Level::from_u8(self.inner.level.load(Ordering::Acquire))
    }

    pub fn set_level(&self, level: Level) {
        self.inner.level.store(level as u8, Ordering::Release);
    }

    pub fn is_enabled(&self, level: Level) -> bool {
        self.level().enables(level)
    }

    /// Applies a level pushed by a configuration reload. Anything other than
    /// a string naming a level is rejected and the current level is kept.
    pub fn reload_level(&self, value: &Value) -> Result<Level, ReloadError> {
        let Value::String(raw) = value else {
            return Err(ReloadError::NotAString {
                value: value.clone(),
            });
        };
        let level = raw.parse::<Level>()?;
        self.set_level(level);
        Ok(level)
    }

    pub fn add_hook(&self, hook: Arc<dyn Hook>) {
        self.inner.hooks.write().push(hook);
    }

    pub fn hook_count(&self) -> usize {
        self.inner.hooks.read().len()
    }

    pub fn formatter(&self) -> Arc<dyn Formatter> {
        self.inner.formatter.clone()
    }

    pub fn entry(&self) -> Entry<'_> {
        Entry {
            logger: self,
            fields: Fields::new(),
            context: None,
        }
    }

    pub fn with_field(&self, key: impl Into<String>, value: impl Into<Value>) -> Entry<'_> {
        self.entry().with_field(key, value)
    }

    pub fn with_fields(&self, fields: Fields) -> Entry<'_> {
        self.entry().with_fields(fields)
    }

    pub fn with_context(&self, context: &Context) -> Entry<'_> {
        self.entry().with_context(context)
    }

    #[track_caller]
    pub fn log(&self, level: Level, message: impl fmt::Display) {
        self.entry().log(level, message);
    }

    #[track_caller]
    pub fn trace(&self, message: impl fmt::Display) {
        self.entry().log(Level::Trace, message);
    }

    #[track_caller]
    pub fn debug(&self, message: impl fmt::Display) {
        self.entry().log(Level::Debug, message);
    }

    #[track_caller]
    pub fn info(&self, message: impl fmt::Display) {
        self.entry().log(Level::Info, message);
    }

    #[track_caller]
    pub fn warn(&self, message: impl fmt::Display) {
        self.entry().log(Level::Warn, message);
    }

    #[track_caller]
    pub fn error(&self, message: impl fmt::Display) {
        self.entry().log(Level::Error, message);
    }

    #[track_caller]
    pub fn fatal(&self, message: impl fmt::Display) -> ! {
        self.entry().fatal(message)
    }

    #[track_caller]
    pub fn panic(&self, message: impl fmt::Display) -> ! {
        self.entry().panic(message)
    }

    /// Runs hooks on an already built record and writes it out. Records below
    /// the current level are dropped.
    pub fn dispatch(&self, mut record: LogRecord) {
        if !self.is_enabled(record.level) {
            return;
        }

        let level = record.level;
        let hooks = self.inner.hooks.read().clone();
        for hook in hooks.iter().filter(|hook| hook.applies_to(level)) {
            if let Err(e) = hook.fire(&mut record) {
                eprintln!("Failed to fire hook: {e}");
            }
        }

        match self.inner.formatter.format(&record) {
            Ok(bytes) => {
                let mut out = self.inner.out.lock();
                if let Err(e) = out.write_all(&bytes).and_then(|()| out.flush()) {
                    eprintln!("Failed to write to log: {e}");
                }
            }
            Err(e) => eprintln!("Failed to format log record: {e}"),
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level())
            .field("hooks", &self.hook_count())
            .finish()
    }
}

/// A record under construction: fields and context collected before the
/// level method emits it.
pub struct Entry<'a> {
    logger: &'a Logger,
    fields: Fields,
    context: Option<Context>,
}

impl Entry<'_> {
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn with_context(mut self, context: &Context) -> Self {
        self.context = Some(context.clone());
        self
    }

    #[track_caller]
    pub fn log(self, level: Level, message: impl fmt::Display) {
        if !self.logger.is_enabled(level) {
            return;
        }
        let caller = CallSite::from(Location::caller());
        let record = LogRecord::new(level, message.to_string())
            .with_fields(self.fields)
            .with_context(self.context)
            .with_caller(Some(caller));
        self.logger.dispatch(record);
    }

    #[track_caller]
    pub fn trace(self, message: impl fmt::Display) {
        self.log(Level::Trace, message);
    }

    #[track_caller]
    pub fn debug(self, message: impl fmt::Display) {
        self.log(Level::Debug, message);
    }

    #[track_caller]
    pub fn info(self, message: impl fmt::Display) {
        self.log(Level::Info, message);
    }

    #[track_caller]
    pub fn warn(self, message: impl fmt::Display) {
        self.log(Level::Warn, message);
    }

    #[track_caller]
    pub fn error(self, message: impl fmt::Display) {
        self.log(Level::Error, message);
    }

    /// Writes the record and exits the process with status 1.
    #[track_caller]
    pub fn fatal(self, message: impl fmt::Display) -> ! {
        self.log(Level::Fatal, message);
        std::process::exit(1)
    }

    /// Writes the record and panics with the same message.
    #[track_caller]
    pub fn panic(self, message: impl fmt::Display) -> ! {
        let message = message.to_string();
        self.log(Level::Panic, &message);
        panic!("{message}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::JsonFormatter;
    use crate::hooks::HookError;

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

    impl Capture {
        fn lines(&self) -> Vec<Value> {
            let raw = String::from_utf8(self.0.lock().clone()).unwrap();
            raw.lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    struct FailingHook;

    impl Hook for FailingHook {
        fn levels(&self) -> &[Level] {
            &Level::ALL
        }

        fn fire(&self, _record: &mut LogRecord) -> Result<(), HookError> {
            Err(HookError::Failed {
                hook: "failing",
                reason: "always".to_string(),
            })
        }
    }

    struct Tag(&'static str);

    impl Hook for Tag {
        fn levels(&self) -> &[Level] {
            &[Level::Error]
        }

        fn fire(&self, record: &mut LogRecord) -> Result<(), HookError> {
            record
                .fields
                .insert("tag".to_string(), Value::String(self.0.to_string()));
            Ok(())
        }
    }

    #[test]
    fn test_level_filtering() {
        let capture = Capture::default();
        let logger = Logger::new(capture.clone(), Arc::new(JsonFormatter), Level::Info);

        logger.debug("hidden");
        logger.info("shown");
        logger.error("also shown");

        let lines = capture.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["msg"], "shown");
        assert_eq!(lines[1]["level"], "error");
    }

    #[test]
    fn test_failing_hook_does_not_abort_write() {
        let capture = Capture::default();
        let logger = Logger::new(capture.clone(), Arc::new(JsonFormatter), Level::Debug);
        logger.add_hook(Arc::new(FailingHook));

        logger.info("still written");
        assert_eq!(capture.lines().len(), 1);
    }

    #[test]
    fn test_hooks_respect_their_levels() {
        let capture = Capture::default();
        let logger = Logger::new(capture.clone(), Arc::new(JsonFormatter), Level::Debug);
        logger.add_hook(Arc::new(Tag("first")));

        logger.info("untagged");
        logger.error("tagged");

        let lines = capture.lines();
        assert!(lines[0].get("tag").is_none());
        assert_eq!(lines[1]["tag"], "first");
    }

    #[test]
    fn test_hooks_run_in_registration_order() {
        let capture = Capture::default();
        let logger = Logger::new(capture.clone(), Arc::new(JsonFormatter), Level::Debug);
        logger.add_hook(Arc::new(Tag("first")));
        logger.add_hook(Arc::new(Tag("second")));

        logger.error("tagged twice");
        assert_eq!(capture.lines()[0]["tag"], "second");
    }

    #[test]
    fn test_entry_fields_and_context() {
        let capture = Capture::default();
        let logger = Logger::new(capture.clone(), Arc::new(JsonFormatter), Level::Debug);

        logger
            .with_field("user", "alice")
            .with_field("attempt", 2)
            .with_context(&Context::new().with_request_id("r-1"))
            .warn("login retry");

        let lines = capture.lines();
        assert_eq!(lines[0]["user"], "alice");
        assert_eq!(lines[0]["attempt"], 2);
        assert_eq!(lines[0]["level"], "warning");
    }

    #[test]
    fn test_caller_is_the_application_call_site() {
        let capture = Capture::default();
        let logger = Logger::new(capture.clone(), Arc::new(JsonFormatter), Level::Debug);
        logger.add_hook(Arc::new(crate::hooks::CallerHook::new()));

        let line = line!() + 1;
        logger.with_field("k", 1).info("through entry");
        logger.warn("direct");

        let lines = capture.lines();
        assert_eq!(lines[0]["file"], format!("src/logger.rs:{line}"));
        assert_eq!(lines[1]["file"], format!("src/logger.rs:{}", line + 1));
    }

    #[test]
    fn test_reload_level() {
        let logger = Logger::new(Capture::default(), Arc::new(JsonFormatter), Level::Debug);

        assert_eq!(
            logger.reload_level(&Value::String("info".into())).unwrap(),
            Level::Info
        );
        assert_eq!(logger.level(), Level::Info);

        assert!(matches!(
            logger.reload_level(&Value::String("notalevel".into())),
            Err(ReloadError::InvalidLevel(_))
        ));
        assert!(matches!(
            logger.reload_level(&Value::from(3)),
            Err(ReloadError::NotAString { .. })
        ));
        assert_eq!(logger.level(), Level::Info);
    }

    #[test]
    #[should_panic(expected = "unrecoverable")]
    fn test_panic_level_panics_after_writing() {
        let logger = Logger::new(Capture::default(), Arc::new(JsonFormatter), Level::Debug);
        logger.panic("unrecoverable");
    }
}
