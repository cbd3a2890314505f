use crate::context::Context;
use crate::level::Level;
use chrono::{DateTime, Local};
use serde_json::{Map, Value};

/// Field name → value mapping shared by log records and events.
pub type Fields = Map<String, Value>;

/// Source position of the code that emitted a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub file: &'static str,
    pub line: u32,
}

impl CallSite {
    pub fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }
}

impl From<&'static std::panic::Location<'static>> for CallSite {
    fn from(location: &'static std::panic::Location<'static>) -> Self {
        Self::new(location.file(), location.line())
    }
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    pub time: DateTime<Local>,
    pub message: String,
    pub fields: Fields,
    pub context: Option<Context>,
    pub caller: Option<CallSite>,
}

impl LogRecord {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            time: Local::now(),
            message: message.into(),
            fields: Fields::new(),
            context: None,
            caller: None,
        }
    }

    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_context(mut self, context: Option<Context>) -> Self {
        self.context = context;
        self
    }

    pub fn with_caller(mut self, caller: Option<CallSite>) -> Self {
        self.caller = caller;
        self
    }
}
