use crate::record::{Fields, LogRecord};
use chrono::SecondsFormat;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

pub const FIELD_KEY_TIME: &str = "time";
pub const FIELD_KEY_MSG: &str = "msg";
pub const FIELD_KEY_LEVEL: &str = "level";

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("failed to marshal fields to JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to render text line: {0}")]
    Text(#[from] std::fmt::Error),
}

/// Turns a record into the bytes written to a sink, newline included.
pub trait Formatter: Send + Sync {
    fn format(&self, record: &LogRecord) -> Result<Vec<u8>, FormatError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// logfmt-style `key=value` lines
    Text,
    /// One JSON object per line
    #[default]
    Json,
}

impl LogFormat {
    pub fn formatter(self) -> Arc<dyn Formatter> {
        match self {
            LogFormat::Text => Arc::new(TextFormatter),
            LogFormat::Json => Arc::new(JsonFormatter),
        }
    }
}

fn timestamp(record: &LogRecord) -> String {
    record.time.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Moves user fields that collide with the reserved keys out of the way.
fn prefix_field_clashes(fields: &mut Fields) {
    for key in [FIELD_KEY_TIME, FIELD_KEY_MSG, FIELD_KEY_LEVEL] {
        if let Some(value) = fields.remove(key) {
            fields.insert(format!("fields.{key}"), value);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format(&self, record: &LogRecord) -> Result<Vec<u8>, FormatError> {
        let mut data = record.fields.clone();
        prefix_field_clashes(&mut data);
        data.insert(FIELD_KEY_TIME.to_string(), Value::String(timestamp(record)));
        data.insert(
            FIELD_KEY_MSG.to_string(),
            Value::String(record.message.clone()),
        );
        data.insert(
            FIELD_KEY_LEVEL.to_string(),
            Value::String(record.level.as_str().to_string()),
        );

        encode_json_line(&data)
    }
}

/// Serializes a field map as a single JSON line. Keys come out sorted.
pub fn encode_json_line(fields: &Fields) -> Result<Vec<u8>, FormatError> {
    let mut buf = serde_json::to_vec(fields)?;
    buf.push(b'\n');
    Ok(buf)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextFormatter;

impl TextFormatter {
    fn needs_quoting(text: &str) -> bool {
        if text.is_empty() {
            return true;
        }
        !text.chars().all(|ch| {
            ch.is_ascii_alphanumeric() || matches!(ch, '-' | '.' | '_' | '/' | '@' | '^' | '+')
        })
    }

    fn append_value(buf: &mut String, value: &str) -> std::fmt::Result {
        if Self::needs_quoting(value) {
            write!(buf, "{value:?}")
        } else {
            buf.write_str(value)
        }
    }

    fn append_kv(buf: &mut String, key: &str, value: &str) -> std::fmt::Result {
        if !buf.is_empty() {
            buf.push(' ');
        }
        buf.write_str(key)?;
        buf.push('=');
        Self::append_value(buf, value)
    }
}

impl Formatter for TextFormatter {
    fn format(&self, record: &LogRecord) -> Result<Vec<u8>, FormatError> {
        let mut data = record.fields.clone();
        prefix_field_clashes(&mut data);

        let mut buf = String::with_capacity(128);
        Self::append_kv(&mut buf, FIELD_KEY_TIME, &timestamp(record))?;
        Self::append_kv(&mut buf, FIELD_KEY_LEVEL, record.level.as_str())?;
        if !record.message.is_empty() {
            Self::append_kv(&mut buf, FIELD_KEY_MSG, &record.message)?;
        }
        for (key, value) in &data {
            match value {
                Value::String(text) => Self::append_kv(&mut buf, key, text)?,
                other => Self::append_kv(&mut buf, key, &other.to_string())?,
            }
        }
        buf.push('\n');

        Ok(buf.into_bytes())
    }
}
