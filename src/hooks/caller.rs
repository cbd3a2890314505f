use super::{Hook, HookError};
use crate::level::Level;
use crate::record::{CallSite, LogRecord};
use serde_json::Value;

pub const FIELD_KEY_FILE: &str = "file";

/// Records `dir/file.rs:line` of the code that emitted the record. The
/// logger's level methods are `#[track_caller]`, so the call site is already
/// the application's own frame by the time the hook sees it.
pub struct CallerHook {
    field: String,
    levels: Vec<Level>,
}

impl CallerHook {
    pub fn new() -> Self {
        Self {
            field: FIELD_KEY_FILE.to_string(),
            levels: Level::ALL.to_vec(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }
}

impl Default for CallerHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for CallerHook {
    fn levels(&self) -> &[Level] {
        &self.levels
    }

    fn fire(&self, record: &mut LogRecord) -> Result<(), HookError> {
        record
            .fields
            .insert(self.field.clone(), Value::String(find_caller(record.caller)));
        Ok(())
    }
}

/// `dir/file:line` of `caller`, or an empty string when the call site is
/// unknown.
pub fn find_caller(caller: Option<CallSite>) -> String {
    match caller {
        Some(site) => format!("{}:{}", shorten(site.file), site.line),
        None => String::new(),
    }
}

/// Keeps the last two components of a source path.
fn shorten(file: &str) -> &str {
    let mut separators = 0;
    for (idx, ch) in file.char_indices().rev() {
        if ch == '/' || ch == '\\' {
            separators += 1;
            if separators == 2 {
                return &file[idx + 1..];
            }
        }
    }
    file
}
