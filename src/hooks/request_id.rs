use super::{Hook, HookError};
use crate::context::request_id_of;
use crate::level::Level;
use crate::record::LogRecord;
use serde_json::Value;

pub const FIELD_KEY_REQUEST_ID: &str = "requestId";

pub struct RequestIdHook {
    field: String,
    levels: Vec<Level>,
}

impl RequestIdHook {
    pub fn new() -> Self {
        Self {
            field: FIELD_KEY_REQUEST_ID.to_string(),
            levels: Level::ALL.to_vec(),
        }
    }
}

impl Default for RequestIdHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for RequestIdHook {
    fn levels(&self) -> &[Level] {
        &self.levels
    }

    fn fire(&self, record: &mut LogRecord) -> Result<(), HookError> {
        if let Some(request_id) = request_id_of(record.context.as_ref()) {
            let value = Value::String(request_id.to_string());
            record.fields.insert(self.field.clone(), value);
        }
        Ok(())
    }
}
