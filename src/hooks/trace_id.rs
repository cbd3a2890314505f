use super::{Hook, HookError};
use crate::context::sampled_trace_id_of;
use crate::level::Level;
use crate::record::LogRecord;
use serde_json::Value;

pub const FIELD_KEY_TRACE_ID: &str = "traceId";

/// Attaches the trace id of sampled spans only.
pub struct TraceIdHook {
    field: String,
    levels: Vec<Level>,
}

impl TraceIdHook {
    pub fn new() -> Self {
        Self {
            field: FIELD_KEY_TRACE_ID.to_string(),
            levels: Level::ALL.to_vec(),
        }
    }
}

impl Default for TraceIdHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for TraceIdHook {
    fn levels(&self) -> &[Level] {
        &self.levels
    }

    fn fire(&self, record: &mut LogRecord) -> Result<(), HookError> {
        if let Some(trace_id) = sampled_trace_id_of(record.context.as_ref()) {
            record
                .fields
                .insert(self.field.clone(), Value::String(trace_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, SpanContext, TraceId};

    fn record_with_span(sampled: bool) -> LogRecord {
        let span = SpanContext::new(TraceId::new(0, 0xfeed), 1, sampled);
        LogRecord::new(Level::Error, "boom").with_context(Some(Context::new().with_span(span)))
    }

    #[test]
    fn test_sampled_trace_is_recorded() {
        let mut record = record_with_span(true);
        TraceIdHook::new().fire(&mut record).unwrap();
        assert_eq!(record.fields[FIELD_KEY_TRACE_ID], "000000000000feed");
    }

    #[test]
    fn test_unsampled_trace_is_not_recorded() {
        let mut record = record_with_span(false);
        TraceIdHook::new().fire(&mut record).unwrap();
        assert!(!record.fields.contains_key(FIELD_KEY_TRACE_ID));
    }
}
