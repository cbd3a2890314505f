//! Per-record decorators run inline by the [`crate::logger::Logger`].
//!
//! Hooks fire in registration order for every record whose level they
//! accept. They only touch the record's fields; a failing hook is reported
//! on stderr and the record is still written.

pub mod caller;
pub mod request_id;
pub mod trace_id;

pub use caller::{CallerHook, FIELD_KEY_FILE};
pub use request_id::{FIELD_KEY_REQUEST_ID, RequestIdHook};
pub use trace_id::{FIELD_KEY_TRACE_ID, TraceIdHook};

use crate::level::Level;
use crate::record::LogRecord;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HookError {
    #[error("hook '{hook}' failed: {reason}")]
    Failed { hook: &'static str, reason: String },
}

pub trait Hook: Send + Sync {
    fn levels(&self) -> &[Level];

    fn applies_to(&self, level: Level) -> bool {
        self.levels().contains(&level)
    }

    fn fire(&self, record: &mut LogRecord) -> Result<(), HookError>;
}
