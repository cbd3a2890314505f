#![deny(rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::cast_possible_truncation, // Queue lengths and counters stay far below u64::MAX
    clippy::missing_errors_doc,       // Error enums are documented per module
    clippy::missing_panics_doc,       // Only `Logger::panic` panics, and says so
    clippy::module_name_repetitions,  // e.g. PipelineError in pipeline module
    clippy::must_use_candidate,       // Annotated selectively on critical APIs
    clippy::doc_markdown
)]

pub mod bridge;
pub mod config;
pub mod context;
pub mod facade;
pub mod format;
pub mod hooks;
pub mod level;
pub mod logger;
pub mod pipeline;
pub mod producer;
pub mod record;
pub mod writer;

// Re-export main types for easy access
pub use bridge::LoggerLayer;
pub use config::{Config, ConfigError};
pub use context::{Context, SpanContext, TraceId, request_id_of, sampled_trace_id_of};
pub use facade::{Clog, ClogError};
pub use format::{Formatter, JsonFormatter, LogFormat, TextFormatter};
pub use hooks::{CallerHook, Hook, HookError, RequestIdHook, TraceIdHook};
pub use level::{Level, LevelParseError, hook_levels, hook_levels_for};
pub use logger::{Entry, Logger, ReloadError};
pub use pipeline::{
    Identity, Pipeline, PipelineError, PipelineSettings, PipelineState, PipelineStats,
};
pub use producer::{OutboundMessage, Transport, TransportError};
pub use record::{CallSite, Fields, LogRecord};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
