//! Call-scoped context carried alongside a log record.
//!
//! A [`Context`] holds the request identifier and the active span of the
//! call that produced a record. It is either passed explicitly through
//! [`crate::logger::Entry::with_context`] or installed for the lifetime of a
//! future with [`Context::scope`], which is what the tracing bridge reads.

use std::fmt;
use std::future::Future;

tokio::task_local! {
    static CURRENT: Context;
}

/// 128-bit trace identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TraceId {
    pub high: u64,
    pub low: u64,
}

impl TraceId {
    pub fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    pub fn is_valid(&self) -> bool {
        self.high != 0 || self.low != 0
    }
}

impl From<u128> for TraceId {
    fn from(value: u128) -> Self {
        Self {
            high: (value >> 64) as u64,
            low: value as u64,
        }
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.high == 0 {
            write!(f, "{:016x}", self.low)
        } else {
            write!(f, "{:016x}{:016x}", self.high, self.low)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: u64,
    pub sampled: bool,
}

impl SpanContext {
    pub fn new(trace_id: TraceId, span_id: u64, sampled: bool) -> Self {
        Self {
            trace_id,
            span_id,
            sampled,
        }
    }

    /// Parses a W3C `traceparent` header (`00-<trace>-<span>-<flags>`).
    pub fn from_traceparent(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let version = parts.next()?;
        let trace = parts.next()?;
        let span = parts.next()?;
        let flags = parts.next()?;

        if version.len() != 2 || trace.len() != 32 || span.len() != 16 || flags.len() != 2 {
            return None;
        }

        let trace_id = TraceId::from(u128::from_str_radix(trace, 16).ok()?);
        let span_id = u64::from_str_radix(span, 16).ok()?;
        let flags = u8::from_str_radix(flags, 16).ok()?;

        if !trace_id.is_valid() || span_id == 0 {
            return None;
        }

        Some(Self::new(trace_id, span_id, flags & 0x01 == 0x01))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    request_id: Option<String>,
    span: Option<SpanContext>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_generated_request_id(self) -> Self {
        self.with_request_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_span(mut self, span: SpanContext) -> Self {
        self.span = Some(span);
        self
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn span(&self) -> Option<&SpanContext> {
        self.span.as_ref()
    }

    /// Runs `fut` with `self` as the current context.
    pub async fn scope<F>(self, fut: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(self, fut).await
    }

    /// Context installed by the innermost enclosing [`Context::scope`].
    pub fn current() -> Option<Context> {
        CURRENT.try_with(Clone::clone).ok()
    }
}

/// Request identifier carried by `ctx`. Empty identifiers count as absent.
pub fn request_id_of(ctx: Option<&Context>) -> Option<&str> {
    ctx.and_then(Context::request_id)
        .filter(|request_id| !request_id.is_empty())
}

/// Trace identifier of the active span, only when the span was sampled.
pub fn sampled_trace_id_of(ctx: Option<&Context>) -> Option<String> {
    let span = ctx.and_then(Context::span)?;
    if span.sampled && span.trace_id.is_valid() {
        Some(span.trace_id.to_string())
    } else {
        None
    }
}
