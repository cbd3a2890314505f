//! Non-blocking delivery of events and log lines to the broker.
//!
//! Callers enqueue onto two bounded queues (events, logs) with `try_send`;
//! a full queue drops the message. One dispatch task multiplexes both queues
//! onto the producer input, and one error task drains the producer's failure
//! stream until the producer reports it has closed.
//!
//! Shutdown order:
//! 1. flip to `Closing` and cancel the closing token (no new enqueues),
//! 2. wait for the dispatch task, so nothing is mid-handoff,
//! 3. close the producer input,
//! 4. wait for the error task, which ends when the producer has closed,
//! 5. flip to `Closed`.
//!
//! Messages still queued when the dispatch task observes the closing token
//! are dropped; their count is reported and kept in [`PipelineStats`].

pub mod identity;
mod state;

pub use identity::Identity;
pub use state::PipelineState;

use crate::format::{FormatError, Formatter, encode_json_line};
use crate::hooks::{Hook, HookError};
use crate::level::Level;
use crate::producer::http::parse_broker_addrs;
use crate::producer::{
    AsyncProducer, DEFAULT_INPUT_BUFFER, OutboundMessage, ProducerErrors, ProducerInput,
    RestProxyConfig, RestProxyTransport, Transport, TransportError,
};
use crate::record::{Fields, LogRecord};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use state::StateCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const EVENT_QUEUE_CAPACITY: usize = 1024;
pub const LOG_QUEUE_CAPACITY: usize = 2048;
pub const EVENT_SAMPLE_ONE_IN: u32 = 10;
pub const FIELD_KEY_EVENT_TYPE: &str = "event_type";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid pipeline settings: {0}")]
    InvalidSettings(String),
    #[error("broker connection failed: {0}")]
    Connect(#[from] TransportError),
    #[error("failed to serialize message: {0}")]
    Format(#[from] FormatError),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub event_topic: String,
    pub log_topic: String,
    /// Log levels mirrored to the broker.
    pub levels: Vec<Level>,
    pub event_queue_capacity: usize,
    pub log_queue_capacity: usize,
    /// Filtered events are kept with probability `1 / event_sample_one_in`.
    pub event_sample_one_in: u32,
    pub producer_buffer: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            event_topic: "event".to_string(),
            log_topic: "log".to_string(),
            levels: Level::ALL.to_vec(),
            event_queue_capacity: EVENT_QUEUE_CAPACITY,
            log_queue_capacity: LOG_QUEUE_CAPACITY,
            event_sample_one_in: EVENT_SAMPLE_ONE_IN,
            producer_buffer: DEFAULT_INPUT_BUFFER,
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.event_topic.trim().is_empty() || self.log_topic.trim().is_empty() {
            return Err(PipelineError::InvalidSettings(
                "topic names must not be empty".to_string(),
            ));
        }
        if self.event_queue_capacity == 0 || self.log_queue_capacity == 0 {
            return Err(PipelineError::InvalidSettings(
                "queue capacities must be greater than 0".to_string(),
            ));
        }
        if self.event_sample_one_in == 0 {
            return Err(PipelineError::InvalidSettings(
                "event sampling ratio must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub events_enqueued: u64,
    pub events_dropped: u64,
    pub logs_enqueued: u64,
    pub logs_dropped: u64,
    pub transport_errors: u64,
    pub undrained_at_close: u64,
}

#[derive(Debug, Default)]
struct Counters {
    events_enqueued: AtomicU64,
    events_dropped: AtomicU64,
    logs_enqueued: AtomicU64,
    logs_dropped: AtomicU64,
    transport_errors: AtomicU64,
    undrained_at_close: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            events_enqueued: self.events_enqueued.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            logs_enqueued: self.logs_enqueued.load(Ordering::Relaxed),
            logs_dropped: self.logs_dropped.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            undrained_at_close: self.undrained_at_close.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum MessageClass {
    Event,
    Log,
}

impl MessageClass {
    fn name(self) -> &'static str {
        match self {
            MessageClass::Event => "event",
            MessageClass::Log => "log",
        }
    }
}

/// What the dispatch task hands back when it stops.
struct DispatchExit {
    input: ProducerInput,
    events: mpsc::Receiver<OutboundMessage>,
    logs: mpsc::Receiver<OutboundMessage>,
}

struct PipelineInner {
    settings: PipelineSettings,
    identity: Identity,
    formatter: Arc<dyn Formatter>,
    state: StateCell,
    // Held shared by enqueuers, exclusively while flipping to Closing.
    admission: RwLock<()>,
    closing: CancellationToken,
    event_tx: mpsc::Sender<OutboundMessage>,
    log_tx: mpsc::Sender<OutboundMessage>,
    dispatch: Mutex<Option<JoinHandle<DispatchExit>>>,
    error_drain: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl Drop for PipelineInner {
    fn drop(&mut self) {
        self.closing.cancel();
    }
}

/// Handle to the delivery pipeline. Clones share the same queues and tasks.
/// A disabled pipeline (no broker configured) accepts everything and does
/// nothing.
#[derive(Clone, Default)]
pub struct Pipeline {
    inner: Option<Arc<PipelineInner>>,
}

impl Pipeline {
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Connects to the `;`-delimited broker list. An empty list yields a
    /// disabled pipeline; an unreachable or malformed broker is an error.
    pub async fn connect(
        broker_addrs: &str,
        transport_config: RestProxyConfig,
        settings: PipelineSettings,
        identity: Identity,
        formatter: Arc<dyn Formatter>,
    ) -> Result<Self, PipelineError> {
        let brokers = parse_broker_addrs(broker_addrs)?;
        if brokers.is_empty() {
            return Ok(Self::disabled());
        }
        settings.validate()?;

        let transport = RestProxyTransport::connect(brokers, transport_config).await?;
        Self::with_transport(transport, settings, identity, formatter)
    }

    /// Starts the pipeline on top of an already connected transport. Must be
    /// called from within a tokio runtime.
    pub fn with_transport<T: Transport>(
        transport: T,
        settings: PipelineSettings,
        identity: Identity,
        formatter: Arc<dyn Formatter>,
    ) -> Result<Self, PipelineError> {
        settings.validate()?;

        let (event_tx, event_rx) = mpsc::channel(settings.event_queue_capacity);
        let (log_tx, log_rx) = mpsc::channel(settings.log_queue_capacity);
        let (input, errors, _producer) = AsyncProducer::start(transport, settings.producer_buffer);

        let closing = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        let dispatch = tokio::spawn(dispatch_messages(
            closing.clone(),
            event_rx,
            log_rx,
            input,
        ));
        let error_drain = tokio::spawn(drain_errors(errors, counters.clone()));

        Ok(Self {
            inner: Some(Arc::new(PipelineInner {
                settings,
                identity,
                formatter,
                state: StateCell::new(),
                admission: RwLock::new(()),
                closing,
                event_tx,
                log_tx,
                dispatch: Mutex::new(Some(dispatch)),
                error_drain: Mutex::new(Some(error_drain)),
                counters,
            })),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// `None` for a disabled pipeline.
    pub fn state(&self) -> Option<PipelineState> {
        self.inner.as_ref().map(|inner| inner.state.get())
    }

    pub fn event_queue_len(&self) -> usize {
        self.inner
            .as_ref()
            .map_or(0, |inner| queue_len(&inner.event_tx))
    }

    pub fn log_queue_len(&self) -> usize {
        self.inner
            .as_ref()
            .map_or(0, |inner| queue_len(&inner.log_tx))
    }

    pub fn stats(&self) -> PipelineStats {
        self.inner
            .as_ref()
            .map(|inner| inner.counters.snapshot())
            .unwrap_or_default()
    }

    /// Ships a business event. Events without `event_type` are ignored; with
    /// `need_filter` only a sampled fraction is kept. A full queue drops the
    /// event. Only a serialization failure is returned.
    pub fn submit_event(&self, mut fields: Fields, need_filter: bool) -> Result<(), PipelineError> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        if !fields.contains_key(FIELD_KEY_EVENT_TYPE) {
            return Ok(());
        }
        if need_filter && !sampled(inner.settings.event_sample_one_in) {
            return Ok(());
        }

        inner.identity.enrich(&mut fields);
        let payload = encode_json_line(&fields)?;
        let rendered = String::from_utf8_lossy(&payload);
        tracing::debug!("sending log event: {}", rendered.trim_end());

        let message = OutboundMessage::new(inner.settings.event_topic.clone(), payload);
        inner.enqueue(MessageClass::Event, message);
        Ok(())
    }

    /// Ships a copy of `record` stamped with the process identity, rendered
    /// by the logger's formatter.
    pub fn submit_log(&self, record: &LogRecord) -> Result<(), PipelineError> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };

        let mut shipped = record.clone();
        inner.identity.enrich(&mut shipped.fields);
        let payload = inner.formatter.format(&shipped)?;

        let message = OutboundMessage::new(inner.settings.log_topic.clone(), payload);
        inner.enqueue(MessageClass::Log, message);
        Ok(())
    }

    /// Stops accepting messages, lets the producer flush and close, and
    /// returns once both background tasks have exited. Only the first call
    /// does any work.
    ///
    /// Call it once, last in the cleanup path, after everything that might
    /// still log.
    pub async fn shutdown(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        {
            let _gate = inner.admission.write();
            if !inner.state.begin_closing() {
                return;
            }
        }

        let started = Instant::now();
        inner.closing.cancel();

        let dispatch = inner.dispatch.lock().take();
        let exit = match dispatch {
            Some(handle) => match handle.await {
                Ok(exit) => Some(exit),
                Err(e) => {
                    eprintln!("dispatch task failed: {e}");
                    None
                }
            },
            None => None,
        };

        if let Some(DispatchExit {
            input,
            events,
            logs,
        }) = exit
        {
            let (event_left, log_left) = (events.len(), logs.len());
            inner
                .counters
                .undrained_at_close
                .store((event_left + log_left) as u64, Ordering::Relaxed);
            eprintln!(
                "broker producer starts closing, undrained msg size: log={log_left}, event={event_left}"
            );
            input.close();
        }

        let error_drain = inner.error_drain.lock().take();
        if let Some(handle) = error_drain {
            if let Err(e) = handle.await {
                eprintln!("producer error task failed: {e}");
            }
        }

        inner.state.finish_closing();
        eprintln!("broker producer closed: duration={:?}", started.elapsed());
    }
}

impl PipelineInner {
    fn enqueue(&self, class: MessageClass, message: OutboundMessage) {
        let _gate = self.admission.read();
        if self.state.get() != PipelineState::Running {
            eprintln!(
                "broker producer started to close, {} not produced, msg={}",
                class.name(),
                message.payload_lossy()
            );
            return;
        }

        let (tx, enqueued, dropped) = match class {
            MessageClass::Event => (
                &self.event_tx,
                &self.counters.events_enqueued,
                &self.counters.events_dropped,
            ),
            MessageClass::Log => (
                &self.log_tx,
                &self.counters.logs_enqueued,
                &self.counters.logs_dropped,
            ),
        };

        match tx.try_send(message) {
            Ok(()) => {
                enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(message)) => {
                dropped.fetch_add(1, Ordering::Relaxed);
                eprintln!(
                    "{} queue is full, message not produced, msg={}",
                    class.name(),
                    message.payload_lossy()
                );
            }
            Err(TrySendError::Closed(message)) => {
                dropped.fetch_add(1, Ordering::Relaxed);
                eprintln!(
                    "{} queue is closed, message not produced, msg={}",
                    class.name(),
                    message.payload_lossy()
                );
            }
        }
    }
}

impl Hook for Pipeline {
    fn levels(&self) -> &[Level] {
        match &self.inner {
            Some(inner) => &inner.settings.levels,
            None => &[],
        }
    }

    fn fire(&self, record: &mut LogRecord) -> Result<(), HookError> {
        self.submit_log(record).map_err(|e| HookError::Failed {
            hook: "broker",
            reason: e.to_string(),
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state())
            .field("event_queue_len", &self.event_queue_len())
            .field("log_queue_len", &self.log_queue_len())
            .field("stats", &self.stats())
            .finish()
    }
}

fn queue_len(tx: &mpsc::Sender<OutboundMessage>) -> usize {
    tx.max_capacity().saturating_sub(tx.capacity())
}

fn sampled(one_in: u32) -> bool {
    one_in <= 1 || rand::rng().random_range(0..one_in) == 0
}

async fn dispatch_messages(
    closing: CancellationToken,
    mut events: mpsc::Receiver<OutboundMessage>,
    mut logs: mpsc::Receiver<OutboundMessage>,
    input: ProducerInput,
) -> DispatchExit {
    loop {
        tokio::select! {
            () = closing.cancelled() => break,
            Some(message) = events.recv() => forward(&input, message).await,
            Some(message) = logs.recv() => forward(&input, message).await,
        }
    }

    DispatchExit {
        input,
        events,
        logs,
    }
}

async fn forward(input: &ProducerInput, message: OutboundMessage) {
    let topic = message.topic.clone();
    if let Err(e) = input.send(message).await {
        eprintln!("broker producer input unavailable, topic: {topic}, error: {e}");
    }
}

async fn drain_errors(mut errors: ProducerErrors, counters: Arc<Counters>) {
    while let Some(failure) = errors.recv().await {
        counters.transport_errors.fetch_add(1, Ordering::Relaxed);
        eprintln!(
            "broker producer topic: {}, error: {}, log: {}",
            failure.message.topic,
            failure.error,
            failure.message.payload_lossy()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::JsonFormatter;
    use serde_json::json;

    struct Sink;

    impl Transport for Sink {
        async fn publish(&self, _message: &OutboundMessage) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn identity() -> Identity {
        Identity::new("svc", "host-1", "node-1")
    }

    #[test]
    fn test_settings_validation() {
        assert!(PipelineSettings::default().validate().is_ok());

        let zero_queue = PipelineSettings {
            event_queue_capacity: 0,
            ..Default::default()
        };
        assert!(zero_queue.validate().is_err());

        let no_topic = PipelineSettings {
            log_topic: " ".to_string(),
            ..Default::default()
        };
        assert!(no_topic.validate().is_err());

        let no_sampling = PipelineSettings {
            event_sample_one_in: 0,
            ..Default::default()
        };
        assert!(no_sampling.validate().is_err());
    }

    #[test]
    fn test_sampling_bounds() {
        assert!(sampled(1));
        assert!(sampled(0));
    }

    #[tokio::test]
    async fn test_disabled_pipeline_is_inert() {
        let pipeline = Pipeline::disabled();
        let mut fields = Fields::new();
        fields.insert("event_type".to_string(), json!("x"));

        assert!(pipeline.submit_event(fields, false).is_ok());
        assert!(!pipeline.is_enabled());
        assert_eq!(pipeline.state(), None);
        assert_eq!(pipeline.event_queue_len(), 0);
        assert!(pipeline.levels().is_empty());
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_without_brokers_is_disabled() {
        let pipeline = Pipeline::connect(
            " ; ",
            RestProxyConfig::default(),
            PipelineSettings::default(),
            identity(),
            Arc::new(JsonFormatter),
        )
        .await
        .unwrap();
        assert!(!pipeline.is_enabled());
    }

    #[tokio::test]
    async fn test_shutdown_walks_states() {
        let pipeline = Pipeline::with_transport(
            Sink,
            PipelineSettings::default(),
            identity(),
            Arc::new(JsonFormatter),
        )
        .unwrap();
        assert_eq!(pipeline.state(), Some(PipelineState::Running));

        pipeline.shutdown().await;
        assert_eq!(pipeline.state(), Some(PipelineState::Closed));

        // second call is a no-op
        pipeline.shutdown().await;
        assert_eq!(pipeline.state(), Some(PipelineState::Closed));
    }
}
