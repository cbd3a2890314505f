//! Asynchronous broker producer.
//!
//! [`AsyncProducer::start`] spawns one worker that owns a [`Transport`] and
//! publishes messages in the order they arrive on its input. Failed publishes
//! are reported on the error stream. Closing the input lets the worker drain
//! what is already queued, close the transport, and then end the error
//! stream, which is how callers learn the producer is fully closed.

pub mod http;

pub use http::{RestProxyConfig, RestProxyTransport};

use bytes::Bytes;
use std::fmt;
use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default number of messages the producer input holds before the sender
/// waits.
pub const DEFAULT_INPUT_BUFFER: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid broker address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("no broker reachable: {0}")]
    Unreachable(String),
    #[error("broker rejected message: HTTP {status}")]
    Rejected { status: u16 },
    #[error("network error: {0}")]
    Network(String),
    #[error("producer closed")]
    Closed,
}

/// A (topic, payload) pair on its way to the broker.
#[derive(Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).trim_end().to_string()
    }
}

impl fmt::Debug for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundMessage")
            .field("topic", &self.topic)
            .field("payload", &self.payload_lossy())
            .finish()
    }
}

/// A failed publish together with the message that failed.
#[derive(Debug, Clone)]
pub struct ProducerError {
    pub message: OutboundMessage,
    pub error: TransportError,
}

/// Network seam between the producer worker and the broker.
pub trait Transport: Send + Sync + 'static {
    fn publish(
        &self,
        message: &OutboundMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Called once after the last publish, before the error stream ends.
    fn close(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Sending half of the producer. Dropping or closing it starts the
/// producer's close sequence.
#[derive(Debug)]
pub struct ProducerInput {
    tx: mpsc::Sender<OutboundMessage>,
}

impl ProducerInput {
    pub async fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Asks the producer to flush and close. Returns immediately; completion
    /// is signalled by the end of the error stream.
    pub fn close(self) {
        drop(self.tx);
    }
}

#[derive(Debug)]
pub struct ProducerErrors {
    rx: mpsc::UnboundedReceiver<ProducerError>,
}

impl ProducerErrors {
    /// Next failure, or `None` once the producer has fully closed.
    pub async fn recv(&mut self) -> Option<ProducerError> {
        self.rx.recv().await
    }
}

pub struct AsyncProducer;

impl AsyncProducer {
    /// Spawns the producer worker. Must be called from within a tokio
    /// runtime.
    pub fn start<T: Transport>(
        transport: T,
        input_buffer: usize,
    ) -> (ProducerInput, ProducerErrors, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<OutboundMessage>(input_buffer.max(1));
        let (err_tx, err_rx) = mpsc::unbounded_channel();

        let worker = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(error) = transport.publish(&message).await {
                    // Receiver gone means nobody is listening for failures.
                    let _ = err_tx.send(ProducerError { message, error });
                }
            }
            transport.close().await;
            drop(err_tx);
        });

        (ProducerInput { tx }, ProducerErrors { rx: err_rx }, worker)
    }
}
