#![allow(dead_code)]

use clog::{Identity, OutboundMessage, Transport, TransportError};
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Transport that keeps every published message in memory.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    closed: Arc<Mutex<bool>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|message| message.topic == topic)
            .map(|message| serde_json::from_slice(&message.payload).unwrap())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

impl Transport for RecordingTransport {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.sent.lock().push(message.clone());
        Ok(())
    }

    async fn close(&self) {
        *self.closed.lock() = true;
    }
}

/// Transport whose publishes wait for a permit, so tests can hold the
/// producer busy.
#[derive(Clone)]
pub struct GatedTransport {
    gate: Arc<Semaphore>,
    inner: RecordingTransport,
}

impl GatedTransport {
    pub fn closed_gate() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            inner: RecordingTransport::default(),
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub fn recorded(&self) -> &RecordingTransport {
        &self.inner
    }
}

impl Transport for GatedTransport {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| TransportError::Closed)?;
        permit.forget();
        self.inner.publish(message).await
    }
}

/// Transport that rejects everything.
#[derive(Clone, Copy, Default)]
pub struct FailingTransport;

impl Transport for FailingTransport {
    async fn publish(&self, _message: &OutboundMessage) -> Result<(), TransportError> {
        Err(TransportError::Rejected { status: 503 })
    }
}

/// In-memory log sink shared between the logger and the test.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn lines(&self) -> Vec<Value> {
        String::from_utf8(self.0.lock().clone())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn test_identity() -> Identity {
    Identity::new("svc", "host-1", "node-1")
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Like [`wait_until`] for conditions that need to await.
pub async fn wait_until_async<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition().await
}
