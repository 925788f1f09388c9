//! In-process broker.
//!
//! [`MemoryTransport`] fans every published payload out to the streams
//! currently open on the channel. It backs the test suite and lets a single
//! process use the bus without an external broker.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;

use super::{MessageStream, Transport, TransportError};

/// In-memory fan-out broker keyed by channel name.
#[derive(Default)]
pub struct MemoryTransport {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    channels: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
    closed: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of streams currently open on `channel`.
    ///
    /// Streams whose receiving side has been dropped are not counted.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock()
            .channels
            .get(channel)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// End every stream open on `channel`, as if the broker dropped them.
    ///
    /// Returns the number of streams that were closed.
    pub fn disconnect(&self, channel: &str) -> usize {
        let senders = self.lock().channels.remove(channel).unwrap_or_default();
        let count = senders.iter().filter(|tx| !tx.is_closed()).count();
        tracing::debug!(channel, count, "Disconnected channel");
        count
    }

    /// Whether [`Transport::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(TransportError::Closed);
        }

        let mut delivered = 0usize;
        if let Some(senders) = inner.channels.get_mut(channel) {
            senders.retain(|tx| tx.unbounded_send(payload.clone()).is_ok());
            delivered = senders.len();
            if senders.is_empty() {
                inner.channels.remove(channel);
            }
        }

        tracing::debug!(channel, delivered, "Published to memory transport");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, TransportError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(TransportError::Closed);
        }

        let (tx, rx) = mpsc::unbounded();
        inner.channels.entry(channel.to_string()).or_default().push(tx);
        Ok(rx.boxed())
    }

    async fn ping(&self) -> Result<(), TransportError> {
        if self.lock().closed {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.closed = true;
        inner.channels.clear();
        Ok(())
    }
}
