//! Shared helpers for event bus integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use usernotify_events::{EventBus, MemoryTransport, MessageStream, Transport, TransportError};

/// How long a test waits for something that should happen.
pub const WAIT: Duration = Duration::from_secs(2);

/// How long a test waits to be confident something did *not* happen.
pub const QUIET: Duration = Duration::from_millis(100);

/// A [`MemoryTransport`] that can be told to fail specific operations.
#[derive(Default)]
pub struct FaultyTransport {
    pub inner: MemoryTransport,
    failing_channels: Mutex<HashSet<String>>,
    fail_publish: AtomicBool,
}

impl FaultyTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subscribe to `channel` fail.
    pub fn fail_subscribe_on(&self, channel: &str) {
        self.failing_channels
            .lock()
            .unwrap()
            .insert(channel.to_string());
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for FaultyTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), TransportError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::Broker("injected publish failure".into()));
        }
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, TransportError> {
        if self.failing_channels.lock().unwrap().contains(channel) {
            return Err(TransportError::Broker(format!(
                "injected subscribe failure on {channel}"
            )));
        }
        self.inner.subscribe(channel).await
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.inner.ping().await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.close().await
    }
}

/// Build a bus over a fresh in-memory transport.
pub fn memory_bus() -> (EventBus, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new());
    (EventBus::new(transport.clone()), transport)
}

/// A raw handler that forwards every payload into a channel.
pub fn recorder() -> (
    impl Fn(&str) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<String>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |payload: &str| {
        let _ = tx.send(payload.to_string());
    };
    (handler, rx)
}

/// Wait for the next recorded item, panicking after [`WAIT`].
pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a delivery")
        .expect("recorder channel closed")
}

/// Assert nothing arrives within [`QUIET`].
pub async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    if let Ok(Some(item)) = tokio::time::timeout(QUIET, rx.recv()).await {
        panic!("unexpected delivery: {item:?}");
    }
}

/// Poll `condition` until it holds, panicking after [`WAIT`].
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
