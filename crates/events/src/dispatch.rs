//! Per-subscription delivery loops.
//!
//! [`Dispatcher`] runs exactly one task per subscription. Each task waits on
//! either the next payload from its [`MessageStream`] or its cancellation
//! token, and invokes the handler synchronously, so deliveries for one
//! subscription never overlap and stay in broker order. Tasks are tracked so
//! that [`Dispatcher::shutdown`] can wait for all of them to finish.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::registry::Registry;
use crate::transport::MessageStream;

/// Handler invoked with each raw payload received on a subscription.
///
/// Runs on the delivery task; long-running work should be handed off to
/// another task. A panic is caught, logged, and the message dropped.
pub type RawHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Why a delivery loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The subscription's token was cancelled.
    Cancelled,
    /// The broker ended the stream.
    StreamClosed,
}

/// Spawns and joins delivery loops.
pub struct Dispatcher {
    registry: Arc<Registry>,
    tasks: TaskTracker,
    /// Parent of every subscription token.
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// A fresh token for one subscription, cancelled at shutdown at the latest.
    pub fn subscription_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Start the delivery loop for a registered subscription.
    ///
    /// The loop owns `stream` and drops it on exit, which closes the broker
    /// subscription, then retires the registry entry.
    pub fn spawn(
        &self,
        id: String,
        channel: String,
        stream: MessageStream,
        handler: RawHandler,
        cancel: CancellationToken,
    ) {
        let registry = Arc::clone(&self.registry);
        self.tasks.spawn(async move {
            tracing::info!(subscription_id = %id, channel = %channel, "Delivery loop started");

            let exit = deliver(&id, &channel, stream, &handler, &cancel).await;

            if exit == LoopExit::StreamClosed && registry.mark_inactive(&id) {
                tracing::warn!(
                    subscription_id = %id,
                    channel = %channel,
                    "Stream closed by broker, subscription deactivated"
                );
            }
            registry.retire(&id);

            tracing::info!(subscription_id = %id, channel = %channel, ?exit, "Delivery loop stopped");
        });
    }

    /// Number of delivery loops that have not finished yet.
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Cancel every loop and wait until all of them have exited.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Pump `stream` into `handler` until cancelled or the stream ends.
///
/// Cancellation is checked first on every wake-up, so nothing is delivered
/// once the token has fired, even if a payload is already buffered.
async fn deliver(
    id: &str,
    channel: &str,
    mut stream: MessageStream,
    handler: &RawHandler,
    cancel: &CancellationToken,
) -> LoopExit {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return LoopExit::Cancelled,
            next = stream.next() => match next {
                Some(payload) => invoke(handler, id, channel, &payload),
                None => return LoopExit::StreamClosed,
            },
        }
    }
}

fn invoke(handler: &RawHandler, id: &str, channel: &str, payload: &str) {
    tracing::debug!(subscription_id = id, channel, "Message received");

    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(payload))) {
        tracing::error!(
            subscription_id = id,
            channel,
            panic = panic_message(panic.as_ref()),
            "Handler panicked, message dropped"
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::channel::mpsc;

    use super::*;

    fn counting_handler() -> (RawHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let handler: RawHandler = Arc::new(move |_payload: &str| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (handler, count)
    }

    #[tokio::test]
    async fn delivers_in_order_until_stream_ends() {
        let (tx, rx) = mpsc::unbounded::<String>();
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let handler: RawHandler = Arc::new(move |payload: &str| {
            sink.lock().unwrap().push(payload.to_string());
        });

        for i in 0..5 {
            tx.unbounded_send(i.to_string()).unwrap();
        }
        drop(tx);

        let exit = deliver("s1", "c", rx.boxed(), &handler, &CancellationToken::new()).await;

        assert_eq!(exit, LoopExit::StreamClosed);
        assert_eq!(*received.lock().unwrap(), vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn cancelled_token_wins_over_buffered_messages() {
        let (tx, rx) = mpsc::unbounded::<String>();
        tx.unbounded_send("late".into()).unwrap();
        let (handler, count) = counting_handler();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let exit = deliver("s1", "c", rx.boxed(), &handler, &cancel).await;

        assert_eq!(exit, LoopExit::Cancelled);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_panic_does_not_stop_the_loop() {
        let (tx, rx) = mpsc::unbounded::<String>();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let handler: RawHandler = Arc::new(move |payload: &str| {
            if payload == "boom" {
                panic!("handler exploded");
            }
            seen.fetch_add(1, Ordering::SeqCst);
        });

        tx.unbounded_send("boom".into()).unwrap();
        tx.unbounded_send("ok".into()).unwrap();
        drop(tx);

        let exit = deliver("s1", "c", rx.boxed(), &handler, &CancellationToken::new()).await;

        assert_eq!(exit, LoopExit::StreamClosed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_joins_spawned_loops() {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        let mut senders = Vec::new();

        for i in 0..3 {
            let (tx, rx) = mpsc::unbounded::<String>();
            senders.push(tx);
            let id = format!("s{i}");
            let token = dispatcher.subscription_token();
            registry.add(&id, "c", None, token.clone()).unwrap();
            let (handler, _) = counting_handler();
            dispatcher.spawn(id, "c".into(), rx.boxed(), handler, token);
        }
        assert_eq!(dispatcher.running(), 3);

        tokio::time::timeout(Duration::from_secs(1), dispatcher.shutdown())
            .await
            .expect("shutdown should not hang");

        assert_eq!(dispatcher.running(), 0);
        assert!(registry.list().is_empty());
        assert!(senders.iter().all(|tx| tx.is_closed()));
    }

    #[tokio::test]
    async fn broker_closure_deactivates_and_retires() {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        let (tx, rx) = mpsc::unbounded::<String>();
        let token = dispatcher.subscription_token();
        registry.add("s1", "c", None, token.clone()).unwrap();
        let (handler, _) = counting_handler();
        dispatcher.spawn("s1".into(), "c".into(), rx.boxed(), handler, token.clone());

        drop(tx);
        dispatcher.tasks.close();
        tokio::time::timeout(Duration::from_secs(1), dispatcher.tasks.wait())
            .await
            .expect("loop should exit when the stream ends");

        assert!(!token.is_cancelled());
        assert!(registry.list().is_empty());
        assert!(registry.contains("s1"));
    }

    #[test]
    fn panic_message_extracts_strings() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");

        let boxed: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
