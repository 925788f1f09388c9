//! Event bus façade.
//!
//! [`EventBus`] composes channel naming, the envelope codec, the
//! [`Registry`] and the [`Dispatcher`] on top of one [`Transport`]
//! connection. It is meant to be created once per connection and shared via
//! `Arc<EventBus>`.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use usernotify_core::LoginEvent;
//! use usernotify_events::{EventBus, MemoryTransport};
//!
//! # async fn demo() -> usernotify_events::BusResult<()> {
//! let bus = EventBus::new(Arc::new(MemoryTransport::new()));
//!
//! let id = bus
//!     .subscribe_event("u1", |event: LoginEvent| {
//!         tracing::info!(ip = %event.client_ip, "Login");
//!     })
//!     .await?;
//!
//! bus.publish_login("u1", "web", "10.0.0.1", "Mozilla/5.0").await?;
//! bus.unsubscribe(&id)?;
//! bus.close().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use usernotify_core::channels::{self, channel_for, parse_entity_key, EventKind};
use usernotify_core::codec;
use usernotify_core::events::{
    Envelope, KickOffEvent, KnownEvent, LoginEvent, LogoutEvent, UserEvent,
};
use usernotify_core::types::Extra;
use usernotify_core::ConfigError;

use crate::dispatch::{Dispatcher, RawHandler};
use crate::error::{BusError, BusResult};
use crate::registry::{CancelOutcome, Registry, SubscriptionInfo};
use crate::transport::Transport;

/// Typed, lifecycle-managed publish/subscribe over one transport connection.
pub struct EventBus {
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    /// Held shared by publish/subscribe for the length of their transport
    /// I/O and exclusively by [`close`](Self::close), so close never races a
    /// half-finished subscribe.
    gate: RwLock<()>,
    closed: AtomicBool,
}

impl EventBus {
    /// Create a bus over `transport`. No I/O happens until the first publish
    /// or subscribe.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        debug_assert!(
            channels::prefixes_are_disjoint(),
            "known channel prefixes must not overlap"
        );

        let registry = Arc::new(Registry::new());
        Self {
            transport,
            dispatcher: Dispatcher::new(Arc::clone(&registry)),
            registry,
            gate: RwLock::new(()),
            closed: AtomicBool::new(false),
        }
    }

    // ---- publishing ----

    /// Publish an event for `entity_key` on the channel of `kind`.
    ///
    /// The envelope's entity key and timestamp are set here, at publish time.
    /// An envelope whose `event_type` does not match `kind` is rejected.
    /// Transport failures are returned as [`BusError::Publish`] and not
    /// retried.
    pub async fn publish<E: Envelope>(
        &self,
        kind: &EventKind,
        entity_key: &str,
        mut event: E,
    ) -> BusResult<()> {
        self.ensure_open()?;
        let channel = channel_for(kind, entity_key)?;
        let kind = kind.normalized()?;
        if event.event_type() != kind.event_type() {
            return Err(ConfigError::KindMismatch {
                expected: kind.event_type().to_string(),
                found: event.event_type().to_string(),
            }
            .into());
        }
        event.stamp(entity_key, Utc::now());
        let payload = codec::encode(&event)?;

        let _gate = self.gate.read().await;
        self.ensure_open()?;

        if let Err(source) = self.transport.publish(&channel, payload).await {
            tracing::error!(channel = %channel, error = %source, "Failed to publish event");
            return Err(BusError::Publish { channel, source });
        }

        tracing::debug!(channel = %channel, event_type = event.event_type(), "Published event");
        Ok(())
    }

    /// Publish one of the known event structs on its own channel.
    pub async fn publish_event<E: KnownEvent>(&self, entity_key: &str, event: E) -> BusResult<()> {
        self.publish(&E::KIND, entity_key, event).await
    }

    /// Publish a kick-off event. A missing or empty reason falls back to the
    /// default text.
    pub async fn publish_kick_off(
        &self,
        entity_key: &str,
        platform_code: &str,
        reason: Option<&str>,
    ) -> BusResult<()> {
        let event = KickOffEvent::new(entity_key, platform_code, reason);
        self.publish_event(entity_key, event).await
    }

    /// Publish a login event carrying the client's address and user agent.
    pub async fn publish_login(
        &self,
        entity_key: &str,
        platform_code: &str,
        client_ip: &str,
        user_agent: &str,
    ) -> BusResult<()> {
        let event = LoginEvent::new(entity_key, platform_code, client_ip, user_agent);
        self.publish_event(entity_key, event).await
    }

    /// Publish a logout event with the session length in seconds.
    pub async fn publish_logout(
        &self,
        entity_key: &str,
        platform_code: &str,
        duration_secs: i64,
    ) -> BusResult<()> {
        let event = LogoutEvent::new(entity_key, platform_code, duration_secs);
        self.publish_event(entity_key, event).await
    }

    /// Publish a [`UserEvent`] of an arbitrary kind.
    ///
    /// Known kind names are routed to their reserved channel.
    pub async fn publish_custom(
        &self,
        entity_key: &str,
        event_type: &str,
        platform_code: &str,
        message: &str,
        extra: Extra,
    ) -> BusResult<()> {
        self.ensure_open()?;
        let kind = EventKind::custom(event_type)?;
        let event = UserEvent::new(entity_key, &kind, platform_code, message).with_extra(extra);
        self.publish(&kind, entity_key, event).await
    }

    // ---- subscribing ----

    /// Subscribe a raw handler to `kind` events for `entity_key`.
    ///
    /// Returns the new subscription id. Every call allocates a fresh id, so
    /// independent subscriptions can share a channel.
    pub async fn subscribe<F>(&self, kind: &EventKind, entity_key: &str, handler: F) -> BusResult<String>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let channel = channel_for(kind, entity_key)?;
        self.subscribe_channel(channel, Arc::new(handler)).await
    }

    /// Subscribe a handler that receives decoded events.
    ///
    /// Payloads that do not decode as `E` are logged and dropped; the
    /// subscription keeps running.
    pub async fn subscribe_typed<E, F>(
        &self,
        kind: &EventKind,
        entity_key: &str,
        handler: F,
    ) -> BusResult<String>
    where
        E: DeserializeOwned + 'static,
        F: Fn(E) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let channel = channel_for(kind, entity_key)?;
        let handler = typed_handler(channel.clone(), handler);
        self.subscribe_channel(channel, handler).await
    }

    /// Typed subscription to one of the known event structs.
    pub async fn subscribe_event<E, F>(&self, entity_key: &str, handler: F) -> BusResult<String>
    where
        E: KnownEvent,
        F: Fn(E) + Send + Sync + 'static,
    {
        self.subscribe_typed(&E::KIND, entity_key, handler).await
    }

    /// Subscribe a raw handler to an arbitrary channel name.
    pub async fn subscribe_custom_channel<F>(&self, channel: &str, handler: F) -> BusResult<String>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        channels::validate_channel(channel)?;
        self.subscribe_channel(channel.to_string(), Arc::new(handler)).await
    }

    /// Subscribe one shared handler to `kind` events for several entities.
    ///
    /// All or nothing: if any subscribe fails, the ones already created by
    /// this call are cancelled before the error is returned.
    pub async fn subscribe_multiple<S, F>(
        &self,
        kind: &EventKind,
        entity_keys: &[S],
        handler: F,
    ) -> BusResult<Vec<String>>
    where
        S: AsRef<str>,
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let handler: RawHandler = Arc::new(handler);
        let mut ids = Vec::with_capacity(entity_keys.len());

        for entity_key in entity_keys {
            let entity_key: &str = entity_key.as_ref();
            let result = match channel_for(kind, entity_key) {
                Ok(channel) => self.subscribe_channel(channel, Arc::clone(&handler)).await,
                Err(e) => Err(e.into()),
            };

            match result {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in &ids {
                        self.registry.mark_inactive_and_cancel(id);
                    }
                    tracing::warn!(
                        entity_key,
                        rolled_back = ids.len(),
                        error = %e,
                        "Batch subscribe failed, rolled back"
                    );
                    return Err(BusError::Batch {
                        entity_key: entity_key.to_string(),
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(ids)
    }

    /// Open the stream, register, then spawn. A failure at any step leaves
    /// nothing behind: the stream is dropped before anything is recorded.
    async fn subscribe_channel(&self, channel: String, handler: RawHandler) -> BusResult<String> {
        let _gate = self.gate.read().await;
        self.ensure_open()?;

        let stream = match self.transport.subscribe(&channel).await {
            Ok(stream) => stream,
            Err(source) => {
                tracing::error!(channel = %channel, error = %source, "Failed to open subscription");
                return Err(BusError::Subscribe { channel, source });
            }
        };

        let id = uuid::Uuid::new_v4().to_string();
        let entity_key = parse_entity_key(&channel).map(str::to_string);
        let cancel = self.dispatcher.subscription_token();

        if self
            .registry
            .add(&id, &channel, entity_key.clone(), cancel.clone())
            .is_err()
        {
            return Err(BusError::Closed);
        }
        self.dispatcher
            .spawn(id.clone(), channel.clone(), stream, handler, cancel);

        tracing::info!(
            subscription_id = %id,
            channel = %channel,
            entity_key = entity_key.as_deref().unwrap_or(""),
            "Subscribed"
        );
        Ok(id)
    }

    // ---- cancelling ----

    /// Cancel one subscription.
    ///
    /// Returns immediately; the delivery loop stops on its next wake-up and
    /// never invokes the handler again.
    pub fn unsubscribe(&self, id: &str) -> BusResult<()> {
        self.ensure_open()?;
        match self.registry.mark_inactive_and_cancel(id) {
            CancelOutcome::Cancelled => {
                tracing::info!(subscription_id = id, "Unsubscribed");
                Ok(())
            }
            CancelOutcome::AlreadyInactive => Err(BusError::AlreadyInactive(id.to_string())),
            CancelOutcome::NotFound => Err(BusError::NotFound(id.to_string())),
        }
    }

    /// Cancel every active subscription on `channel` and return how many.
    pub fn unsubscribe_by_channel(&self, channel: &str) -> BusResult<usize> {
        self.ensure_open()?;
        match self.registry.mark_inactive_and_cancel_by_channel(channel) {
            0 => Err(BusError::NoActiveSubscriptions(channel.to_string())),
            count => {
                tracing::info!(channel, count, "Unsubscribed channel");
                Ok(count)
            }
        }
    }

    /// Cancel every active subscription. Zero is not an error.
    pub fn unsubscribe_all(&self) -> BusResult<usize> {
        self.ensure_open()?;
        let count = self.registry.cancel_all();
        tracing::info!(count, "Unsubscribed all");
        Ok(count)
    }

    // ---- inspection ----

    /// Snapshot of the active subscriptions, sorted by channel then id.
    pub fn list_active(&self) -> BusResult<Vec<SubscriptionInfo>> {
        self.ensure_open()?;
        let mut infos = self.registry.list();
        infos.retain(|info| info.active);
        Ok(infos)
    }

    /// Number of delivery loops still running, including cancelled ones that
    /// have not finished tearing down.
    pub fn running_loops(&self) -> usize {
        self.dispatcher.running()
    }

    /// Check that the bus is open and the broker answers.
    pub async fn ping(&self) -> BusResult<()> {
        self.ensure_open()?;
        self.transport.ping().await.map_err(BusError::Transport)
    }

    /// `true` while the bus is open and the broker answers a ping.
    pub async fn is_connected(&self) -> bool {
        self.ping().await.is_ok()
    }

    /// `true` once [`close`](Self::close) has started.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ---- lifecycle ----

    /// Cancel every subscription, wait for all delivery loops to exit, then
    /// close the transport.
    ///
    /// Once this returns no handler runs again. Calling it again is a no-op.
    pub async fn close(&self) -> BusResult<()> {
        let _gate = self.gate.write().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let cancelled = self.registry.close();
        self.dispatcher.shutdown().await;
        tracing::info!(cancelled, "All delivery loops stopped");

        self.transport.close().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to close transport");
            BusError::Transport(e)
        })?;

        tracing::info!("Event bus closed");
        Ok(())
    }

    fn ensure_open(&self) -> BusResult<()> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        Ok(())
    }
}

/// Adapt a typed handler to a raw one by decoding each payload first.
fn typed_handler<E, F>(channel: String, handler: F) -> RawHandler
where
    E: DeserializeOwned + 'static,
    F: Fn(E) + Send + Sync + 'static,
{
    Arc::new(move |payload: &str| match codec::decode::<E>(payload) {
        Ok(event) => handler(event),
        Err(e) => {
            tracing::warn!(channel = %channel, error = %e, "Dropping malformed payload");
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
