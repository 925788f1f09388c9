//! Concurrent store of subscriptions.
//!
//! [`Registry`] is the single source of truth for which subscriptions exist.
//! Every mutation happens under one short-lived mutex that is never held
//! across an `.await` or a handler call.
//!
//! An entry lives in the registry from subscribe time until its delivery loop
//! has fully exited. The loop then *retires* it: the entry is dropped from the
//! live map and its id is remembered, so a later unsubscribe can still tell
//! "already inactive" apart from "never existed".
//!
//! Retired ids are kept until [`Registry::close`], one short string per
//! subscription ever created, so memory grows with the total number of
//! subscriptions over the life of the bus, not with the number active.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Point-in-time view of one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub id: String,
    pub channel: String,
    /// Entity key parsed from the channel, if it has one.
    pub entity_key: Option<String>,
    pub active: bool,
}

/// Result of cancelling a single subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyInactive,
    NotFound,
}

/// Returned by [`Registry::add`] once [`Registry::close`] has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryClosed;

struct Entry {
    channel: String,
    entity_key: Option<String>,
    active: bool,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Inner {
    live: HashMap<String, Entry>,
    by_channel: HashMap<String, HashSet<String>>,
    retired: HashSet<String>,
    closed: bool,
}

impl Inner {
    /// Flip an active entry to inactive and fire its token.
    fn deactivate(entry: &mut Entry) -> bool {
        if !entry.active {
            return false;
        }
        entry.active = false;
        entry.cancel.cancel();
        true
    }
}

/// Subscription map keyed by id, indexed by channel.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    /// An empty, open registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active subscription.
    ///
    /// Fails once the registry is closed, so nothing can be registered after
    /// [`close`](Self::close) has cancelled everything.
    pub fn add(
        &self,
        id: &str,
        channel: &str,
        entity_key: Option<String>,
        cancel: CancellationToken,
    ) -> Result<(), RegistryClosed> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(RegistryClosed);
        }

        inner
            .by_channel
            .entry(channel.to_string())
            .or_default()
            .insert(id.to_string());
        inner.live.insert(
            id.to_string(),
            Entry {
                channel: channel.to_string(),
                entity_key,
                active: true,
                cancel,
            },
        );
        Ok(())
    }

    /// Deactivate one subscription and fire its cancellation token.
    ///
    /// Idempotent: only the first call on an id reports
    /// [`CancelOutcome::Cancelled`].
    pub fn mark_inactive_and_cancel(&self, id: &str) -> CancelOutcome {
        let mut guard = self.lock();
        let inner = &mut *guard;
        match inner.live.get_mut(id) {
            Some(entry) => {
                if Inner::deactivate(entry) {
                    CancelOutcome::Cancelled
                } else {
                    CancelOutcome::AlreadyInactive
                }
            }
            None if inner.retired.contains(id) => CancelOutcome::AlreadyInactive,
            None => CancelOutcome::NotFound,
        }
    }

    /// Deactivate every active subscription on `channel`.
    ///
    /// Returns how many were cancelled; zero means there was nothing to do.
    pub fn mark_inactive_and_cancel_by_channel(&self, channel: &str) -> usize {
        let mut guard = self.lock();
        let Inner {
            live, by_channel, ..
        } = &mut *guard;

        let Some(ids) = by_channel.get(channel) else {
            return 0;
        };
        let mut cancelled = 0;
        for id in ids {
            if let Some(entry) = live.get_mut(id) {
                if Inner::deactivate(entry) {
                    cancelled += 1;
                }
            }
        }
        cancelled
    }

    /// Deactivate every active subscription.
    pub fn cancel_all(&self) -> usize {
        self.lock()
            .live
            .values_mut()
            .map(Inner::deactivate)
            .filter(|cancelled| *cancelled)
            .count()
    }

    /// Mark a subscription inactive without firing its token.
    ///
    /// Used by a delivery loop whose stream ended on the broker side.
    /// Returns `false` if it was already inactive or unknown.
    pub fn mark_inactive(&self, id: &str) -> bool {
        match self.lock().live.get_mut(id) {
            Some(entry) if entry.active => {
                entry.active = false;
                true
            }
            _ => false,
        }
    }

    /// Drop a subscription whose delivery loop has exited.
    pub fn retire(&self, id: &str) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(entry) = inner.live.remove(id) else {
            return;
        };

        if let Some(ids) = inner.by_channel.get_mut(&entry.channel) {
            ids.remove(id);
            if ids.is_empty() {
                inner.by_channel.remove(&entry.channel);
            }
        }
        if !inner.closed {
            inner.retired.insert(id.to_string());
        }
    }

    /// Snapshot of every subscription whose loop has not exited yet.
    pub fn list(&self) -> Vec<SubscriptionInfo> {
        let inner = self.lock();
        let mut infos: Vec<SubscriptionInfo> = inner
            .live
            .iter()
            .map(|(id, entry)| SubscriptionInfo {
                id: id.clone(),
                channel: entry.channel.clone(),
                entity_key: entry.entity_key.clone(),
                active: entry.active,
            })
            .collect();
        infos.sort_by(|a, b| a.channel.cmp(&b.channel).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    /// Whether the id is known, live or retired.
    pub fn contains(&self, id: &str) -> bool {
        let inner = self.lock();
        inner.live.contains_key(id) || inner.retired.contains(id)
    }

    /// Refuse further additions, cancel everything, and forget retired ids.
    ///
    /// Returns the number of subscriptions cancelled.
    pub fn close(&self) -> usize {
        let mut inner = self.lock();
        inner.closed = true;
        inner.retired.clear();
        inner
            .live
            .values_mut()
            .map(Inner::deactivate)
            .filter(|cancelled| *cancelled)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
