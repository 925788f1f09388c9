//! Process-wide [`EventBus`] accessor.
//!
//! Library code should take an `Arc<EventBus>` explicitly. This module exists
//! for the binary and for call sites that cannot thread one through; it holds
//! at most one bus at a time.

use std::sync::{Arc, PoisonError, RwLock};

use usernotify_events::{BusError, BusResult, EventBus};

static GLOBAL: RwLock<Option<Arc<EventBus>>> = RwLock::new(None);

/// Install `bus` as the process-wide bus.
///
/// If a bus is already installed it is kept and returned, and `bus` is
/// dropped unused.
pub fn init(bus: EventBus) -> Arc<EventBus> {
    let mut slot = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = slot.as_ref() {
        tracing::warn!("Global event bus already initialized, keeping the existing one");
        return Arc::clone(existing);
    }

    let bus = Arc::new(bus);
    *slot = Some(Arc::clone(&bus));
    tracing::info!("Global event bus initialized");
    bus
}

/// The installed bus, or `None` before [`init`] and after [`close`].
pub fn get() -> Option<Arc<EventBus>> {
    GLOBAL
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

pub fn is_initialized() -> bool {
    GLOBAL
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some()
}

/// Uninstall and close the global bus. A no-op when none is installed.
///
/// After this returns [`init`] may install a new bus.
pub async fn close() -> BusResult<()> {
    let bus = GLOBAL
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();

    match bus {
        Some(bus) => {
            bus.close().await?;
            tracing::info!("Global event bus closed");
            Ok(())
        }
        None => Ok(()),
    }
}

/// The installed bus, or [`BusError::Closed`] when there is none.
pub fn require() -> BusResult<Arc<EventBus>> {
    get().ok_or(BusError::Closed)
}

// ---------------------------------------------------------------------------
// Convenience publishers
// ---------------------------------------------------------------------------

pub async fn publish_kick_off(
    entity_key: &str,
    platform_code: &str,
    reason: Option<&str>,
) -> BusResult<()> {
    require()?
        .publish_kick_off(entity_key, platform_code, reason)
        .await
}

pub async fn publish_login(
    entity_key: &str,
    platform_code: &str,
    client_ip: &str,
    user_agent: &str,
) -> BusResult<()> {
    require()?
        .publish_login(entity_key, platform_code, client_ip, user_agent)
        .await
}

pub async fn publish_logout(
    entity_key: &str,
    platform_code: &str,
    duration_secs: i64,
) -> BusResult<()> {
    require()?
        .publish_logout(entity_key, platform_code, duration_secs)
        .await
}
