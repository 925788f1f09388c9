//! Handlers the service attaches to watched users.
//!
//! They only log; the service is a reference consumer of the bus.

use usernotify_core::events::{KickOffEvent, LoginEvent, LogoutEvent};
use usernotify_events::{BusResult, EventBus};

pub fn on_kick_off(event: KickOffEvent) {
    tracing::warn!(
        entity_key = %event.entity_key,
        platform_code = %event.platform_code,
        reason = %event.reason,
        "User kicked off"
    );
}

pub fn on_login(event: LoginEvent) {
    tracing::info!(
        entity_key = %event.entity_key,
        platform_code = %event.platform_code,
        client_ip = %event.client_ip,
        "User logged in"
    );
}

pub fn on_logout(event: LogoutEvent) {
    tracing::info!(
        entity_key = %event.entity_key,
        platform_code = %event.platform_code,
        duration_secs = event.duration,
        "User logged out"
    );
}

/// Subscribe the logging handlers to every known event kind for each user.
///
/// Returns the subscription ids. On failure the subscriptions created so far
/// are cancelled before the error is returned.
pub async fn watch_users(bus: &EventBus, users: &[String]) -> BusResult<Vec<String>> {
    let mut ids = Vec::with_capacity(users.len() * 3);

    for user in users {
        if let Err(e) = watch_user(bus, user, &mut ids).await {
            for id in &ids {
                if let Err(unsub) = bus.unsubscribe(id) {
                    tracing::debug!(subscription_id = %id, error = %unsub, "Rollback unsubscribe failed");
                }
            }
            tracing::error!(entity_key = %user, error = %e, "Failed to watch user");
            return Err(e);
        }
    }

    tracing::info!(users = users.len(), subscriptions = ids.len(), "Watching users");
    Ok(ids)
}

async fn watch_user(bus: &EventBus, user: &str, ids: &mut Vec<String>) -> BusResult<()> {
    ids.push(bus.subscribe_event(user, on_kick_off).await?);
    ids.push(bus.subscribe_event(user, on_login).await?);
    ids.push(bus.subscribe_event(user, on_logout).await?);
    Ok(())
}
