use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use usernotify_events::EventBus;

/// Ping the broker every `interval` until `cancel` fires.
///
/// Only state changes are logged: the first failed ping after a healthy one
/// and the first success after a failure.
pub async fn run(bus: Arc<EventBus>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    let mut healthy = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Health check cancelled");
                break;
            }
            _ = ticker.tick() => {
                match bus.ping().await {
                    Ok(()) if !healthy => {
                        tracing::info!("Broker reachable again");
                        healthy = true;
                    }
                    Ok(()) => {}
                    Err(e) if healthy => {
                        tracing::error!(error = %e, "Broker health check failed");
                        healthy = false;
                    }
                    Err(_) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use usernotify_events::MemoryTransport;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stops_when_cancelled() {
        let bus = Arc::new(EventBus::new(Arc::new(MemoryTransport::new())));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(Arc::clone(&bus), Duration::from_secs(1), cancel.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("health check should stop")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn survives_a_closed_bus() {
        let bus = Arc::new(EventBus::new(Arc::new(MemoryTransport::new())));
        bus.close().await.unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(Arc::clone(&bus), Duration::from_secs(1), cancel.clone()));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!handle.is_finished());
        cancel.cancel();
        handle.await.unwrap();
    }
}
