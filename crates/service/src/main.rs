//! `usernotify-service` -- watches users' session events on Redis.
//!
//! Connects to Redis, installs the global event bus, subscribes logging
//! handlers for every user listed in `WATCH_USERS`, and runs until SIGINT or
//! SIGTERM, then closes the bus and waits for every delivery loop to exit.
//!
//! # Environment variables
//!
//! | Variable                     | Required | Default | Description                     |
//! |------------------------------|----------|---------|---------------------------------|
//! | `REDIS_URL`                  | yes      | --      | e.g. `redis://localhost:6379/0` |
//! | `REDIS_PASSWORD`             | no       | --      | Overrides the URL password      |
//! | `REDIS_DB`                   | no       | `0`     | Database number                 |
//! | `REDIS_TIMEOUT_SECS`         | no       | `5`     | Connect and PING timeout        |
//! | `WATCH_USERS`                | no       | --      | Comma-separated entity keys     |
//! | `HEALTH_CHECK_INTERVAL_SECS` | no       | `30`    | Seconds between broker pings    |

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use usernotify_events::{EventBus, RedisTransport};
use usernotify_service::config::ServiceConfig;
use usernotify_service::{global, handlers, health};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "usernotify_service=info,usernotify_events=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServiceConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        db = config.redis.db,
        watch_users = config.watch_users.len(),
        "Loaded service configuration"
    );

    // --- Event bus ---
    let transport = RedisTransport::connect(&config.redis)
        .await
        .context("Failed to connect to redis")?;
    let bus = global::init(EventBus::new(Arc::new(transport)));

    handlers::watch_users(&bus, &config.watch_users)
        .await
        .context("Failed to subscribe watched users")?;

    // --- Health check ---
    let health_cancel = CancellationToken::new();
    let health_handle = tokio::spawn(health::run(
        Arc::clone(&bus),
        config.health_check_interval,
        health_cancel.clone(),
    ));

    tracing::info!("Service started");
    shutdown_signal().await;

    // --- Shutdown ---
    tracing::info!("Shutting down");

    health_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), health_handle).await;

    drop(bus);
    global::close().await.context("Failed to close event bus")?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
