//! Redis pub/sub transport.
//!
//! Publishes and PINGs go over one multiplexed connection. Every
//! subscription gets its own pub/sub connection, which is closed when its
//! [`MessageStream`] is dropped.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, IntoConnectionInfo};
use usernotify_core::ConfigError;

use super::{MessageStream, Transport, TransportError};

/// Default database number.
const DEFAULT_DB: i64 = 0;

/// Default connect timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// RedisConfig
// ---------------------------------------------------------------------------

/// Connection settings for [`RedisTransport`].
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://localhost:6379/0`.
    pub url: String,
    /// Overrides the password embedded in the URL.
    pub password: Option<String>,
    /// Database number; overrides the one in the URL.
    pub db: i64,
    /// Upper bound on connecting and the initial PING.
    pub timeout: Duration,
}

impl RedisConfig {
    /// Settings for `url` with database 0, no password override and a 5 s
    /// timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            password: None,
            db: DEFAULT_DB,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Override the password embedded in the URL.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Select the database number.
    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// Bound connecting and the initial PING.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load settings from environment variables.
    ///
    /// | Variable             | Required | Default |
    /// |----------------------|----------|---------|
    /// | `REDIS_URL`          | yes      | --      |
    /// | `REDIS_PASSWORD`     | no       | --      |
    /// | `REDIS_DB`           | no       | `0`     |
    /// | `REDIS_TIMEOUT_SECS` | no       | `5`     |
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("REDIS_URL").map_err(|_| ConfigError::Missing("REDIS_URL"))?;
        let mut config = Self::new(url);

        if let Ok(password) = std::env::var("REDIS_PASSWORD") {
            if !password.is_empty() {
                config.password = Some(password);
            }
        }

        if let Ok(db) = std::env::var("REDIS_DB") {
            config.db = db.parse().map_err(|e| ConfigError::InvalidValue {
                name: "REDIS_DB",
                reason: format!("{e}"),
            })?;
        }

        if let Ok(secs) = std::env::var("REDIS_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|e| ConfigError::InvalidValue {
                name: "REDIS_TIMEOUT_SECS",
                reason: format!("{e}"),
            })?;
            config.timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// RedisTransport
// ---------------------------------------------------------------------------

/// [`Transport`] backed by a Redis server.
pub struct RedisTransport {
    client: redis::Client,
    /// `None` once closed.
    publisher: Mutex<Option<MultiplexedConnection>>,
    timeout: Duration,
}

impl RedisTransport {
    /// Connect and verify the server answers PING within the timeout.
    pub async fn connect(config: &RedisConfig) -> Result<Self, TransportError> {
        let mut info = config.url.as_str().into_connection_info()?;
        if let Some(password) = &config.password {
            info.redis.password = Some(password.clone());
        }
        info.redis.db = config.db;

        let client = redis::Client::open(info)?;
        let mut conn = tokio::time::timeout(
            config.timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| TransportError::Connection("timed out connecting to redis".into()))??;

        let pong: String = tokio::time::timeout(config.timeout, redis::cmd("PING").query_async(&mut conn))
            .await
            .map_err(|_| TransportError::Connection("timed out waiting for PING".into()))??;

        tracing::info!(db = config.db, reply = %pong, "Connected to redis");

        Ok(Self {
            client,
            publisher: Mutex::new(Some(conn)),
            timeout: config.timeout,
        })
    }

    fn publisher(&self) -> Result<MultiplexedConnection, TransportError> {
        self.publisher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), TransportError> {
        let mut conn = self.publisher()?;
        let receivers: i64 = conn.publish(channel, payload).await?;
        tracing::debug!(channel, receivers, "Published to redis");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, TransportError> {
        // Fail fast once closed instead of opening a fresh connection.
        self.publisher()?;

        let mut pubsub = tokio::time::timeout(self.timeout, self.client.get_async_pubsub())
            .await
            .map_err(|_| TransportError::Connection("timed out opening pub/sub".into()))??;
        pubsub.subscribe(channel).await?;

        let channel = channel.to_string();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let payload = match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "Dropping non-text redis message");
                    None
                }
            };
            futures::future::ready(payload)
        });

        Ok(stream.boxed())
    }

    async fn ping(&self) -> Result<(), TransportError> {
        let mut conn = self.publisher()?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.publisher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::info!("Redis transport closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = RedisConfig::new("redis://localhost:6379");
        assert_eq!(config.db, 0);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(config.password.is_none());
    }

    #[test]
    fn config_builders() {
        let config = RedisConfig::new("redis://localhost:6379")
            .with_password("secret")
            .with_db(3)
            .with_timeout(Duration::from_secs(1));
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.db, 3);
        assert_eq!(config.timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_before_connecting() {
        let config = RedisConfig::new("not a url");
        assert!(RedisTransport::connect(&config).await.is_err());
    }
}
