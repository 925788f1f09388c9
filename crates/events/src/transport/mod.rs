//! Keyed publish/subscribe transport capability.
//!
//! The bus only needs two things from a broker: publish a payload to a
//! channel, and open a stream of payloads for a channel. Dropping a
//! [`MessageStream`] closes the underlying subscription.

use async_trait::async_trait;
use futures::stream::BoxStream;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryTransport;
#[cfg(feature = "redis")]
pub use self::redis::{RedisConfig, RedisTransport};

/// Payloads received on one channel, in broker order.
///
/// The stream ends when the broker closes the subscription.
pub type MessageStream = BoxStream<'static, String>;

/// Error type for broker operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The broker could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The transport was closed locally.
    #[error("Transport is closed")]
    Closed,

    /// The broker rejected or failed the command.
    #[error("Broker error: {0}")]
    Broker(String),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// A broker connection shared by every publish and subscription of a bus.
///
/// Implementations must be safe for concurrent use: the bus issues publishes
/// and opens streams from many tasks at once over one instance.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Publish a payload to a channel.
    async fn publish(&self, channel: &str, payload: String) -> Result<(), TransportError>;

    /// Open a stream of payloads published to `channel` from now on.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, TransportError>;

    /// Check that the broker is reachable.
    async fn ping(&self) -> Result<(), TransportError>;

    /// Release the connection. Streams still open may end.
    async fn close(&self) -> Result<(), TransportError>;
}
