use usernotify_core::{CodecError, ConfigError};

use crate::transport::TransportError;

/// Errors surfaced by [`EventBus`](crate::EventBus) operations.
///
/// Decode failures and handler panics never show up here: they stay inside
/// the delivery loop and are only logged.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Bad kind, entity key, or channel supplied by the caller.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The event could not be serialized.
    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error("Failed to publish to {channel}: {source}")]
    Publish {
        channel: String,
        #[source]
        source: TransportError,
    },

    #[error("Failed to subscribe to {channel}: {source}")]
    Subscribe {
        channel: String,
        #[source]
        source: TransportError,
    },

    /// A connection-level call (ping, close) failed.
    #[error("Transport error: {0}")]
    Transport(#[source] TransportError),

    #[error("Subscription {0} not found")]
    NotFound(String),

    #[error("Subscription {0} is already inactive")]
    AlreadyInactive(String),

    #[error("No active subscriptions on channel {0}")]
    NoActiveSubscriptions(String),

    /// One entry of a batch subscribe failed; the whole batch was rolled back.
    #[error("Subscription for entity {entity_key:?} failed: {source}")]
    Batch {
        entity_key: String,
        #[source]
        source: Box<BusError>,
    },

    #[error("Event bus is closed")]
    Closed,
}

/// Convenience alias for bus return values.
pub type BusResult<T> = Result<T, BusError>;
