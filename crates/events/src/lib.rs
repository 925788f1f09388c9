//! User notification bus.
//!
//! Turns a keyed publish/subscribe [`Transport`] into a typed,
//! lifecycle-managed event bus:
//!
//! - [`EventBus`] -- the façade: publish, subscribe (raw, typed, custom
//!   channel, batch), unsubscribe (single, by channel, all), list, close.
//! - [`Registry`] -- concurrent-safe store of subscriptions.
//! - [`Dispatcher`] -- one delivery loop per subscription, joined at close.
//! - [`transport`] -- the broker capability plus in-memory and Redis adapters.

pub mod bus;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod transport;

pub use bus::EventBus;
pub use dispatch::{Dispatcher, RawHandler};
pub use error::{BusError, BusResult};
pub use registry::{Registry, SubscriptionInfo};
pub use transport::{MemoryTransport, MessageStream, Transport, TransportError};
#[cfg(feature = "redis")]
pub use transport::{RedisConfig, RedisTransport};
