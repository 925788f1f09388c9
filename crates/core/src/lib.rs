//! Shared building blocks for the user notification bus.
//!
//! - [`channels`] -- mapping between event kinds, entity keys and transport
//!   channel names.
//! - [`events`] -- the event envelopes published on those channels.
//! - [`codec`] -- JSON (de)serialization of envelopes to transport payloads.
//! - [`error`] -- input validation errors.

pub mod channels;
pub mod codec;
pub mod error;
pub mod events;
pub mod types;

pub use channels::{channel_for, parse_entity_key, EventKind};
pub use codec::CodecError;
pub use error::ConfigError;
pub use events::{Envelope, KickOffEvent, KnownEvent, LoginEvent, LogoutEvent, UserEvent};
pub use types::Timestamp;
