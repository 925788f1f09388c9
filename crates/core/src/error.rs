/// Invalid input detected before any transport I/O happens.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid event kind {0:?}: must be non-empty and must not contain ':'")]
    InvalidKind(String),

    #[error("Entity key must not be empty")]
    EmptyEntityKey,

    #[error("Event type {found:?} cannot be published as {expected:?}")]
    KindMismatch { expected: String, found: String },

    #[error("Invalid channel {0:?}")]
    InvalidChannel(String),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}
