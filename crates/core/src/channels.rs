//! Transport channel naming for user events.
//!
//! Every known event kind owns a fixed channel prefix followed by the entity
//! key verbatim, e.g. `user:kickoff:<open_id>`. Custom kinds share the generic
//! scheme `user:<kind>:<entity_key>`.
//!
//! The known prefixes must be mutually non-overlapping so that
//! [`parse_entity_key`] is unambiguous; [`prefixes_are_disjoint`] checks this
//! and the bus asserts it at construction in debug builds.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Channel prefix for "user was kicked off" notifications.
pub const CHANNEL_KICK_OFF_PREFIX: &str = "user:kickoff:";

/// Channel prefix for login notifications.
pub const CHANNEL_LOGIN_PREFIX: &str = "user:login:";

/// Channel prefix for logout notifications.
pub const CHANNEL_LOGOUT_PREFIX: &str = "user:logout:";

/// All reserved prefixes, in lookup order.
pub const KNOWN_PREFIXES: [&str; 3] = [
    CHANNEL_KICK_OFF_PREFIX,
    CHANNEL_LOGIN_PREFIX,
    CHANNEL_LOGOUT_PREFIX,
];

/// Namespace shared by every user channel, known or custom.
const CHANNEL_NAMESPACE: &str = "user";

/// Event type carried in the `event_type` field of a kick-off envelope.
pub const EVENT_TYPE_KICK_OFF: &str = "kick_off";

/// Event type of a login envelope.
pub const EVENT_TYPE_LOGIN: &str = "login";

/// Event type of a logout envelope.
pub const EVENT_TYPE_LOGOUT: &str = "logout";

/// Forced-offline notification. Has no reserved prefix and is routed through
/// the generic `user:force_offline:<key>` scheme.
pub const EVENT_TYPE_FORCE_OFFLINE: &str = "force_offline";

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// The kind of a user event, which determines its channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    KickOff,
    Login,
    Logout,
    /// Any other kind. Build through [`EventKind::custom`] so that names of
    /// known kinds are normalised and invalid names are rejected.
    Custom(String),
}

impl EventKind {
    /// Parse a caller-supplied kind name.
    ///
    /// Names of the known kinds (`kickoff`, `kick_off`, `login`, `logout`)
    /// map to their dedicated variant, so a custom kind can never produce a
    /// channel under a reserved prefix.
    pub fn custom(name: &str) -> Result<Self, ConfigError> {
        match name {
            "kickoff" | EVENT_TYPE_KICK_OFF => Ok(Self::KickOff),
            EVENT_TYPE_LOGIN => Ok(Self::Login),
            EVENT_TYPE_LOGOUT => Ok(Self::Logout),
            _ if name.is_empty() || name.contains(':') || name.chars().any(char::is_whitespace) => {
                Err(ConfigError::InvalidKind(name.to_string()))
            }
            _ => Ok(Self::Custom(name.to_string())),
        }
    }

    /// The value written to the envelope's `event_type` field.
    pub fn event_type(&self) -> &str {
        match self {
            Self::KickOff => EVENT_TYPE_KICK_OFF,
            Self::Login => EVENT_TYPE_LOGIN,
            Self::Logout => EVENT_TYPE_LOGOUT,
            Self::Custom(name) => name,
        }
    }

    /// Reserved channel prefix, `None` for custom kinds.
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            Self::KickOff => Some(CHANNEL_KICK_OFF_PREFIX),
            Self::Login => Some(CHANNEL_LOGIN_PREFIX),
            Self::Logout => Some(CHANNEL_LOGOUT_PREFIX),
            Self::Custom(_) => None,
        }
    }

    /// Whether this kind belongs to the closed set of known kinds.
    pub fn is_known(&self) -> bool {
        self.prefix().is_some()
    }

    /// Re-validate a possibly hand-built `Custom` variant, mapping names of
    /// known kinds to their dedicated variant.
    pub fn normalized(&self) -> Result<Self, ConfigError> {
        match self {
            Self::Custom(name) => Self::custom(name),
            known => Ok(known.clone()),
        }
    }

    fn known() -> [Self; 3] {
        [Self::KickOff, Self::Login, Self::Logout]
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_type())
    }
}

impl FromStr for EventKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::custom(s)
    }
}

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

/// Derive the transport channel for an event kind and entity key.
///
/// The entity key is appended verbatim and must not be empty.
pub fn channel_for(kind: &EventKind, entity_key: &str) -> Result<String, ConfigError> {
    if entity_key.is_empty() {
        return Err(ConfigError::EmptyEntityKey);
    }

    let kind = kind.normalized()?;
    Ok(match kind.prefix() {
        Some(prefix) => format!("{prefix}{entity_key}"),
        None => format!("{CHANNEL_NAMESPACE}:{}:{entity_key}", kind.event_type()),
    })
}

/// Split a channel under a reserved prefix into its kind and entity key.
///
/// Returns `None` for custom channels and for a bare prefix with no key.
pub fn parse_known(channel: &str) -> Option<(EventKind, &str)> {
    EventKind::known().into_iter().find_map(|kind| {
        let key = channel.strip_prefix(kind.prefix()?)?;
        (!key.is_empty()).then_some((kind, key))
    })
}

/// Extract the entity key from a channel under a reserved prefix.
pub fn parse_entity_key(channel: &str) -> Option<&str> {
    parse_known(channel).map(|(_, key)| key)
}

/// Check a caller-supplied channel name before subscribing to it directly.
pub fn validate_channel(channel: &str) -> Result<(), ConfigError> {
    if channel.is_empty() || channel.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ConfigError::InvalidChannel(channel.to_string()));
    }
    Ok(())
}

/// `true` when no known prefix is a prefix of another one.
pub fn prefixes_are_disjoint() -> bool {
    KNOWN_PREFIXES.iter().enumerate().all(|(i, a)| {
        KNOWN_PREFIXES
            .iter()
            .enumerate()
            .all(|(j, b)| i == j || !b.starts_with(a))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_kinds_use_reserved_prefixes() {
        assert_eq!(
            channel_for(&EventKind::KickOff, "u1").unwrap(),
            "user:kickoff:u1"
        );
        assert_eq!(channel_for(&EventKind::Login, "u1").unwrap(), "user:login:u1");
        assert_eq!(
            channel_for(&EventKind::Logout, "u1").unwrap(),
            "user:logout:u1"
        );
    }

    #[test]
    fn custom_kind_uses_generic_scheme() {
        let kind = EventKind::custom(EVENT_TYPE_FORCE_OFFLINE).unwrap();
        assert_eq!(
            channel_for(&kind, "u1").unwrap(),
            "user:force_offline:u1"
        );
    }

    #[test]
    fn entity_key_is_appended_verbatim() {
        assert_eq!(
            channel_for(&EventKind::Login, "tenant:42").unwrap(),
            "user:login:tenant:42"
        );
    }

    #[test]
    fn empty_entity_key_is_rejected() {
        assert_eq!(
            channel_for(&EventKind::Login, ""),
            Err(ConfigError::EmptyEntityKey)
        );
    }

    #[test]
    fn known_names_normalise_to_known_kinds() {
        assert_eq!(EventKind::custom("kickoff").unwrap(), EventKind::KickOff);
        assert_eq!(EventKind::custom("kick_off").unwrap(), EventKind::KickOff);
        assert_eq!("login".parse::<EventKind>().unwrap(), EventKind::Login);
        assert_eq!(EventKind::custom("logout").unwrap(), EventKind::Logout);
    }

    #[test]
    fn invalid_custom_kinds_are_rejected() {
        for bad in ["", "a:b", "has space"] {
            assert_eq!(
                EventKind::custom(bad),
                Err(ConfigError::InvalidKind(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn hand_built_custom_kind_cannot_shadow_reserved_prefix() {
        let sneaky = EventKind::Custom("login".into());
        assert_eq!(channel_for(&sneaky, "u1").unwrap(), "user:login:u1");

        let broken = EventKind::Custom("x:y".into());
        assert!(channel_for(&broken, "u1").is_err());
        assert_eq!(
            EventKind::Custom("kickoff".into()).normalized(),
            Ok(EventKind::KickOff)
        );
    }

    #[test]
    fn parse_entity_key_for_known_prefixes() {
        assert_eq!(parse_entity_key("user:kickoff:abc"), Some("abc"));
        assert_eq!(parse_entity_key("user:login:abc"), Some("abc"));
        assert_eq!(parse_entity_key("user:logout:a:b"), Some("a:b"));
    }

    #[test]
    fn parse_known_returns_kind() {
        assert_eq!(
            parse_known("user:logout:u9"),
            Some((EventKind::Logout, "u9"))
        );
    }

    #[test]
    fn parse_entity_key_rejects_unknown_channels() {
        assert_eq!(parse_entity_key("user:force_offline:abc"), None);
        assert_eq!(parse_entity_key("orders:created"), None);
        assert_eq!(parse_entity_key("user:login:"), None);
        assert_eq!(parse_entity_key(""), None);
    }

    #[test]
    fn channel_for_and_parse_agree() {
        for kind in EventKind::known() {
            let channel = channel_for(&kind, "user-7").unwrap();
            assert_eq!(parse_known(&channel), Some((kind, "user-7")));
        }
    }

    #[test]
    fn known_prefixes_are_disjoint() {
        assert!(prefixes_are_disjoint());
    }

    #[test]
    fn validate_channel_rules() {
        assert!(validate_channel("orders:created").is_ok());
        assert!(validate_channel("").is_err());
        assert!(validate_channel("a b").is_err());
        assert!(validate_channel("a\nb").is_err());
    }

    #[test]
    fn display_uses_event_type() {
        assert_eq!(EventKind::KickOff.to_string(), "kick_off");
        assert_eq!(EventKind::custom("promo").unwrap().to_string(), "promo");
    }
}
