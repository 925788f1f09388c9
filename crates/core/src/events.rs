//! User event envelopes carried over the notification bus.
//!
//! The JSON field names (`open_id`, `event_type`, `platform_code`, ...) are
//! the wire format shared with every other publisher on the same broker and
//! must not change.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::channels::{EventKind, EVENT_TYPE_KICK_OFF, EVENT_TYPE_LOGIN, EVENT_TYPE_LOGOUT};
use crate::types::{Extra, Timestamp};

/// Reason recorded on a kick-off event when the publisher gives none.
pub const DEFAULT_KICK_OFF_REASON: &str = "User signed in on another device and was kicked off";

const LOGIN_MESSAGE: &str = "User logged in";
const LOGOUT_MESSAGE: &str = "User logged out";

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A serializable event that can travel over the bus.
pub trait Envelope: Serialize + DeserializeOwned + Send + 'static {
    /// Bind the envelope to the entity it is published for and record the
    /// publish time. Called by the bus right before encoding.
    fn stamp(&mut self, entity_key: &str, at: Timestamp);

    fn entity_key(&self) -> &str;

    fn event_type(&self) -> &str;
}

/// An envelope whose kind, and therefore channel prefix, is fixed.
pub trait KnownEvent: Envelope {
    const KIND: EventKind;
}

// ---------------------------------------------------------------------------
// UserEvent
// ---------------------------------------------------------------------------

/// Generic user event, used for custom kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEvent {
    #[serde(rename = "open_id")]
    pub entity_key: String,
    pub event_type: String,
    #[serde(default)]
    pub platform_code: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: Extra,
}

impl UserEvent {
    /// Build an event of `kind`; its `event_type` is the kind's name.
    pub fn new(
        entity_key: impl Into<String>,
        kind: &EventKind,
        platform_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            entity_key: entity_key.into(),
            event_type: kind.event_type().to_string(),
            platform_code: platform_code.into(),
            timestamp: Utc::now(),
            message: message.into(),
            extra: Extra::new(),
        }
    }

    /// Attach free-form extra data.
    pub fn with_extra(mut self, extra: Extra) -> Self {
        self.extra = extra;
        self
    }
}

impl Envelope for UserEvent {
    fn stamp(&mut self, entity_key: &str, at: Timestamp) {
        self.entity_key = entity_key.to_string();
        self.timestamp = at;
    }

    fn entity_key(&self) -> &str {
        &self.entity_key
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }
}

// ---------------------------------------------------------------------------
// KickOffEvent
// ---------------------------------------------------------------------------

/// The user's session was terminated, typically by a newer login elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KickOffEvent {
    #[serde(rename = "open_id")]
    pub entity_key: String,
    pub event_type: String,
    #[serde(default)]
    pub platform_code: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl KickOffEvent {
    /// Build a kick-off event. Falls back to [`DEFAULT_KICK_OFF_REASON`]
    /// when `reason` is `None` or empty.
    pub fn new(
        entity_key: impl Into<String>,
        platform_code: impl Into<String>,
        reason: Option<&str>,
    ) -> Self {
        let reason = reason
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_KICK_OFF_REASON)
            .to_string();
        Self {
            entity_key: entity_key.into(),
            event_type: EVENT_TYPE_KICK_OFF.to_string(),
            platform_code: platform_code.into(),
            timestamp: Utc::now(),
            message: reason.clone(),
            reason,
        }
    }
}

impl Envelope for KickOffEvent {
    fn stamp(&mut self, entity_key: &str, at: Timestamp) {
        self.entity_key = entity_key.to_string();
        self.timestamp = at;
    }

    fn entity_key(&self) -> &str {
        &self.entity_key
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }
}

impl KnownEvent for KickOffEvent {
    const KIND: EventKind = EventKind::KickOff;
}

// ---------------------------------------------------------------------------
// LoginEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginEvent {
    #[serde(rename = "open_id")]
    pub entity_key: String,
    pub event_type: String,
    #[serde(default)]
    pub platform_code: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
}

impl LoginEvent {
    /// Build a login event with the default message.
    pub fn new(
        entity_key: impl Into<String>,
        platform_code: impl Into<String>,
        client_ip: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            entity_key: entity_key.into(),
            event_type: EVENT_TYPE_LOGIN.to_string(),
            platform_code: platform_code.into(),
            timestamp: Utc::now(),
            message: LOGIN_MESSAGE.to_string(),
            client_ip: client_ip.into(),
            user_agent: user_agent.into(),
        }
    }
}

impl Envelope for LoginEvent {
    fn stamp(&mut self, entity_key: &str, at: Timestamp) {
        self.entity_key = entity_key.to_string();
        self.timestamp = at;
    }

    fn entity_key(&self) -> &str {
        &self.entity_key
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }
}

impl KnownEvent for LoginEvent {
    const KIND: EventKind = EventKind::Login;
}

// ---------------------------------------------------------------------------
// LogoutEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogoutEvent {
    #[serde(rename = "open_id")]
    pub entity_key: String,
    pub event_type: String,
    #[serde(default)]
    pub platform_code: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub message: String,
    /// Session length in seconds.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub duration: i64,
}

impl LogoutEvent {
    /// Build a logout event for a session of `duration_secs` seconds.
    pub fn new(
        entity_key: impl Into<String>,
        platform_code: impl Into<String>,
        duration_secs: i64,
    ) -> Self {
        Self {
            entity_key: entity_key.into(),
            event_type: EVENT_TYPE_LOGOUT.to_string(),
            platform_code: platform_code.into(),
            timestamp: Utc::now(),
            message: LOGOUT_MESSAGE.to_string(),
            duration: duration_secs,
        }
    }
}

impl Envelope for LogoutEvent {
    fn stamp(&mut self, entity_key: &str, at: Timestamp) {
        self.entity_key = entity_key.to_string();
        self.timestamp = at;
    }

    fn entity_key(&self) -> &str {
        &self.entity_key
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }
}

impl KnownEvent for LogoutEvent {
    const KIND: EventKind = EventKind::Logout;
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kick_off_defaults_reason() {
        let event = KickOffEvent::new("u1", "web", None);
        assert_eq!(event.reason, DEFAULT_KICK_OFF_REASON);
        assert_eq!(event.message, DEFAULT_KICK_OFF_REASON);

        let event = KickOffEvent::new("u1", "web", Some(""));
        assert_eq!(event.reason, DEFAULT_KICK_OFF_REASON);

        let event = KickOffEvent::new("u1", "web", Some("banned"));
        assert_eq!(event.reason, "banned");
        assert_eq!(event.event_type, "kick_off");
    }

    #[test]
    fn serialized_fields_follow_wire_names() {
        let event = LoginEvent::new("u1", "web", "10.0.0.1", "curl/8");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["open_id"], "u1");
        assert_eq!(value["event_type"], "login");
        assert_eq!(value["platform_code"], "web");
        assert_eq!(value["client_ip"], "10.0.0.1");
        assert_eq!(value["user_agent"], "curl/8");
        assert!(value.get("entity_key").is_none());
    }

    #[test]
    fn empty_optional_fields_are_omitted() {
        let value = serde_json::to_value(LogoutEvent::new("u1", "web", 0)).unwrap();
        assert!(value.get("duration").is_none());

        let value = serde_json::to_value(LoginEvent::new("u1", "web", "", "")).unwrap();
        assert!(value.get("client_ip").is_none());
        assert!(value.get("user_agent").is_none());

        let custom = EventKind::custom("promo").unwrap();
        let value = serde_json::to_value(UserEvent::new("u1", &custom, "web", "hi")).unwrap();
        assert!(value.get("extra").is_none());
    }

    #[test]
    fn stamp_overrides_entity_and_time() {
        let mut event = LogoutEvent::new("placeholder", "web", 30);
        let at = chrono::DateTime::parse_from_rfc3339("2024-06-10T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        event.stamp("u2", at);

        assert_eq!(event.entity_key(), "u2");
        assert_eq!(event.timestamp, at);
        assert_eq!(event.event_type(), "logout");
    }

    #[test]
    fn user_event_carries_custom_kind_and_extra() {
        let kind = EventKind::custom("promo").unwrap();
        let mut extra = Extra::new();
        extra.insert("code".into(), serde_json::json!("SPRING"));
        let event = UserEvent::new("u1", &kind, "app", "Coupon issued").with_extra(extra);

        assert_eq!(event.event_type, "promo");
        assert_eq!(event.extra["code"], "SPRING");
    }

    #[test]
    fn known_event_kinds() {
        assert_eq!(KickOffEvent::KIND, EventKind::KickOff);
        assert_eq!(LoginEvent::KIND, EventKind::Login);
        assert_eq!(LogoutEvent::KIND, EventKind::Logout);
    }
}
