/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Free-form extra data attached to custom events.
pub type Extra = serde_json::Map<String, serde_json::Value>;
