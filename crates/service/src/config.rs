use std::time::Duration;

use usernotify_core::ConfigError;
use usernotify_events::RedisConfig;

/// Default interval between broker health checks.
const DEFAULT_HEALTH_CHECK_SECS: u64 = 30;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub redis: RedisConfig,
    /// Entity keys whose kick-off, login and logout events are watched.
    pub watch_users: Vec<String>,
    pub health_check_interval: Duration,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// Redis settings come from [`RedisConfig::from_env`]. In addition:
    ///
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `WATCH_USERS`                | empty   |
    /// | `HEALTH_CHECK_INTERVAL_SECS` | `30`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let redis = RedisConfig::from_env()?;

        let watch_users = std::env::var("WATCH_USERS")
            .map(|raw| parse_watch_list(&raw))
            .unwrap_or_default();

        let health_check_secs = match std::env::var("HEALTH_CHECK_INTERVAL_SECS") {
            Ok(raw) => parse_interval_secs(&raw)?,
            Err(_) => DEFAULT_HEALTH_CHECK_SECS,
        };

        Ok(Self {
            redis,
            watch_users,
            health_check_interval: Duration::from_secs(health_check_secs),
        })
    }
}

/// Split a comma-separated list of entity keys, dropping blanks and
/// duplicates while keeping first-seen order.
pub fn parse_watch_list(raw: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for key in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

fn parse_interval_secs(raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            name: "HEALTH_CHECK_INTERVAL_SECS",
            reason: "must be greater than zero".into(),
        }),
        Ok(secs) => Ok(secs),
        Err(e) => Err(ConfigError::InvalidValue {
            name: "HEALTH_CHECK_INTERVAL_SECS",
            reason: e.to_string(),
        }),
    }
}
