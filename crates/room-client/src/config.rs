//! Room client configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; every field can also be set programmatically for tests.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default base delay between signaling reconnect attempts.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default cap on the reconnect delay.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 10;

/// Default grace period before a Suspect peer session is torn down.
pub const DEFAULT_SUSPECT_GRACE_PERIOD_SECONDS: u64 = 10;

/// Default number of chat messages retained in scrollback.
pub const DEFAULT_CHAT_SCROLLBACK_LIMIT: usize = 500;

/// Room client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base delay for signaling reconnect backoff (default: 1s).
    pub reconnect_base_delay: Duration,

    /// Upper bound on the reconnect backoff delay (default: 5s).
    pub reconnect_max_delay: Duration,

    /// Reconnect attempts before the channel reports failure (default: 10).
    pub reconnect_max_attempts: u32,

    /// How long a Suspect peer session may linger before teardown
    /// (default: 10s).
    pub suspect_grace_period: Duration,

    /// Chat scrollback capacity (default: 500).
    pub chat_scrollback_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            reconnect_max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            suspect_grace_period: Duration::from_secs(DEFAULT_SUSPECT_GRACE_PERIOD_SECONDS),
            chat_scrollback_limit: DEFAULT_CHAT_SCROLLBACK_LIMIT,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but unparseable.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let reconnect_base_delay = parse_secs(
            vars,
            "ROOM_RECONNECT_BASE_DELAY_SECONDS",
            DEFAULT_RECONNECT_BASE_DELAY,
        )?;

        let reconnect_max_delay = parse_secs(
            vars,
            "ROOM_RECONNECT_MAX_DELAY_SECONDS",
            DEFAULT_RECONNECT_MAX_DELAY,
        )?;

        let reconnect_max_attempts = parse_num(
            vars,
            "ROOM_RECONNECT_MAX_ATTEMPTS",
            DEFAULT_RECONNECT_MAX_ATTEMPTS,
        )?;

        let suspect_grace_period = parse_secs(
            vars,
            "ROOM_SUSPECT_GRACE_PERIOD_SECONDS",
            Duration::from_secs(DEFAULT_SUSPECT_GRACE_PERIOD_SECONDS),
        )?;

        let chat_scrollback_limit = parse_num(
            vars,
            "ROOM_CHAT_SCROLLBACK_LIMIT",
            DEFAULT_CHAT_SCROLLBACK_LIMIT,
        )?;

        if reconnect_base_delay > reconnect_max_delay {
            return Err(ConfigError::InvalidValue(
                "reconnect base delay exceeds max delay".to_string(),
            ));
        }

        Ok(Config {
            reconnect_base_delay,
            reconnect_max_delay,
            reconnect_max_attempts,
            suspect_grace_period,
            chat_scrollback_limit,
        })
    }
}

fn parse_num<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
        None => Ok(default),
    }
}

fn parse_secs(
    vars: &HashMap<String, String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(parse_num(
        vars,
        key,
        default.as_secs(),
    )?))
}
