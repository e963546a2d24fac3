//! Session room configuration.
//!
//! Tunables are loaded from environment variables. Every value has a default,
//! so an empty environment yields [`Config::default()`].

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default guest dial interval in milliseconds.
pub const DEFAULT_DIAL_INTERVAL_MS: u64 = 4_000;

/// Default session timer tick in milliseconds.
pub const DEFAULT_TIMER_TICK_MS: u64 = 1_000;

/// Default warning threshold before the scheduled end, in seconds.
pub const DEFAULT_WARNING_THRESHOLD_SECONDS: u64 = 300;

/// Default delay between the timer reaching ENDED and teardown, in milliseconds.
pub const DEFAULT_END_GRACE_MS: u64 = 3_000;

/// Default number of host identity retries after the first collision.
pub const DEFAULT_IDENTITY_RETRIES: u32 = 3;

/// Default delay between host identity retries in milliseconds.
pub const DEFAULT_IDENTITY_RETRY_DELAY_MS: u64 = 2_000;

/// Default number of failed dials after which a manual retry is offered.
pub const DEFAULT_FORCE_CONNECT_AFTER: u32 = 5;

/// Default number of ticks an unanswered dial may stay in flight.
pub const DEFAULT_STALE_DIAL_TICKS: u32 = 2;

/// Session room configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Guest dial loop period (default: 4s).
    pub dial_interval: Duration,

    /// Session timer tick period (default: 1s).
    pub timer_tick: Duration,

    /// Remaining time at which the timer enters WARNING (default: 5 min).
    pub warning_threshold: Duration,

    /// Delay between timer ENDED and automatic teardown (default: 3s).
    pub end_grace: Duration,

    /// Host identity retries after the first collision (default: 3).
    pub identity_retries: u32,

    /// Fixed delay between host identity retries (default: 2s).
    pub identity_retry_delay: Duration,

    /// Failed dial count that enables the manual retry (default: 5).
    pub force_connect_after: u32,

    /// Ticks before an unanswered dial is abandoned (default: 2).
    pub stale_dial_ticks: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dial_interval: Duration::from_millis(DEFAULT_DIAL_INTERVAL_MS),
            timer_tick: Duration::from_millis(DEFAULT_TIMER_TICK_MS),
            warning_threshold: Duration::from_secs(DEFAULT_WARNING_THRESHOLD_SECONDS),
            end_grace: Duration::from_millis(DEFAULT_END_GRACE_MS),
            identity_retries: DEFAULT_IDENTITY_RETRIES,
            identity_retry_delay: Duration::from_millis(DEFAULT_IDENTITY_RETRY_DELAY_MS),
            force_connect_after: DEFAULT_FORCE_CONNECT_AFTER,
            stale_dial_ticks: DEFAULT_STALE_DIAL_TICKS,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unparsable or zero values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unparsable or zero values.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let dial_interval = Duration::from_millis(parse_positive(
            vars,
            "ROOM_DIAL_INTERVAL_MS",
            DEFAULT_DIAL_INTERVAL_MS,
        )?);

        let timer_tick = Duration::from_millis(parse_positive(
            vars,
            "ROOM_TIMER_TICK_MS",
            DEFAULT_TIMER_TICK_MS,
        )?);

        let warning_threshold = Duration::from_secs(parse_positive(
            vars,
            "ROOM_WARNING_THRESHOLD_SECONDS",
            DEFAULT_WARNING_THRESHOLD_SECONDS,
        )?);

        let end_grace = Duration::from_millis(parse_positive(
            vars,
            "ROOM_END_GRACE_MS",
            DEFAULT_END_GRACE_MS,
        )?);

        // Zero retries is meaningful (fail on first collision)
        let identity_retries = match vars.get("ROOM_IDENTITY_RETRIES") {
            Some(raw) => parse_value::<u32>("ROOM_IDENTITY_RETRIES", raw)?,
            None => DEFAULT_IDENTITY_RETRIES,
        };

        let identity_retry_delay = Duration::from_millis(parse_positive(
            vars,
            "ROOM_IDENTITY_RETRY_DELAY_MS",
            DEFAULT_IDENTITY_RETRY_DELAY_MS,
        )?);

        let force_connect_after = parse_positive(
            vars,
            "ROOM_FORCE_CONNECT_AFTER",
            DEFAULT_FORCE_CONNECT_AFTER,
        )?;

        let stale_dial_ticks =
            parse_positive(vars, "ROOM_STALE_DIAL_TICKS", DEFAULT_STALE_DIAL_TICKS)?;

        Ok(Config {
            dial_interval,
            timer_tick,
            warning_threshold,
            end_grace,
            identity_retries,
            identity_retry_delay,
            force_connect_after,
            stale_dial_ticks,
        })
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}")))
}

fn parse_positive<T>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };

    let value: T = parse_value(key, raw)?;
    if value == T::default() {
        return Err(ConfigError::InvalidValue(format!("{key} must be positive")));
    }
    Ok(value)
}
