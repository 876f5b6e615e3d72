//! Emulator Configuration
//!
//! Configuration is read from environment variables with sensible defaults;
//! the binary loads a `.env` file first if one is present.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `EMULATOR_HOST` | `127.0.0.1` | Listening host |
//! | `EMULATOR_PORT` | `7498` | Listening port |
//! | `EMULATOR_BAR_DELAY_MS` | `10` | Pacing delay between streamed bars |
//! | `EMULATOR_UTC_OFFSET_HOURS` | `-5` | Offset applied to naive timestamps |

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

/// Default listening port, matching the production terminal's API port.
const DEFAULT_PORT: u16 = 7498;
/// Default pacing delay between streamed bars.
const DEFAULT_BAR_DELAY: Duration = Duration::from_millis(10);
/// Default offset for naive timestamps (US Eastern standard time).
const DEFAULT_UTC_OFFSET_HOURS: i32 = -5;

// =============================================================================
// Error Type
// =============================================================================

/// Configuration parsing errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `EMULATOR_PORT` is not a valid port number.
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// `EMULATOR_BAR_DELAY_MS` is not a valid millisecond count.
    #[error("invalid bar delay: {0}")]
    InvalidBarDelay(String),

    /// `EMULATOR_UTC_OFFSET_HOURS` is not a valid UTC offset.
    #[error("invalid UTC offset: {0}")]
    InvalidUtcOffset(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// Emulator server configuration.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// Listening host.
    pub host: String,
    /// Listening port (0 binds an ephemeral port).
    pub port: u16,
    /// Pacing delay between streamed bars. A tunable, not a correctness
    /// requirement.
    pub bar_delay: Duration,
    /// Offset applied to naive timestamps in the data file.
    pub utc_offset: FixedOffset,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            bar_delay: DEFAULT_BAR_DELAY,
            utc_offset: offset_from_hours(DEFAULT_UTC_OFFSET_HOURS)
                .unwrap_or_else(|| Utc.fix()),
        }
    }
}

impl EmulatorConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for unset values.
    ///
    /// # Errors
    ///
    /// Returns an error if a set variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = std::env::var("EMULATOR_HOST").unwrap_or(defaults.host);
        let port = parse_port(std::env::var("EMULATOR_PORT").ok(), defaults.port)?;
        let bar_delay = parse_bar_delay(
            std::env::var("EMULATOR_BAR_DELAY_MS").ok(),
            defaults.bar_delay,
        )?;
        let utc_offset = parse_utc_offset(
            std::env::var("EMULATOR_UTC_OFFSET_HOURS").ok(),
            defaults.utc_offset,
        )?;

        Ok(Self {
            host,
            port,
            bar_delay,
            utc_offset,
        })
    }

    /// The `host:port` address the listener binds.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_port(raw: Option<String>, default: u16) -> Result<u16, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidPort(value)),
    }
}

fn parse_bar_delay(raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidBarDelay(value)),
    }
}

fn parse_utc_offset(raw: Option<String>, default: FixedOffset) -> Result<FixedOffset, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse::<i32>()
            .ok()
            .and_then(offset_from_hours)
            .ok_or(ConfigError::InvalidUtcOffset(value)),
    }
}

fn offset_from_hours(hours: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(hours * 3600)
}
