//! Engine configuration
//!
//! Loaded from TOML or built in code:
//!
//! ```toml
//! grace_period_secs = 5
//! tick_ms = 1000
//! report_channel_capacity = 256
//! ```

use crate::error::ConfigError;
use crate::grace::GraceTimer;
use crate::types::CommandOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default grace period in seconds
    pub grace_period_secs: u64,
    /// Length of one countdown second in milliseconds
    pub tick_ms: u64,
    /// Buffer size of channel result sinks
    pub report_channel_capacity: usize,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With default grace period
    #[inline]
    #[must_use]
    pub fn with_grace_period(mut self, secs: u64) -> Self {
        self.grace_period_secs = secs;
        self
    }

    /// With countdown tick length
    #[inline]
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With result channel capacity
    #[inline]
    #[must_use]
    pub fn with_report_channel_capacity(mut self, capacity: usize) -> Self {
        self.report_channel_capacity = capacity;
        self
    }

    /// Countdown tick length
    #[inline]
    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Grace timer for a command with `options`
    #[must_use]
    pub fn grace_timer(&self, options: &CommandOptions) -> GraceTimer {
        GraceTimer::new(
            options.grace_period_secs.unwrap_or(self.grace_period_secs),
            self.tick(),
        )
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` for a zero tick or zero channel capacity
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::Invalid("tick_ms must be positive".into()));
        }
        if self.report_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "report_channel_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Returns `ConfigError` on malformed TOML or invalid values
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or is invalid
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns `ConfigError::Serialize` if rendering fails
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 5,
            tick_ms: 1000,
            report_channel_capacity: 256,
        }
    }
}
