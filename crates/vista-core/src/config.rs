#![forbid(unsafe_code)]

//! Tunables for an observable collection and its decorator chain.
//!
//! Values come from [`PipelineConfig::default`], builder setters, the
//! process environment ([`PipelineConfig::from_env`]) or, with the
//! `config-file` feature, TOML text.
//!
//! | Variable | Field | Default |
//! |---|---|---|
//! | `VISTA_ITEM_CHANGED_DELAY_MS` | `item_changed_delay_ms` | `0` (immediate) |
//! | `VISTA_ITEM_CHANGED_RESET_THRESHOLD` | `item_changed_reset_threshold` | `100` |
//!
//! Unparseable environment values are ignored with a `warn!` and the
//! existing value is kept.

use std::time::Duration;

/// Environment variable overriding the item-changed debounce delay.
pub const ENV_ITEM_CHANGED_DELAY_MS: &str = "VISTA_ITEM_CHANGED_DELAY_MS";

/// Environment variable overriding the item-changed reset threshold.
pub const ENV_ITEM_CHANGED_RESET_THRESHOLD: &str = "VISTA_ITEM_CHANGED_RESET_THRESHOLD";

/// Pending item-changed count above which a flush becomes a full reset.
pub const DEFAULT_RESET_THRESHOLD: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    /// Debounce window for item-changed notifications; 0 applies them as
    /// soon as no mutation is in flight.
    pub item_changed_delay_ms: u64,
    /// More pending item-changed notifications than this are replaced by a
    /// single reset of the chain.
    pub item_changed_reset_threshold: usize,
    /// Pre-sized capacity for source storage.
    pub initial_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            item_changed_delay_ms: 0,
            item_changed_reset_threshold: DEFAULT_RESET_THRESHOLD,
            initial_capacity: 0,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_item_changed_delay(mut self, delay: Duration) -> Self {
        self.item_changed_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_reset_threshold(mut self, threshold: usize) -> Self {
        self.item_changed_reset_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Debounce window as a `Duration`.
    #[must_use]
    pub const fn item_changed_delay(&self) -> Duration {
        Duration::from_millis(self.item_changed_delay_ms)
    }

    /// Defaults overlaid with the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        let delay = std::env::var(ENV_ITEM_CHANGED_DELAY_MS).ok();
        let threshold = std::env::var(ENV_ITEM_CHANGED_RESET_THRESHOLD).ok();
        Self::default().with_env_values(delay.as_deref(), threshold.as_deref())
    }

    /// Overlay raw environment values onto `self`.
    ///
    /// Split out from [`Self::from_env`] so it can be tested without mutating
    /// the process environment.
    #[must_use]
    pub fn with_env_values(mut self, delay_ms: Option<&str>, threshold: Option<&str>) -> Self {
        if let Some(raw) = delay_ms {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.item_changed_delay_ms = ms,
                Err(_) => tracing::warn!(
                    var = ENV_ITEM_CHANGED_DELAY_MS,
                    value = raw,
                    "ignoring unparseable value"
                ),
            }
        }
        if let Some(raw) = threshold {
            match raw.trim().parse::<usize>() {
                Ok(n) => self.item_changed_reset_threshold = n,
                Err(_) => tracing::warn!(
                    var = ENV_ITEM_CHANGED_RESET_THRESHOLD,
                    value = raw,
                    "ignoring unparseable value"
                ),
            }
        }
        self
    }

    /// Parse a config from TOML text; missing keys take their defaults.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(text: &str) -> crate::error::Result<Self> {
        toml::from_str(text)
            .map_err(|e| crate::error::PipelineError::InvalidArgument(e.to_string()))
    }
}
