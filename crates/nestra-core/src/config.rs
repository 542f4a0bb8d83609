//! Validated configuration for the registry core.
//!
//! Configuration can come from programmatic defaults, the builder, or
//! environment variables prefixed with `NESTRA_`. All values are validated
//! before use; an invalid configuration never reaches the store.

use crate::{NestraError, RateBps, Result, BPS_DENOMINATOR, MAX_OWNERSHIP_DEPTH};
use serde::{Deserialize, Serialize};

/// Complete core configuration, seeded into the shared store at bootstrap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestraConfig {
    /// Commission rate applied when no reputation threshold qualifies.
    pub default_rate_bps: RateBps,

    /// Width of the near-expiry window for lifecycle bucket resolution,
    /// in seconds before the recorded expiry.
    pub near_expiry_window_secs: u64,

    /// Maximum hops an ownership chain may take before resolution fails
    /// closed.
    pub max_ownership_depth: usize,

    /// Upper bound on the pending-children sequence of a single parent.
    pub max_pending_per_item: usize,

    /// Upper bound on the accepted-children sequence of a single parent.
    pub max_accepted_per_item: usize,

    /// Royalty percentage recorded for the collection at bootstrap.
    pub royalty_percentage: u8,
}

impl Default for NestraConfig {
    fn default() -> Self {
        Self {
            default_rate_bps: 1_500,
            near_expiry_window_secs: 30 * 24 * 60 * 60,
            max_ownership_depth: 16,
            max_pending_per_item: 128,
            max_accepted_per_item: 256,
            royalty_percentage: 2,
        }
    }
}

impl NestraConfig {
    /// Create a configuration builder seeded with defaults.
    pub fn builder() -> NestraConfigBuilder {
        NestraConfigBuilder::default()
    }

    /// Load configuration overrides from `NESTRA_`-prefixed environment
    /// variables:
    /// - `NESTRA_DEFAULT_RATE_BPS`
    /// - `NESTRA_NEAR_EXPIRY_WINDOW_SECS`
    /// - `NESTRA_MAX_OWNERSHIP_DEPTH`
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();

        if let Ok(raw) = std::env::var("NESTRA_DEFAULT_RATE_BPS") {
            let rate = raw.parse().map_err(|e| {
                NestraError::InvalidParameter(format!("NESTRA_DEFAULT_RATE_BPS: {e}"))
            })?;
            builder = builder.default_rate_bps(rate);
        }

        if let Ok(raw) = std::env::var("NESTRA_NEAR_EXPIRY_WINDOW_SECS") {
            let window = raw.parse().map_err(|e| {
                NestraError::InvalidParameter(format!("NESTRA_NEAR_EXPIRY_WINDOW_SECS: {e}"))
            })?;
            builder = builder.near_expiry_window_secs(window);
        }

        if let Ok(raw) = std::env::var("NESTRA_MAX_OWNERSHIP_DEPTH") {
            let depth = raw.parse().map_err(|e| {
                NestraError::InvalidParameter(format!("NESTRA_MAX_OWNERSHIP_DEPTH: {e}"))
            })?;
            builder = builder.max_ownership_depth(depth);
        }

        builder.build()
    }

    /// Validate invariants on an already-constructed configuration.
    pub fn validate(&self) -> Result<()> {
        if u128::from(self.default_rate_bps) > BPS_DENOMINATOR {
            return Err(NestraError::InvalidParameter(format!(
                "default_rate_bps {} exceeds denominator {}",
                self.default_rate_bps, BPS_DENOMINATOR
            )));
        }
        if self.max_ownership_depth == 0 || self.max_ownership_depth > MAX_OWNERSHIP_DEPTH {
            return Err(NestraError::InvalidParameter(format!(
                "max_ownership_depth must be in 1..={MAX_OWNERSHIP_DEPTH}"
            )));
        }
        if self.max_pending_per_item == 0 {
            return Err(NestraError::InvalidParameter(
                "max_pending_per_item must be positive".into(),
            ));
        }
        if self.max_accepted_per_item == 0 {
            return Err(NestraError::InvalidParameter(
                "max_accepted_per_item must be positive".into(),
            ));
        }
        if self.royalty_percentage > 100 {
            return Err(NestraError::InvalidParameter(format!(
                "royalty_percentage {} exceeds 100",
                self.royalty_percentage
            )));
        }
        Ok(())
    }
}

/// Builder for [`NestraConfig`].
#[derive(Clone, Debug, Default)]
pub struct NestraConfigBuilder {
    config: Option<NestraConfig>,
}

impl NestraConfigBuilder {
    fn config(&mut self) -> &mut NestraConfig {
        self.config.get_or_insert_with(NestraConfig::default)
    }

    pub fn default_rate_bps(mut self, rate: RateBps) -> Self {
        self.config().default_rate_bps = rate;
        self
    }

    pub fn near_expiry_window_secs(mut self, window: u64) -> Self {
        self.config().near_expiry_window_secs = window;
        self
    }

    pub fn max_ownership_depth(mut self, depth: usize) -> Self {
        self.config().max_ownership_depth = depth;
        self
    }

    pub fn max_pending_per_item(mut self, bound: usize) -> Self {
        self.config().max_pending_per_item = bound;
        self
    }

    pub fn max_accepted_per_item(mut self, bound: usize) -> Self {
        self.config().max_accepted_per_item = bound;
        self
    }

    pub fn royalty_percentage(mut self, percentage: u8) -> Self {
        self.config().royalty_percentage = percentage;
        self
    }

    /// Validate and produce the final configuration.
    pub fn build(self) -> Result<NestraConfig> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }
}
