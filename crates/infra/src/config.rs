//! Engine configuration.
//!
//! Defaults are the product constants; environment variables override them.

use anyhow::{bail, Result};
use tracing::warn;

use tierguard_entitlements::{UsagePolicy, FREE_TIER_LIMIT, USAGE_WINDOW_DAYS};

pub const ENV_FREE_TIER_LIMIT: &str = "TIERGUARD_FREE_TIER_LIMIT";
pub const ENV_USAGE_WINDOW_DAYS: &str = "TIERGUARD_USAGE_WINDOW_DAYS";
pub const ENV_EMAIL_CORRELATION: &str = "TIERGUARD_EMAIL_CORRELATION";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// Longest accepted usage window, about ten years.
pub const MAX_USAGE_WINDOW_DAYS: i64 = 3650;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub free_tier_limit: u32,
    pub usage_window_days: i64,
    /// Match billing events by email when checkout metadata carries no
    /// account id. Off unless explicitly enabled.
    pub email_correlation_fallback: bool,
    pub database_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            free_tier_limit: FREE_TIER_LIMIT,
            usage_window_days: USAGE_WINDOW_DAYS,
            email_correlation_fallback: false,
            database_url: None,
        }
    }
}

impl EngineConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` as the variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            free_tier_limit: parse_or(&lookup, ENV_FREE_TIER_LIMIT, defaults.free_tier_limit),
            usage_window_days: parse_or(&lookup, ENV_USAGE_WINDOW_DAYS, defaults.usage_window_days),
            email_correlation_fallback: parse_or(
                &lookup,
                ENV_EMAIL_CORRELATION,
                defaults.email_correlation_fallback,
            ),
            database_url: lookup(ENV_DATABASE_URL).filter(|url| !url.trim().is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.usage_window_days <= 0 {
            bail!(
                "usage window must be at least one day (got {})",
                self.usage_window_days
            );
        }
        if self.usage_window_days > MAX_USAGE_WINDOW_DAYS {
            bail!(
                "usage window must be at most {MAX_USAGE_WINDOW_DAYS} days (got {})",
                self.usage_window_days
            );
        }
        Ok(())
    }

    pub fn usage_policy(&self) -> UsagePolicy {
        UsagePolicy {
            free_tier_limit: self.free_tier_limit,
            window_days: self.usage_window_days,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Debug,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = %raw, ?default, "ignoring unparsable config value");
            default
        }
    }
}
