//! Cache configuration.
//!
//! Populated from the `[cache]` table of `opsdesk.toml` (see `crate::config`).

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigurationError;

const DEFAULT_MAX_SIZE: usize = 1000;
const DEFAULT_TTL_SECS: u64 = 300;

/// Construction-time settings for a [`CacheStore`](super::CacheStore).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of live entries. Must be greater than zero.
    pub max_size: usize,
    /// TTL applied when a caller does not pick one. `None` disables expiry
    /// for such entries; they leave only through invalidation or eviction.
    pub default_ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            default_ttl_secs: Some(DEFAULT_TTL_SECS),
        }
    }
}

impl CacheConfig {
    /// Longest default TTL accepted from settings: ten years.
    pub const MAX_DEFAULT_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size,
            ..Default::default()
        }
    }

    /// Returns the capacity, rejecting zero.
    pub fn capacity(&self) -> Result<NonZeroUsize, ConfigurationError> {
        NonZeroUsize::new(self.max_size).ok_or(ConfigurationError::ZeroCapacity)
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.capacity().map(|_| ())
    }
}
