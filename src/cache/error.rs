//! Error types surfaced by the cache subsystem.

use std::error::Error as StdError;

use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A caller-supplied fetch failed.
///
/// Never cached. `CacheStore::get` hands back the caller's own error type
/// unchanged; this type is the common currency for warmup entries and for
/// services that mix fetch sources.
#[derive(Debug, Error)]
#[error("fetch failed: {message}")]
pub struct FetchError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl FetchError {
    /// Wrap an underlying error.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    /// Build a fetch error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// An invalidation request could not be applied.
#[derive(Debug, Error)]
pub enum InvalidationError {
    #[error("invalid invalidation pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Rejected construction-time configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("cache max_size must be greater than zero")]
    ZeroCapacity,
    #[error("event bus max_history_size must be greater than zero")]
    ZeroHistory,
}
