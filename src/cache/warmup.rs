//! Bulk pre-population before read traffic arrives.

use std::future::Future;
use std::time::Instant;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use metrics::histogram;
use serde::Serialize;
use tracing::{info, warn};

use super::entry::EntryOptions;
use super::error::FetchError;
use super::store::CacheStore;

const METRIC_CACHE_WARM_MS: &str = "opsdesk_cache_warm_ms";

/// One key to populate during warmup.
pub struct WarmupEntry<V> {
    key: String,
    options: EntryOptions,
    fetch: BoxFuture<'static, Result<V, FetchError>>,
}

impl<V> WarmupEntry<V> {
    /// `fetch` is not polled until [`CacheStore::warmup`] runs.
    pub fn new<Fut>(key: impl Into<String>, fetch: Fut) -> Self
    where
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        Self {
            key: key.into(),
            options: EntryOptions::default(),
            fetch: fetch.boxed(),
        }
    }

    pub fn with_options(mut self, options: EntryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<V> std::fmt::Debug for WarmupEntry<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmupEntry")
            .field("key", &self.key)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// A warmup entry whose fetch failed. The key was left untouched.
#[derive(Debug)]
pub struct WarmupFailure {
    pub key: String,
    pub error: FetchError,
}

/// Outcome of a warmup pass.
#[derive(Debug, Default)]
pub struct WarmupReport {
    pub warmed: Vec<String>,
    pub failures: Vec<WarmupFailure>,
}

impl WarmupReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn summary(&self) -> WarmupSummary {
        WarmupSummary {
            warmed: self.warmed.len(),
            failed: self.failures.len(),
        }
    }
}

/// Serializable counts for a [`WarmupReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WarmupSummary {
    pub warmed: usize,
    pub failed: usize,
}

impl<V: Clone> CacheStore<V> {
    /// Fetch every entry concurrently and store the results, replacing any
    /// existing entries under the same keys.
    ///
    /// A failing fetch is logged and reported; it never aborts the others and
    /// never turns into an error for the caller. Hit and miss counters are not
    /// touched. A fetch overtaken by an invalidation still counts as warmed
    /// but leaves its key empty.
    pub async fn warmup(&self, entries: Vec<WarmupEntry<V>>) -> WarmupReport {
        let started_at = Instant::now();
        let requested = entries.len();

        let outcomes = join_all(entries.into_iter().map(|entry| async move {
            let WarmupEntry {
                key,
                options,
                fetch,
            } = entry;
            let ticket = self.begin_fetch(&key, options.tag_set());
            match fetch.await {
                Ok(value) => {
                    self.complete_fetch(ticket, &key, value, options);
                    Ok(key)
                }
                Err(error) => Err(WarmupFailure { key, error }),
            }
        }))
        .await;

        let mut report = WarmupReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(key) => report.warmed.push(key),
                Err(failure) => {
                    warn!(
                        key = %failure.key,
                        error = %failure.error,
                        "warmup fetch failed; entry skipped"
                    );
                    report.failures.push(failure);
                }
            }
        }

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_CACHE_WARM_MS).record(elapsed_ms);
        info!(
            requested,
            warmed = report.warmed.len(),
            failed = report.failures.len(),
            elapsed_ms,
            "cache warmup complete"
        );

        report
    }
}
