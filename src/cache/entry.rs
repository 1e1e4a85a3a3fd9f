//! Cache entries and per-insert options.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::Instant;

/// Tags attached to an entry.
pub type TagSet = BTreeSet<String>;

/// A single cached value together with its expiry and tags.
///
/// `expires_at` is `None` or strictly later than `created_at`; zero TTLs never
/// reach an entry. A TTL too long to represent as a deadline is stored as no
/// expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    key: String,
    value: V,
    created_at: Instant,
    expires_at: Option<Instant>,
    tags: TagSet,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(
        key: String,
        value: V,
        created_at: Instant,
        ttl: Option<Duration>,
        tags: TagSet,
    ) -> Self {
        debug_assert!(ttl.is_none_or(|ttl| !ttl.is_zero()));
        Self {
            key,
            value,
            created_at,
            expires_at: ttl.and_then(|ttl| created_at.checked_add(ttl)),
            tags,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum TtlPolicy {
    #[default]
    StoreDefault,
    Never,
    After(Duration),
}

/// How a value should be stored: its TTL and its tags.
///
/// The default takes the store's configured TTL and no tags.
///
/// ```
/// use std::time::Duration;
/// use opsdesk::cache::EntryOptions;
///
/// let options = EntryOptions::new()
///     .ttl(Duration::from_secs(60))
///     .tag("customers")
///     .tag("customer:42");
/// assert_eq!(options.tag_set().len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    ttl: TtlPolicy,
    tags: TagSet,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire the entry `ttl` after insertion. A zero TTL returns the fetched
    /// value without storing it.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = TtlPolicy::After(ttl);
        self
    }

    /// Keep the entry until it is invalidated or evicted.
    pub fn no_expiry(mut self) -> Self {
        self.ttl = TtlPolicy::Never;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn tag_set(&self) -> &TagSet {
        &self.tags
    }

    pub(crate) fn resolve_ttl(&self, store_default: Option<Duration>) -> Option<Duration> {
        match self.ttl {
            TtlPolicy::StoreDefault => store_default,
            TtlPolicy::Never => None,
            TtlPolicy::After(ttl) => Some(ttl),
        }
    }

    pub(crate) fn into_tags(self) -> TagSet {
        self.tags
    }
}
