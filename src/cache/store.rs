//! Read-through cache store.
//!
//! One mutex guards the entry map, its LRU order and the tag index, so every
//! structural change (insert, evict, expire, invalidate) keeps them in step.
//! Fetches run with the lock released. Each in-flight fetch holds a ticket;
//! an invalidation that covers the ticket's key or tags marks it stale, and a
//! stale fetch returns its value without storing it.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use metrics::counter;
use regex::Regex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use super::config::CacheConfig;
use super::entry::{CacheEntry, EntryOptions, TagSet};
use super::error::{ConfigurationError, InvalidationError};
use super::lock::mutex_lock;
use super::tags::TagIndex;

const SOURCE: &str = "cache::store";

const METRIC_CACHE_HIT: &str = "opsdesk_cache_hit_total";
const METRIC_CACHE_MISS: &str = "opsdesk_cache_miss_total";
const METRIC_CACHE_EVICT: &str = "opsdesk_cache_evict_total";
const METRIC_CACHE_INVALIDATED: &str = "opsdesk_cache_invalidated_total";

/// Snapshot of the store's counters.
///
/// `hits`, `misses` and `evictions` only ever grow; `size` is the entry count
/// at the time of the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

impl CacheStats {
    /// `hits / (hits + misses)`, or `0.0` before the first access.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

enum Lookup<V> {
    Hit(V),
    Expired,
    Absent,
}

struct InflightFetch {
    key: String,
    tags: TagSet,
    stale: bool,
}

struct StoreState<V> {
    entries: LruCache<String, CacheEntry<V>>,
    tags: TagIndex,
    inflight: HashMap<u64, InflightFetch>,
    next_ticket: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V> StoreState<V> {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            tags: TagIndex::new(),
            inflight: HashMap::new(),
            next_ticket: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// The single removal path: entry map, LRU order and tag index together.
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.pop(key)?;
        self.tags.deregister(key, entry.tags());
        Some(entry)
    }

    /// Insert `entry`, replacing any entry under the same key. Returns the key
    /// evicted to make room, if any.
    fn insert(&mut self, entry: CacheEntry<V>) -> Option<String> {
        // Overwrites start from a clean slate so stale tags never linger.
        self.remove(entry.key());

        let mut evicted = None;
        if self.entries.len() >= self.entries.cap().get()
            && let Some((key, old)) = self.entries.pop_lru()
        {
            self.tags.deregister(&key, old.tags());
            self.evictions += 1;
            evicted = Some(key);
        }

        self.tags.register(entry.key(), entry.tags());
        self.entries.put(entry.key().to_string(), entry);
        evicted
    }

    fn remove_where(&mut self, mut matches: impl FnMut(&str) -> bool) -> usize {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, _)| matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        doomed
            .iter()
            .filter(|key| self.remove(key).is_some())
            .count()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn mark_stale(&mut self, mut matches: impl FnMut(&str, &TagSet) -> bool) {
        for fetch in self.inflight.values_mut() {
            if matches(&fetch.key, &fetch.tags) {
                fetch.stale = true;
            }
        }
    }
}

impl<V: Clone> StoreState<V> {
    /// Look up a live value, touching LRU order. Expired entries are removed.
    fn lookup(&mut self, key: &str, now: Instant) -> Lookup<V> {
        let lookup = match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => Lookup::Expired,
            Some(entry) => Lookup::Hit(entry.value().clone()),
            None => Lookup::Absent,
        };
        if matches!(lookup, Lookup::Expired) {
            self.remove(key);
        }
        lookup
    }

    /// Look up a live value without touching LRU order. Expired entries are
    /// still removed.
    fn peek(&mut self, key: &str, now: Instant) -> Option<V> {
        match self.entries.peek(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value().clone()),
            Some(_) => {}
            None => return None,
        }
        self.remove(key);
        None
    }
}

/// Registration of a fetch that has not yet stored its result. Dropping it
/// without [`CacheStore::complete_fetch`] (fetch error, cancelled future)
/// releases the registration.
pub(super) struct FetchTicket<'a, V> {
    store: &'a CacheStore<V>,
    id: u64,
}

impl<V> Drop for FetchTicket<'_, V> {
    fn drop(&mut self) {
        mutex_lock(&self.store.state, SOURCE, "release_fetch")
            .inflight
            .remove(&self.id);
    }
}

/// Capacity-bounded, TTL-aware read-through cache keyed by string.
///
/// Values are cloned out on every hit, so `V` is usually cheap to clone
/// (an `Arc`, a small struct, or [`ErasedValue`](super::ErasedValue)).
pub struct CacheStore<V> {
    state: Mutex<StoreState<V>>,
    max_size: NonZeroUsize,
    default_ttl: Option<Duration>,
}

impl<V> std::fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("max_size", &self.max_size)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl<V: Clone> CacheStore<V> {
    /// Create a store, rejecting a zero `max_size`.
    pub fn new(config: CacheConfig) -> Result<Self, ConfigurationError> {
        let max_size = config.capacity()?;
        Ok(Self {
            state: Mutex::new(StoreState::new(max_size)),
            max_size,
            default_ttl: config.default_ttl(),
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size.get()
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    /// Return the cached value for `key`, calling `fetch` on a miss.
    ///
    /// Uses the store's default TTL and no tags; see [`get_with`](Self::get_with).
    pub async fn get<F, Fut, E>(&self, key: &str, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.get_with(key, EntryOptions::default(), fetch).await
    }

    /// Return the cached value for `key`, calling `fetch` on a miss and
    /// storing its result under `options`.
    ///
    /// A fetch error is returned unchanged and nothing is stored. Concurrent
    /// misses on the same key are not coalesced: each caller runs its own
    /// fetch and the last insert wins. If an invalidation covering `key` or
    /// one of the option tags lands while the fetch runs, the fetched value
    /// is returned but not stored.
    pub async fn get_with<F, Fut, E>(
        &self,
        key: &str,
        options: EntryOptions,
        fetch: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.lookup(key) {
            return Ok(value);
        }

        let ticket = self.begin_fetch(key, options.tag_set());
        let value = fetch().await?;
        self.complete_fetch(ticket, key, value.clone(), options);
        Ok(value)
    }

    /// Store `value` directly, with the same capacity and tag rules as a miss.
    pub fn set(&self, key: &str, value: V, options: EntryOptions) {
        self.insert(key, value, options);
    }

    /// Return a live value without touching LRU order or counters.
    pub fn peek(&self, key: &str) -> Option<V> {
        mutex_lock(&self.state, SOURCE, "peek").peek(key, Instant::now())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    /// Counted lookup: a live entry is a hit, anything else a miss.
    pub(super) fn lookup(&self, key: &str) -> Option<V> {
        let lookup = {
            let mut state = mutex_lock(&self.state, SOURCE, "lookup");
            let lookup = state.lookup(key, Instant::now());
            match lookup {
                Lookup::Hit(_) => state.hits += 1,
                Lookup::Expired | Lookup::Absent => state.misses += 1,
            }
            lookup
        };

        match lookup {
            Lookup::Hit(value) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                debug!(key, "cache hit");
                Some(value)
            }
            Lookup::Expired => {
                counter!(METRIC_CACHE_MISS).increment(1);
                debug!(key, reason = "expired", "cache miss");
                None
            }
            Lookup::Absent => {
                counter!(METRIC_CACHE_MISS).increment(1);
                debug!(key, reason = "absent", "cache miss");
                None
            }
        }
    }

    /// Insert a value unconditionally. Returns `false` when the resolved TTL
    /// is zero and the value was deliberately not stored.
    fn insert(&self, key: &str, value: V, options: EntryOptions) -> bool {
        let Some(entry) = self.prepare_entry(key, value, options) else {
            return false;
        };
        let evicted = mutex_lock(&self.state, SOURCE, "insert").insert(entry);
        record_eviction(key, evicted);
        true
    }

    /// Register a fetch for `key` about to run with the lock released.
    pub(super) fn begin_fetch(&self, key: &str, tags: &TagSet) -> FetchTicket<'_, V> {
        let mut state = mutex_lock(&self.state, SOURCE, "begin_fetch");
        let id = state.next_ticket;
        state.next_ticket = state.next_ticket.wrapping_add(1);
        state.inflight.insert(
            id,
            InflightFetch {
                key: key.to_string(),
                tags: tags.clone(),
                stale: false,
            },
        );
        FetchTicket { store: self, id }
    }

    /// Store the result of the fetch behind `ticket` unless an invalidation
    /// overtook it. Returns whether the value was stored.
    pub(super) fn complete_fetch(
        &self,
        ticket: FetchTicket<'_, V>,
        key: &str,
        value: V,
        options: EntryOptions,
    ) -> bool {
        let Some(entry) = self.prepare_entry(key, value, options) else {
            return false;
        };
        let outcome = {
            let mut state = mutex_lock(&self.state, SOURCE, "complete_fetch");
            let stale = state
                .inflight
                .remove(&ticket.id)
                .is_none_or(|fetch| fetch.stale);
            (!stale).then(|| state.insert(entry))
        };
        drop(ticket);

        match outcome {
            Some(evicted) => {
                record_eviction(key, evicted);
                true
            }
            None => {
                debug!(key, "invalidated during fetch; value returned without caching");
                false
            }
        }
    }

    fn prepare_entry(&self, key: &str, value: V, options: EntryOptions) -> Option<CacheEntry<V>> {
        let ttl = options.resolve_ttl(self.default_ttl);
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            debug!(key, "zero ttl; value returned without caching");
            return None;
        }
        Some(CacheEntry::new(
            key.to_string(),
            value,
            Instant::now(),
            ttl,
            options.into_tags(),
        ))
    }
}

fn record_eviction(key: &str, evicted: Option<String>) {
    if let Some(evicted) = evicted {
        counter!(METRIC_CACHE_EVICT).increment(1);
        debug!(key, evicted = %evicted, "evicted least recently used entry");
    }
}

impl<V> CacheStore<V> {
    /// Remove `key` if present. Returns whether an entry was removed.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = {
            let mut state = mutex_lock(&self.state, SOURCE, "invalidate");
            state.mark_stale(|pending, _| pending == key);
            state.remove(key).is_some()
        };
        if removed {
            counter!(METRIC_CACHE_INVALIDATED).increment(1);
            debug!(key, "cache entry invalidated");
        }
        removed
    }

    /// Remove every entry carrying at least one of `tags`.
    ///
    /// Entries that share no tag with `tags` are untouched. Returns the number
    /// of entries removed.
    pub fn invalidate_by_tags<I, S>(&self, tags: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags: Vec<S> = tags.into_iter().collect();
        let removed = {
            let mut state = mutex_lock(&self.state, SOURCE, "invalidate_by_tags");
            state.mark_stale(|_, pending| tags.iter().any(|tag| pending.contains(tag.as_ref())));
            let keys = state.tags.keys_for_tags(tags.iter().map(|tag| tag.as_ref()));
            keys.iter()
                .filter(|key| state.remove(key).is_some())
                .count()
        };

        counter!(METRIC_CACHE_INVALIDATED).increment(removed as u64);
        debug!(
            tags = ?tags.iter().map(|tag| tag.as_ref()).collect::<Vec<&str>>(),
            removed,
            "cache entries invalidated by tag"
        );
        removed
    }

    /// Remove every entry whose key matches the regular expression `pattern`.
    ///
    /// The pattern is compiled before anything is touched, so an invalid
    /// pattern removes nothing. Matching is unanchored; use `^` to pin a
    /// prefix. Returns the number of entries removed.
    pub fn invalidate_pattern(&self, pattern: &str) -> Result<usize, InvalidationError> {
        let regex = Regex::new(pattern).map_err(|source| InvalidationError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let removed = {
            let mut state = mutex_lock(&self.state, SOURCE, "invalidate_pattern");
            state.mark_stale(|key, _| regex.is_match(key));
            state.remove_where(|key| regex.is_match(key))
        };

        counter!(METRIC_CACHE_INVALIDATED).increment(removed as u64);
        debug!(pattern, removed, "cache entries invalidated by pattern");
        Ok(removed)
    }

    /// Remove every entry whose key starts with the literal `prefix`.
    ///
    /// No metacharacters are interpreted, so free-text identifiers are safe to
    /// pass here.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let removed = {
            let mut state = mutex_lock(&self.state, SOURCE, "invalidate_prefix");
            state.mark_stale(|key, _| key.starts_with(prefix));
            state.remove_where(|key| key.starts_with(prefix))
        };

        counter!(METRIC_CACHE_INVALIDATED).increment(removed as u64);
        debug!(prefix, removed, "cache entries invalidated by prefix");
        removed
    }

    /// Drop every expired entry now instead of waiting for the next access.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = mutex_lock(&self.state, SOURCE, "purge_expired");
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }

    /// Remove all entries and tag buckets. Counters are kept, and fetches in
    /// flight will not store their results.
    pub fn clear(&self) {
        let mut state = mutex_lock(&self.state, SOURCE, "clear");
        state.mark_stale(|_, _| true);
        state.entries.clear();
        state.tags.clear();
    }

    pub fn size(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "size").len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Keys in most-recently-used-first order, expired or not.
    pub fn keys(&self) -> Vec<String> {
        mutex_lock(&self.state, SOURCE, "keys")
            .entries
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Keys currently registered under `tag`.
    pub fn keys_for_tag(&self, tag: &str) -> HashSet<String> {
        mutex_lock(&self.state, SOURCE, "keys_for_tag")
            .tags
            .keys_for_tag(tag)
    }

    /// Number of tags that still have at least one entry.
    pub fn tag_count(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "tag_count").tags.tag_count()
    }

    pub fn get_stats(&self) -> CacheStats {
        let state = mutex_lock(&self.state, SOURCE, "get_stats");
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            size: state.len(),
        }
    }

    pub fn hit_rate(&self) -> f64 {
        self.get_stats().hit_rate()
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cache::FetchError;

    fn store(max_size: usize) -> CacheStore<String> {
        CacheStore::new(CacheConfig::with_max_size(max_size)).expect("valid cache config")
    }

    async fn fill(store: &CacheStore<String>, key: &str) {
        let value = format!("value-of-{key}");
        store
            .get(key, || async move { Ok::<_, Infallible>(value) })
            .await
            .expect("infallible fetch");
    }

    async fn fill_tagged(store: &CacheStore<String>, key: &str, tags: &[&str]) {
        let options = EntryOptions::new().tags(tags.iter().copied());
        store
            .get_with(key, options, || async { Ok::<_, Infallible>(key.to_string()) })
            .await
            .expect("infallible fetch");
    }

    #[tokio::test]
    async fn second_get_is_served_from_cache() {
        let store = store(10);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value = store
                .get("lead:1", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>("Acme".to_string())
                })
                .await
                .expect("infallible fetch");
            assert_eq!(value, "Acme");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched() {
        let store = store(10);
        let calls = AtomicUsize::new(0);
        let options = || EntryOptions::new().ttl(Duration::from_millis(10));

        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>("fresh".to_string())
        };

        store.get_with("k", options(), fetch).await.expect("fetch");
        store.get_with("k", options(), fetch).await.expect("fetch");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(11)).await;

        store.get_with("k", options(), fetch).await.expect("fetch");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_deregisters_tags() {
        let store = store(10);
        let options = EntryOptions::new().ttl(Duration::from_secs(1)).tag("okr");
        store
            .get_with("okr:1", options, || async { Ok::<_, Infallible>("q3".to_string()) })
            .await
            .expect("fetch");

        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(store.peek("okr:1").is_none());
        assert!(store.keys_for_tag("okr").is_empty());
        assert_eq!(store.size(), 0);
    }

    #[tokio::test]
    async fn invalidate_removes_only_that_key() {
        let store = store(10);
        fill(&store, "k1").await;
        fill(&store, "k2").await;

        assert!(store.invalidate("k1"));
        assert!(!store.invalidate("k1"), "second invalidate is a no-op");

        assert!(!store.contains("k1"));
        assert!(store.contains("k2"));
    }

    #[tokio::test]
    async fn invalidate_pattern_removes_matching_keys() {
        let store = store(10);
        fill(&store, "user:1").await;
        fill(&store, "user:2").await;
        fill(&store, "product:1").await;

        let removed = store.invalidate_pattern("user:.*").expect("valid pattern");

        assert_eq!(removed, 2);
        assert_eq!(store.size(), 1);
        assert!(store.contains("product:1"));
    }

    #[tokio::test]
    async fn invalid_pattern_removes_nothing() {
        let store = store(10);
        fill(&store, "user:1").await;

        let result = store.invalidate_pattern("user:(");

        assert!(matches!(
            result,
            Err(InvalidationError::InvalidPattern { .. })
        ));
        assert_eq!(store.size(), 1);
    }

    #[tokio::test]
    async fn prefix_invalidation_does_not_interpret_metacharacters() {
        let store = store(10);
        fill(&store, "report:Q1 (draft)").await;
        fill(&store, "report:Q1 (draft):rows").await;
        fill(&store, "report:Q1 final").await;

        let removed = store.invalidate_prefix("report:Q1 (draft)");

        assert_eq!(removed, 2);
        assert!(store.contains("report:Q1 final"));
    }

    #[tokio::test]
    async fn invalidate_by_tags_only_touches_overlapping_entries() {
        let store = store(10);
        fill_tagged(&store, "okr:summary", &["okr"]).await;
        fill_tagged(&store, "swot:summary", &["swot"]).await;
        fill_tagged(&store, "strategy:board", &["okr", "swot"]).await;

        let removed = store.invalidate_by_tags(["okr"]);

        assert_eq!(removed, 2);
        assert!(!store.contains("okr:summary"));
        assert!(!store.contains("strategy:board"));
        assert!(store.contains("swot:summary"));
        // The shared entry must be gone from its other buckets too.
        assert_eq!(
            store.keys_for_tag("swot"),
            HashSet::from(["swot:summary".to_string()])
        );
        assert!(store.keys_for_tag("okr").is_empty());
    }

    #[tokio::test]
    async fn eviction_removes_least_recently_used() {
        let store = store(3);
        fill(&store, "A").await;
        fill(&store, "B").await;
        fill(&store, "C").await;
        assert_eq!(store.size(), 3);
        assert_eq!(store.get_stats().evictions, 0);

        fill(&store, "B").await;
        fill(&store, "D").await;

        assert_eq!(store.size(), 3);
        assert_eq!(store.get_stats().evictions, 1);
        assert!(!store.contains("A"));
        assert!(store.contains("B"));
        assert!(store.contains("C"));
        assert!(store.contains("D"));
    }

    #[tokio::test]
    async fn eviction_deregisters_tags() {
        let store = store(1);
        fill_tagged(&store, "customer:1", &["customers", "customer:1"]).await;
        fill_tagged(&store, "customer:2", &["customers", "customer:2"]).await;

        assert!(store.keys_for_tag("customer:1").is_empty());
        assert_eq!(
            store.keys_for_tag("customers"),
            HashSet::from(["customer:2".to_string()])
        );
        assert_eq!(store.tag_count(), 2);
    }

    #[tokio::test]
    async fn overwriting_a_key_replaces_tags_without_evicting() {
        let store = store(2);
        fill_tagged(&store, "k", &["old"]).await;
        fill(&store, "other").await;

        store.set("k", "replacement".to_string(), EntryOptions::new().tag("new"));

        assert_eq!(store.get_stats().evictions, 0);
        assert_eq!(store.size(), 2);
        assert!(store.keys_for_tag("old").is_empty());
        assert!(store.keys_for_tag("new").contains("k"));
        assert_eq!(store.peek("k").as_deref(), Some("replacement"));
    }

    #[tokio::test]
    async fn hit_rate_after_one_miss_and_two_hits() {
        let store = store(10);
        assert_eq!(store.hit_rate(), 0.0);

        for _ in 0..3 {
            fill(&store, "k").await;
        }

        let stats = store.get_stats();
        assert_eq!((stats.hits, stats.misses), (2, 1));
        assert!((store.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn fetch_error_is_propagated_and_not_cached() {
        let store = store(10);

        let result = store
            .get("k", || async { Err::<String, _>(FetchError::msg("db down")) })
            .await;
        assert!(result.is_err());
        assert_eq!(store.size(), 0);

        let calls = AtomicUsize::new(0);
        store
            .get("k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FetchError>("recovered".to_string())
            })
            .await
            .expect("fetch succeeds");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_ttl_returns_value_without_storing() {
        let store = store(10);
        let value = store
            .get_with("k", EntryOptions::new().ttl(Duration::ZERO), || async {
                Ok::<_, Infallible>("once".to_string())
            })
            .await
            .expect("fetch");

        assert_eq!(value, "once");
        assert_eq!(store.size(), 0);
    }

    #[tokio::test]
    async fn clear_keeps_counters() {
        let store = store(10);
        fill_tagged(&store, "k", &["t"]).await;
        fill(&store, "k").await;

        store.clear();

        let stats = store.get_stats();
        assert_eq!(stats.size, 0);
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(store.tag_count(), 0);
    }

    #[tokio::test]
    async fn peek_does_not_touch_lru_order() {
        let store = store(2);
        fill(&store, "A").await;
        fill(&store, "B").await;

        assert!(store.peek("A").is_some());
        fill(&store, "C").await;

        assert!(!store.contains("A"));
        assert_eq!(store.keys(), vec!["C".to_string(), "B".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_sweeps_dead_entries() {
        let store = store(10);
        store.set(
            "short",
            "a".to_string(),
            EntryOptions::new().ttl(Duration::from_secs(1)).tag("t"),
        );
        store.set("forever", "b".to_string(), EntryOptions::new().no_expiry());

        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.keys(), vec!["forever".to_string()]);
        assert_eq!(store.tag_count(), 0);
    }

    #[tokio::test]
    async fn unrepresentable_ttls_store_without_expiry() {
        let store = CacheStore::<String>::new(CacheConfig {
            max_size: 4,
            default_ttl_secs: Some(u64::MAX),
        })
        .expect("valid cache config");

        fill(&store, "k").await;
        store.set("long", "v".to_string(), EntryOptions::new().ttl(Duration::MAX));

        assert!(store.contains("k"));
        assert!(store.contains("long"));
        assert_eq!(store.purge_expired(), 0);
    }

    #[tokio::test]
    async fn invalidation_during_fetch_skips_the_insert() {
        let store = store(10);

        let value = store
            .get_with("customer:1", EntryOptions::new().tag("customers"), || async {
                store.invalidate_by_tags(["customers"]);
                Ok::<_, Infallible>("pre-update".to_string())
            })
            .await
            .expect("fetch");
        assert_eq!(value, "pre-update");
        assert!(!store.contains("customer:1"));

        store
            .get("report:q1:rows", || async {
                store.invalidate_prefix("report:q1:");
                Ok::<_, Infallible>("rows".to_string())
            })
            .await
            .expect("fetch");
        assert!(!store.contains("report:q1:rows"));

        store
            .get("settings", || async {
                store.clear();
                Ok::<_, Infallible>("theme".to_string())
            })
            .await
            .expect("fetch");
        assert!(!store.contains("settings"));
    }

    #[tokio::test]
    async fn unrelated_invalidation_during_fetch_still_stores() {
        let store = store(10);

        store
            .get_with("lead:1", EntryOptions::new().tag("leads"), || async {
                store.invalidate("lead:2");
                store.invalidate_by_tags(["dashboard"]);
                Ok::<_, Infallible>("Acme".to_string())
            })
            .await
            .expect("fetch");

        assert_eq!(store.peek("lead:1").as_deref(), Some("Acme"));
    }

    #[tokio::test]
    async fn stale_fetch_does_not_affect_the_next_one() {
        let store = store(10);
        store
            .get("k", || async {
                store.invalidate("k");
                Ok::<_, Infallible>("stale".to_string())
            })
            .await
            .expect("fetch");

        fill(&store, "k").await;

        assert_eq!(store.peek("k").as_deref(), Some("value-of-k"));
    }

    #[tokio::test]
    async fn failed_and_cancelled_fetches_release_their_tickets() {
        let store = store(10);

        let _ = store
            .get("k", || async { Err::<String, _>(FetchError::msg("db down")) })
            .await;

        let pending = store.get("slow", || async {
            std::future::pending::<Result<String, Infallible>>().await
        });
        let cancelled = tokio::time::timeout(Duration::from_millis(1), pending).await;
        assert!(cancelled.is_err());

        assert!(mutex_lock(&store.state, SOURCE, "test").inflight.is_empty());
    }

    #[test]
    fn zero_capacity_is_a_configuration_error() {
        let result = CacheStore::<String>::new(CacheConfig::with_max_size(0));
        assert!(matches!(result, Err(ConfigurationError::ZeroCapacity)));
    }

    #[test]
    fn store_recovers_from_poisoned_lock() {
        let store = store(4);
        store.set("k", "v".to_string(), EntryOptions::new());

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.state.lock().expect("state lock should be acquired");
            panic!("poison state lock");
        }));

        assert_eq!(store.peek("k").as_deref(), Some("v"));
    }
}
