//! Reverse index from tag to cache keys.
//!
//! The index holds no lock of its own: it lives inside the store's state and
//! is updated under the same mutex as the entry map, once per add and once per
//! remove. It never inspects expiry.

use std::collections::{HashMap, HashSet};

use super::entry::TagSet;

/// Maps each tag to the set of keys currently carrying it.
///
/// Empty buckets are removed eagerly, so `tag_count` only counts tags that
/// still have at least one live entry.
#[derive(Debug, Default)]
pub struct TagIndex {
    tag_to_keys: HashMap<String, HashSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` carries every tag in `tags`.
    pub fn register(&mut self, key: &str, tags: &TagSet) {
        for tag in tags {
            self.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Forget `key` under every tag in `tags`, dropping buckets that empty.
    pub fn deregister(&mut self, key: &str, tags: &TagSet) {
        for tag in tags {
            if let Some(keys) = self.tag_to_keys.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_to_keys.remove(tag);
                }
            }
        }
    }

    /// Union of the keys carrying any of `tags`.
    pub fn keys_for_tags<'a, I>(&self, tags: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut keys = HashSet::new();
        for tag in tags {
            if let Some(bucket) = self.tag_to_keys.get(tag) {
                keys.extend(bucket.iter().cloned());
            }
        }
        keys
    }

    pub fn keys_for_tag(&self, tag: &str) -> HashSet<String> {
        self.keys_for_tags([tag])
    }

    pub fn contains(&self, tag: &str, key: &str) -> bool {
        self.tag_to_keys
            .get(tag)
            .is_some_and(|keys| keys.contains(key))
    }

    pub fn clear(&mut self) {
        self.tag_to_keys.clear();
    }

    /// Number of tags with at least one key.
    pub fn tag_count(&self) -> usize {
        self.tag_to_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tag_to_keys.is_empty()
    }
}
