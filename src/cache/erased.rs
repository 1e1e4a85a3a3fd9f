//! Heterogeneous caching over a single store.
//!
//! The portal keeps one cache for every kind of read model, so values are
//! stored type-erased and recovered with a checked downcast.

use std::any::{Any, type_name};
use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use super::entry::EntryOptions;
use super::store::CacheStore;

/// A cached value of any `Send + Sync` type.
pub type ErasedValue = Arc<dyn Any + Send + Sync>;

impl CacheStore<ErasedValue> {
    /// Typed read-through lookup.
    ///
    /// A hit holding a different type than `T` is logged and treated as a
    /// miss: `fetch` runs and its result overwrites the entry. Invalidations
    /// that land during the fetch apply as in [`CacheStore::get_with`].
    pub async fn get_typed<T, F, Fut, E>(
        &self,
        key: &str,
        options: EntryOptions,
        fetch: F,
    ) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.lookup(key) {
            match value.downcast::<T>() {
                Ok(typed) => return Ok(typed),
                Err(_) => warn!(
                    key,
                    expected = type_name::<T>(),
                    "cached value has an unexpected type; refetching"
                ),
            }
        }

        let ticket = self.begin_fetch(key, options.tag_set());
        let value = Arc::new(fetch().await?);
        let erased: ErasedValue = value.clone();
        self.complete_fetch(ticket, key, erased, options);
        Ok(value)
    }

    /// Store a typed value directly.
    pub fn set_typed<T>(&self, key: &str, value: T, options: EntryOptions)
    where
        T: Any + Send + Sync,
    {
        self.set(key, Arc::new(value), options);
    }

    /// Peek at a live value of type `T`; `None` when absent, expired or of
    /// another type.
    pub fn peek_typed<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.peek(key)?.downcast::<T>().ok()
    }
}
