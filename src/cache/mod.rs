//! Opsdesk cache subsystem.
//!
//! A single in-process read-through cache shared by every portal read model:
//!
//! - **Store**: capacity-bounded LRU map with lazy TTL expiry and counters
//! - **Tags**: reverse index used for grouped invalidation
//! - **Pattern / prefix invalidation**: key-string matching for callers that
//!   only know a key's shape
//! - **Warmup**: concurrent bulk population with per-entry failure isolation
//!
//! Invalidation is normally driven by [`crate::events::InvalidationRouter`]
//! rather than called directly from write paths.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! max_size = 1000
//! default_ttl_secs = 300
//! ```

mod config;
mod entry;
mod erased;
mod error;
pub mod keys;
mod lock;
mod store;
mod tags;
mod warmup;

pub use config::CacheConfig;
pub use entry::{CacheEntry, EntryOptions, TagSet};
pub use erased::ErasedValue;
pub use error::{ConfigurationError, FetchError, InvalidationError};
pub use keys::{CacheKey, CacheTag};
pub use store::{CacheStats, CacheStore};
pub use tags::TagIndex;
pub use warmup::{WarmupEntry, WarmupFailure, WarmupReport, WarmupSummary};

pub(crate) use lock::mutex_lock;
