//! Opsdesk: the caching core of a business-operations portal.
//!
//! A read-through [`cache::CacheStore`] keeps portal read models in memory,
//! and an in-process [`events::EventBus`] carries "data changed" events to an
//! [`events::InvalidationRouter`] that drops whatever those changes made stale.

pub mod application;
pub mod cache;
pub mod config;
pub mod events;
pub mod infra;
