//! Application services: the dependency root and the cache clients built on it.

pub mod context;
pub mod customers;
pub mod error;
pub mod simulate;
