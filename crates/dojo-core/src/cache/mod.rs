//! In-memory caching for fetched data.
//!
//! This module provides:
//! - `BoundedCache`: a fixed-capacity LRU map (default 20 entries)
//! - `CacheProvider`: the get/set/delete/keys contract a fetch layer plugs into
//! - `SharedCache`: a thread-safe `BoundedCache` implementing that contract
//! - `QueryCache`: GET responses cached by path on top of any provider
//!
//! Eviction is by entry count only; entry sizes are not considered.

pub mod bounded;
pub mod provider;
pub mod query;

pub use bounded::{BoundedCache, CacheError, Keys, DEFAULT_MAX_SIZE};
pub use provider::{CacheProvider, SharedCache};
pub use query::{CachedData, QueryCache};
