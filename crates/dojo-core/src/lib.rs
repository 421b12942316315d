//! Core library for dojo, the studio management client.
//!
//! This crate holds everything below the user interface:
//!
//! - `cache`: bounded LRU cache and the response cache built on it
//! - `storage`: durable key/value stores with change notification
//! - `persisted`: reactive values mirrored into storage
//! - `api`: the REST client and its session-expiry hook
//! - `session`: login, logout and session-expiry handling
//! - `config`: user configuration
//! - `models`: wire and persisted data types

pub mod api;
pub mod cache;
pub mod config;
pub mod models;
pub mod persisted;
pub mod session;
pub mod storage;

pub use api::{ApiError, HttpClient, SessionExpiryHook};
pub use cache::{BoundedCache, CacheProvider, QueryCache, SharedCache};
pub use config::Config;
pub use persisted::PersistedValue;
pub use session::{SessionCoordinator, SessionStatus};
pub use storage::{FileStorage, MemoryStorage, Storage};
