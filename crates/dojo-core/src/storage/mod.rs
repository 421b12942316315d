//! Durable key/value storage with a change-notification channel.
//!
//! This module provides:
//! - `Storage`: the trait persisted values are written through
//! - `MemoryStorage`: an in-process store, mostly for tests and ephemeral runs
//! - `FileStorage`: a directory-backed store, one file per key
//!
//! A store may be opened from several contexts (think browser tabs). Each
//! write is announced as a `StorageEvent` to every context sharing the store;
//! a context is expected to ignore events carrying its own `ContextId`.

pub mod file;
pub mod memory;

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::broadcast;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Key holding the bearer token, stored verbatim (not JSON-encoded).
pub const AUTH_TOKEN_KEY: &str = "authToken";

/// Key holding the signed-in user's profile as JSON.
pub const USER_KEY: &str = "user";

/// Buffered change events per subscriber before it starts lagging.
const EVENT_BUFFER_SIZE: usize = 64;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),
}

/// Identifies one context (tab, process, window) attached to a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

/// A mutation made through some context, as seen by the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// `None` when the entry was removed.
    pub new_value: Option<String>,
    pub origin: ContextId,
}

impl StorageEvent {
    pub fn new(key: impl Into<String>, new_value: Option<String>, origin: ContextId) -> Self {
        Self {
            key: key.into(),
            new_value,
            origin,
        }
    }
}

pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// The context this handle writes as.
    fn context(&self) -> ContextId;

    /// Receive every change made to the store, including this context's own.
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

/// Change channel and context allocator shared by all handles on one store.
#[derive(Debug)]
pub(crate) struct ChangeBus {
    sender: broadcast::Sender<StorageEvent>,
    next_context: AtomicU64,
}

impl ChangeBus {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            sender,
            next_context: AtomicU64::new(1),
        }
    }

    pub(crate) fn allocate_context(&self) -> ContextId {
        ContextId(self.next_context.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn publish(&self, key: &str, new_value: Option<&str>, origin: ContextId) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.sender.send(StorageEvent::new(
            key,
            new_value.map(str::to_string),
            origin,
        ));
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::broadcast;

    use super::{ContextId, MemoryStorage, Storage, StorageError, StorageEvent};

    /// A `MemoryStorage` whose reads or writes can be switched to fail.
    #[derive(Default)]
    pub(crate) struct FailingStorage {
        inner: MemoryStorage,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl FailingStorage {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        /// The backing store, bypassing the failure switches.
        pub(crate) fn inner(&self) -> &MemoryStorage {
            &self.inner
        }

        fn check(flag: &AtomicBool) -> Result<(), StorageError> {
            if flag.load(Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "storage is not accessible",
                )));
            }
            Ok(())
        }
    }

    impl Storage for FailingStorage {
        fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            Self::check(&self.fail_reads)?;
            self.inner.get_item(key)
        }

        fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
            Self::check(&self.fail_writes)?;
            self.inner.set_item(key, value)
        }

        fn remove_item(&self, key: &str) -> Result<(), StorageError> {
            Self::check(&self.fail_writes)?;
            self.inner.remove_item(key)
        }

        fn context(&self) -> ContextId {
            self.inner.context()
        }

        fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
            self.inner.subscribe()
        }
    }
}
