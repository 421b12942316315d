//! Reactive values mirrored into durable storage.
//!
//! A `PersistedValue` hydrates once from its storage key, writes every
//! update through to storage, and exposes the in-memory copy through a
//! `tokio::sync::watch` channel. With `spawn_sync` it also adopts writes made
//! to the same key by other storage contexts (last writer wins).

use std::marker::PhantomData;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::storage::{Storage, StorageError, StorageEvent};

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// How a stored string maps to and from `T`.
pub trait Codec<T> {
    fn encode(value: &T) -> Result<String, serde_json::Error>;
    fn decode(raw: &str) -> Result<T, serde_json::Error>;
}

/// JSON text, for any serde type.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl<T: Serialize + DeserializeOwned> Codec<T> for Json {
    fn encode(value: &T) -> Result<String, serde_json::Error> {
        serde_json::to_string(value)
    }

    fn decode(raw: &str) -> Result<T, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// The string stored verbatim; an empty entry reads as `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Raw;

impl Codec<Option<String>> for Raw {
    fn encode(value: &Option<String>) -> Result<String, serde_json::Error> {
        Ok(value.clone().unwrap_or_default())
    }

    fn decode(raw: &str) -> Result<Option<String>, serde_json::Error> {
        Ok(Some(raw).filter(|s| !s.is_empty()).map(str::to_string))
    }
}

/// Outcome of the initial read from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hydration {
    /// No entry was stored; started from the initial value.
    Absent,
    /// The stored entry was decoded.
    Restored,
    /// The entry could not be read or decoded; started from the initial value.
    Recovered,
}

pub struct PersistedValue<T, C = Json> {
    key: String,
    initial: T,
    storage: Arc<dyn Storage>,
    state: watch::Sender<T>,
    hydration: Hydration,
    codec: PhantomData<fn() -> C>,
}

impl<T, C> PersistedValue<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: Codec<T> + 'static,
{
    /// Hydrate from `key`, falling back to `initial` when the entry is
    /// missing, unreadable, or malformed. Never fails.
    pub fn open(storage: Arc<dyn Storage>, key: impl Into<String>, initial: T) -> Self {
        let key = key.into();
        let (value, hydration) = match storage.get_item(&key) {
            Ok(None) => (initial.clone(), Hydration::Absent),
            Ok(Some(raw)) => match C::decode(&raw) {
                Ok(value) => (value, Hydration::Restored),
                Err(e) => {
                    warn!(key = %key, error = %e, "Stored value is malformed, using initial value");
                    (initial.clone(), Hydration::Recovered)
                }
            },
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read stored value, using initial value");
                (initial.clone(), Hydration::Recovered)
            }
        };
        let (state, _) = watch::channel(value);

        Self {
            key,
            initial,
            storage,
            state,
            hydration,
            codec: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn hydration(&self) -> Hydration {
        self.hydration
    }

    pub fn get(&self) -> T {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.state.subscribe()
    }

    /// Write through to storage, then update the in-memory copy.
    ///
    /// The in-memory copy is updated even if the durable write fails; the
    /// storage error is still returned so the caller can report it.
    pub fn set(&self, value: T) -> Result<(), PersistError> {
        let encoded = C::encode(&value).map_err(|source| PersistError::Encode {
            key: self.key.clone(),
            source,
        })?;
        let written = self.storage.set_item(&self.key, &encoded);
        self.state.send_replace(value);
        written.map_err(PersistError::from)
    }

    /// Delete the stored entry and reset to the initial value.
    pub fn remove(&self) -> Result<(), StorageError> {
        let removed = self.storage.remove_item(&self.key);
        self.state.send_replace(self.initial.clone());
        removed
    }

    /// Adopt a change reported for this key. Returns whether the in-memory
    /// copy was updated; events for other keys are ignored.
    pub fn apply_event(&self, event: &StorageEvent) -> bool {
        if event.key != self.key {
            return false;
        }
        match event.new_value.as_deref() {
            None => {
                self.state.send_replace(self.initial.clone());
                true
            }
            Some(raw) => match C::decode(raw) {
                Ok(value) => {
                    self.state.send_replace(value);
                    true
                }
                Err(e) => {
                    warn!(key = %self.key, error = %e, "Ignoring malformed value from another context");
                    false
                }
            },
        }
    }

    /// Re-read the stored entry, keeping the current value if it cannot be
    /// read or decoded. Returns what the read found.
    pub fn reload(&self) -> Hydration {
        match self.storage.get_item(&self.key) {
            Ok(None) => {
                self.state.send_replace(self.initial.clone());
                Hydration::Absent
            }
            Ok(Some(raw)) => match C::decode(&raw) {
                Ok(value) => {
                    self.state.send_replace(value);
                    Hydration::Restored
                }
                Err(e) => {
                    warn!(key = %self.key, error = %e, "Stored value is malformed, keeping current value");
                    Hydration::Recovered
                }
            },
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to re-read stored value");
                Hydration::Recovered
            }
        }
    }

    /// Follow writes to this key made by other storage contexts.
    ///
    /// The subscription is taken before this returns, so no later write is
    /// missed. Dropping the handle ends the subscription.
    pub fn spawn_sync(self: &Arc<Self>) -> SyncHandle {
        let mut events = self.storage.subscribe();
        let own_context = self.storage.context();
        let weak = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            loop {
                let received = events.recv().await;
                let Some(value) = weak.upgrade() else {
                    break;
                };
                match received {
                    Ok(event) if event.origin == own_context => {}
                    Ok(event) => {
                        if value.apply_event(&event) {
                            debug!(key = %value.key, "Adopted value written by another context");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(key = %value.key, skipped = skipped, "Storage events lagged, re-reading value");
                        value.reload();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        SyncHandle { task }
    }
}

/// Keeps a cross-context subscription alive; dropping it unsubscribes.
#[derive(Debug)]
pub struct SyncHandle {
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::Deserialize;

    use super::*;
    use crate::storage::testing::FailingStorage;
    use crate::storage::MemoryStorage;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Prefs {
        belt: String,
        classes: u32,
    }

    fn prefs() -> Prefs {
        Prefs {
            belt: "white".to_string(),
            classes: 0,
        }
    }

    #[test]
    fn test_open_without_entry_uses_initial() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let value: PersistedValue<Prefs> = PersistedValue::open(storage, "prefs", prefs());
        assert_eq!(value.get(), prefs());
        assert_eq!(value.hydration(), Hydration::Absent);
    }

    #[test]
    fn test_open_restores_stored_json() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set_item("prefs", r#"{"belt":"blue","classes":12}"#)
            .unwrap();
        let value: PersistedValue<Prefs> = PersistedValue::open(storage, "prefs", prefs());
        assert_eq!(value.get().belt, "blue");
        assert_eq!(value.hydration(), Hydration::Restored);
    }

    #[test]
    fn test_open_recovers_from_malformed_entry() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item("prefs", "{not json").unwrap();
        let value: PersistedValue<Prefs> = PersistedValue::open(storage, "prefs", prefs());
        assert_eq!(value.get(), prefs());
        assert_eq!(value.hydration(), Hydration::Recovered);
    }

    #[test]
    fn test_open_recovers_from_read_failure() {
        let storage = Arc::new(FailingStorage::new());
        storage
            .inner()
            .set_item("prefs", r#"{"belt":"blue","classes":12}"#)
            .unwrap();
        storage.fail_reads(true);

        let value: PersistedValue<Prefs> = PersistedValue::open(storage, "prefs", prefs());
        assert_eq!(value.get(), prefs());
        assert_eq!(value.hydration(), Hydration::Recovered);
    }

    #[test]
    fn test_set_updates_value_when_write_fails() {
        let storage = Arc::new(FailingStorage::new());
        let value: PersistedValue<u32> = PersistedValue::open(storage.clone(), "count", 0);
        let mut rx = value.subscribe();
        storage.fail_writes(true);

        let err = value.set(5).unwrap_err();
        assert!(matches!(err, PersistError::Storage(StorageError::Io(_))));
        assert_eq!(value.get(), 5);
        assert!(rx.has_changed().unwrap());
        assert_eq!(storage.inner().get_item("count").unwrap(), None);
    }

    #[test]
    fn test_reload_reports_what_it_found() {
        let storage = Arc::new(MemoryStorage::new());
        let value: PersistedValue<u32> = PersistedValue::open(storage.clone(), "count", 0);

        storage.set_item("count", "7").unwrap();
        assert_eq!(value.reload(), Hydration::Restored);
        assert_eq!(value.get(), 7);

        storage.set_item("count", "seven").unwrap();
        assert_eq!(value.reload(), Hydration::Recovered);
        assert_eq!(value.get(), 7);

        storage.remove_item("count").unwrap();
        assert_eq!(value.reload(), Hydration::Absent);
        assert_eq!(value.get(), 0);
    }

    #[test]
    fn test_set_writes_through_and_remove_resets() {
        let storage = Arc::new(MemoryStorage::new());
        let value: PersistedValue<Prefs> =
            PersistedValue::open(storage.clone(), "prefs", prefs());

        let updated = Prefs {
            belt: "green".to_string(),
            classes: 30,
        };
        value.set(updated.clone()).unwrap();
        assert_eq!(value.get(), updated);
        assert_eq!(
            storage.get_item("prefs").unwrap().as_deref(),
            Some(r#"{"belt":"green","classes":30}"#)
        );

        value.remove().unwrap();
        assert_eq!(value.get(), prefs());
        assert_eq!(storage.get_item("prefs").unwrap(), None);
    }

    #[test]
    fn test_raw_codec_stores_token_verbatim() {
        let storage = Arc::new(MemoryStorage::new());
        let token: PersistedValue<Option<String>, Raw> =
            PersistedValue::open(storage.clone(), "authToken", None);
        assert_eq!(token.hydration(), Hydration::Absent);

        token.set(Some("eyJhbGciOi.abc".to_string())).unwrap();
        assert_eq!(
            storage.get_item("authToken").unwrap().as_deref(),
            Some("eyJhbGciOi.abc")
        );

        let reopened: PersistedValue<Option<String>, Raw> =
            PersistedValue::open(storage, "authToken", None);
        assert_eq!(reopened.get().as_deref(), Some("eyJhbGciOi.abc"));
    }

    #[test]
    fn test_subscribers_see_updates() {
        let storage = Arc::new(MemoryStorage::new());
        let value: PersistedValue<u32> = PersistedValue::open(storage, "count", 0);
        let mut rx = value.subscribe();
        value.set(5).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 5);
    }

    #[test]
    fn test_event_for_same_key_is_adopted() {
        let storage = Arc::new(MemoryStorage::new());
        let other = storage.open_context();
        let value: PersistedValue<String> =
            PersistedValue::open(storage, "testKey", "initial".to_string());

        let event = StorageEvent::new("testKey", Some("\"from another tab\"".to_string()), other.context());
        assert!(value.apply_event(&event));
        assert_eq!(value.get(), "from another tab");
    }

    #[test]
    fn test_event_for_other_key_is_ignored() {
        let storage = Arc::new(MemoryStorage::new());
        let other = storage.open_context();
        let value: PersistedValue<String> =
            PersistedValue::open(storage, "testKey", "initial".to_string());

        let event = StorageEvent::new("otherKey", Some("\"nope\"".to_string()), other.context());
        assert!(!value.apply_event(&event));
        assert_eq!(value.get(), "initial");
    }

    #[test]
    fn test_removal_event_resets_and_malformed_event_is_ignored() {
        let storage = Arc::new(MemoryStorage::new());
        let other = storage.open_context();
        let value: PersistedValue<String> =
            PersistedValue::open(storage, "testKey", "initial".to_string());
        value.set("mine".to_string()).unwrap();

        let malformed = StorageEvent::new("testKey", Some("{oops".to_string()), other.context());
        assert!(!value.apply_event(&malformed));
        assert_eq!(value.get(), "mine");

        let removed = StorageEvent::new("testKey", None, other.context());
        assert!(value.apply_event(&removed));
        assert_eq!(value.get(), "initial");
    }

    #[tokio::test]
    async fn test_sync_adopts_writes_from_other_context() {
        let tab_a = Arc::new(MemoryStorage::new());
        let tab_b: Arc<dyn Storage> = Arc::new(tab_a.open_context());

        let mirror: Arc<PersistedValue<String>> =
            Arc::new(PersistedValue::open(tab_a, "testKey", "initial".to_string()));
        let _sync = mirror.spawn_sync();
        let mut rx = mirror.subscribe();

        let writer: PersistedValue<String> =
            PersistedValue::open(tab_b, "testKey", "initial".to_string());
        writer.set("updated".to_string()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("no update within timeout")
            .unwrap();
        assert_eq!(mirror.get(), "updated");
    }

    #[tokio::test]
    async fn test_sync_ignores_own_context_writes() {
        let storage = Arc::new(MemoryStorage::new());
        let mirror: Arc<PersistedValue<String>> =
            Arc::new(PersistedValue::open(storage.clone(), "testKey", "initial".to_string()));
        let _sync = mirror.spawn_sync();

        // Raw write from the same context: not announced to ourselves
        storage.set_item("testKey", "\"sneaky\"").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mirror.get(), "initial");
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_sync() {
        let tab_a = Arc::new(MemoryStorage::new());
        let tab_b = tab_a.open_context();
        let mirror: Arc<PersistedValue<String>> =
            Arc::new(PersistedValue::open(tab_a, "testKey", "initial".to_string()));

        let sync = mirror.spawn_sync();
        assert!(sync.is_running());
        drop(sync);
        tokio::task::yield_now().await;

        tab_b.set_item("testKey", "\"late\"").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mirror.get(), "initial");
    }
}
