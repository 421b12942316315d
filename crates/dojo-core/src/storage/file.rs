use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::{ChangeBus, ContextId, Storage, StorageError, StorageEvent};

/// Directory-backed storage: each key is a file holding the raw value.
///
/// Change events reach every handle opened from the same `FileStorage`
/// (via `open_context`); writes from other processes are not observed.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    bus: Arc<ChangeBus>,
    context: ContextId,
}

impl FileStorage {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let bus = ChangeBus::new();
        let context = bus.allocate_context();
        Ok(Self {
            dir,
            bus: Arc::new(bus),
            context,
        })
    }

    pub fn open_context(&self) -> Self {
        Self {
            dir: self.dir.clone(),
            bus: Arc::clone(&self.bus),
            context: self.bus.allocate_context(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn item_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        if !is_valid_key(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }
}

/// Keys become file names, so only a conservative character set is allowed.
fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.item_path(key)?;
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.item_path(key)?;
        // Write then rename so readers never see a half-written value
        let tmp = self.dir.join(format!(".{}.tmp", key));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        debug!(key = key, "Stored item");
        self.bus.publish(key, Some(value), self.context);
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let path = self.item_path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(key = key, "Removed item");
                self.bus.publish(key, None, self.context);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn context(&self) -> ContextId {
        self.context
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.bus.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("authToken"));
        assert!(is_valid_key("user"));
        assert!(is_valid_key("query-cache_v1.json"));

        assert!(!is_valid_key(""));
        assert!(!is_valid_key(".hidden"));
        assert!(!is_valid_key("../escape"));
        assert!(!is_valid_key("a/b"));
        assert!(!is_valid_key("with space"));
    }

    #[test]
    fn test_round_trip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = FileStorage::open(dir.path()).unwrap();
            storage.set_item("authToken", "abc.def").unwrap();
        }
        let storage = FileStorage::open(dir.path()).unwrap();
        assert_eq!(storage.get_item("authToken").unwrap().as_deref(), Some("abc.def"));

        storage.remove_item("authToken").unwrap();
        assert_eq!(storage.get_item("authToken").unwrap(), None);
        storage.remove_item("authToken").unwrap();
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        assert!(matches!(
            storage.set_item("../user", "x"),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_contexts_see_each_others_writes() {
        let dir = tempfile::tempdir().unwrap();
        let first = FileStorage::open(dir.path()).unwrap();
        let second = first.open_context();
        let mut events = second.subscribe();

        first.set_item("user", "{\"id\":1}").unwrap();
        let event = events.try_recv().unwrap();
        assert_eq!(event.key, "user");
        assert_eq!(event.origin, first.context());
        assert_ne!(event.origin, second.context());
        assert_eq!(second.get_item("user").unwrap().as_deref(), Some("{\"id\":1}"));
    }
}
