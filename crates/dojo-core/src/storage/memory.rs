use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::{ChangeBus, ContextId, Storage, StorageError, StorageEvent};

#[derive(Debug)]
struct Shared {
    items: RwLock<HashMap<String, String>>,
    bus: ChangeBus,
}

/// In-process storage. Handles from `open_context` share items and the
/// change channel but write under their own `ContextId`.
#[derive(Debug)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
    context: ContextId,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        let bus = ChangeBus::new();
        let context = bus.allocate_context();
        Self {
            shared: Arc::new(Shared {
                items: RwLock::new(HashMap::new()),
                bus,
            }),
            context,
        }
    }

    /// Another handle on the same store, as a separate context.
    pub fn open_context(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            context: self.shared.bus.allocate_context(),
        }
    }

    pub fn len(&self) -> usize {
        self.shared.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.items.read().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.shared.items.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.shared
            .items
            .write()
            .insert(key.to_string(), value.to_string());
        self.shared.bus.publish(key, Some(value), self.context);
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let removed = self.shared.items.write().remove(key);
        if removed.is_some() {
            self.shared.bus.publish(key, None, self.context);
        }
        Ok(())
    }

    fn context(&self) -> ContextId {
        self.context
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.shared.bus.subscribe()
    }
}
