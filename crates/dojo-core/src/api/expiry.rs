//! Notification channel for "the server rejected our credentials".
//!
//! The client owns a `SessionExpiryHook` and calls `notify` whenever a
//! response comes back 401. Whoever owns the session installs a callback in
//! the single primary slot (last writer wins); other parties can add
//! listeners that are removed when their `ExpirySubscription` is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

pub type ExpiryCallback = Arc<dyn Fn() + Send + Sync>;

fn noop() -> ExpiryCallback {
    Arc::new(|| {})
}

struct HookInner {
    slot: RwLock<ExpiryCallback>,
    listeners: Mutex<Vec<(u64, ExpiryCallback)>>,
    next_listener: AtomicU64,
}

#[derive(Clone)]
pub struct SessionExpiryHook {
    inner: Arc<HookInner>,
}

impl Default for SessionExpiryHook {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionExpiryHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionExpiryHook")
            .field("listeners", &self.inner.listeners.lock().len())
            .finish()
    }
}

impl SessionExpiryHook {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HookInner {
                slot: RwLock::new(noop()),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    /// Replace the primary callback.
    pub fn set_callback(&self, callback: ExpiryCallback) {
        *self.inner.slot.write() = callback;
    }

    /// Install a no-op as the primary callback.
    pub fn clear(&self) {
        self.set_callback(noop());
    }

    /// Clear the primary slot only if it still holds `callback`.
    ///
    /// Returns `false` when someone else registered in the meantime, in which
    /// case their callback is left in place.
    pub fn release(&self, callback: &ExpiryCallback) -> bool {
        let mut slot = self.inner.slot.write();
        if Arc::ptr_eq(&*slot, callback) {
            *slot = noop();
            true
        } else {
            false
        }
    }

    /// Whether `callback` is the installed primary callback.
    pub fn is_installed(&self, callback: &ExpiryCallback) -> bool {
        Arc::ptr_eq(&*self.inner.slot.read(), callback)
    }

    /// Add a listener alongside the primary callback.
    pub fn subscribe(&self, callback: impl Fn() + Send + Sync + 'static) -> ExpirySubscription {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        let callback: ExpiryCallback = Arc::new(callback);
        self.inner.listeners.lock().push((id, callback));
        ExpirySubscription {
            id,
            hook: Arc::downgrade(&self.inner),
        }
    }

    /// Invoke the primary callback and every listener once.
    pub fn notify(&self) {
        // Snapshot first so callbacks may re-register without deadlocking
        let primary = Arc::clone(&*self.inner.slot.read());
        let listeners: Vec<ExpiryCallback> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        debug!(listeners = listeners.len(), "Notifying session expiry");
        primary();
        for listener in listeners {
            listener();
        }
    }
}

/// Removes its listener from the hook when dropped.
#[must_use = "dropping the subscription removes the listener immediately"]
pub struct ExpirySubscription {
    id: u64,
    hook: Weak<HookInner>,
}

impl Drop for ExpirySubscription {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.upgrade() {
            hook.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}
