use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiError, AuthToken, ExpiryCallback, HttpClient};
use crate::models::{Credentials, UserProfile};
use crate::persisted::{Hydration, PersistedValue, SyncHandle};
use crate::storage::{Storage, USER_KEY};

/// Shown to the user after the backend rejects their token.
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Loading,
    Unauthenticated,
    Authenticated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub user: Option<UserProfile>,
    pub expired_message: Option<String>,
}

impl SessionSnapshot {
    fn loading() -> Self {
        Self {
            status: SessionStatus::Loading,
            user: None,
            expired_message: None,
        }
    }

    fn authenticated(user: UserProfile) -> Self {
        Self {
            status: SessionStatus::Authenticated,
            user: Some(user),
            expired_message: None,
        }
    }

    fn signed_out(expired_message: Option<String>) -> Self {
        Self {
            status: SessionStatus::Unauthenticated,
            user: None,
            expired_message,
        }
    }
}

/// Owns the signed-in state: hydration from storage, login, logout and the
/// reaction to an expired session.
///
/// The coordinator shares its token mirror with the `HttpClient`, so a login
/// is visible to the next request immediately. While active, its expiry
/// callback is installed on the client's hook; dropping the coordinator
/// removes it again (unless another coordinator has replaced it since).
pub struct SessionCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    http: HttpClient,
    token: Arc<AuthToken>,
    user: Arc<PersistedValue<Option<UserProfile>>>,
    state: watch::Sender<SessionSnapshot>,
    expiry_callback: ExpiryCallback,
}

impl SessionCoordinator {
    /// Create a coordinator in the `Loading` state.
    ///
    /// `storage` must be the store the client reads its token from.
    pub fn new(http: HttpClient, storage: Arc<dyn Storage>) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<CoordinatorInner>| {
            let weak = weak.clone();
            let expiry_callback: ExpiryCallback = Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_session_expired();
                }
            });
            let (state, _) = watch::channel(SessionSnapshot::loading());

            CoordinatorInner {
                token: Arc::clone(http.auth_token()),
                user: Arc::new(PersistedValue::open(storage, USER_KEY, None)),
                http,
                state,
                expiry_callback,
            }
        });
        Self { inner }
    }

    /// `new` followed by `activate`.
    pub fn start(http: HttpClient, storage: Arc<dyn Storage>) -> Self {
        let coordinator = Self::new(http, storage);
        coordinator.activate();
        coordinator
    }

    /// Leave `Loading` based on what is persisted and start listening for
    /// expired sessions. Only the first call has any effect.
    pub fn activate(&self) {
        if self.inner.state.borrow().status != SessionStatus::Loading {
            return;
        }
        let snapshot = self.inner.hydrate();
        debug!(status = ?snapshot.status, "Session hydrated");
        self.inner.state.send_replace(snapshot);
        self.inner
            .http
            .session_expiry()
            .set_callback(Arc::clone(&self.inner.expiry_callback));
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.borrow().status
    }

    pub fn is_loading(&self) -> bool {
        self.status() == SessionStatus::Loading
    }

    pub fn is_authenticated(&self) -> bool {
        self.status() == SessionStatus::Authenticated
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.inner.state.borrow().user.clone()
    }

    pub fn session_expired_message(&self) -> Option<String> {
        self.inner.state.borrow().expired_message.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn http(&self) -> &HttpClient {
        &self.inner.http
    }

    /// The callback this coordinator installs on the client's expiry hook.
    /// The same `Arc` is returned for the coordinator's whole lifetime.
    pub fn expiry_callback(&self) -> ExpiryCallback {
        Arc::clone(&self.inner.expiry_callback)
    }

    /// Sign in. On failure nothing is persisted, the state is left as it
    /// was, and the client's error is returned unchanged.
    ///
    /// Token and profile are written separately; if a write fails the
    /// in-memory session is still established and the failure is logged.
    pub async fn login(&self, credentials: &Credentials) -> Result<UserProfile, ApiError> {
        let response = self.inner.http.login(credentials).await?;

        if let Err(e) = self.inner.token.set(Some(response.token)) {
            warn!(error = %e, "Failed to persist auth token");
        }
        if let Err(e) = self.inner.user.set(Some(response.user.clone())) {
            warn!(error = %e, "Failed to persist user profile");
        }
        self.inner
            .state
            .send_replace(SessionSnapshot::authenticated(response.user.clone()));

        info!(user_id = response.user.id, "Logged in");
        Ok(response.user)
    }

    /// Sign out. Safe to call when already signed out.
    pub fn logout(&self) {
        self.inner.clear_persisted();
        self.inner.state.send_replace(SessionSnapshot::signed_out(None));
        info!("Logged out");
    }

    /// Sign out because the backend rejected the token, leaving a message
    /// for the user. Safe to call when already signed out.
    pub fn handle_session_expired(&self) {
        self.inner.handle_session_expired();
    }

    /// Follow sign-ins and sign-outs made through other storage contexts.
    /// Dropping the returned handle stops following.
    pub fn sync_across_contexts(&self) -> SessionSync {
        let token_sync = self.inner.token.spawn_sync();
        let user_sync = self.inner.user.spawn_sync();
        let mut token_rx = self.inner.token.subscribe();
        let mut user_rx = self.inner.user.subscribe();
        let weak = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = token_rx.changed() => if changed.is_err() { break },
                    changed = user_rx.changed() => if changed.is_err() { break },
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.reconcile();
            }
        });

        SessionSync {
            _token: token_sync,
            _user: user_sync,
            task,
        }
    }
}

impl CoordinatorInner {
    fn hydrate(&self) -> SessionSnapshot {
        // Storage may have changed since the mirrors were opened
        let token = self.token.reload();
        let user = self.user.reload();

        // Corruption counts as absence, and the leftovers are removed
        if token == Hydration::Recovered || user == Hydration::Recovered {
            warn!("Stored session is unreadable, clearing it");
            self.clear_persisted();
            return SessionSnapshot::signed_out(None);
        }

        match (self.token.get(), self.user.get()) {
            (Some(_), Some(user)) => SessionSnapshot::authenticated(user),
            _ => SessionSnapshot::signed_out(None),
        }
    }

    fn handle_session_expired(&self) {
        self.clear_persisted();
        self.state.send_replace(SessionSnapshot::signed_out(Some(
            SESSION_EXPIRED_MESSAGE.to_string(),
        )));
        info!("Session expired");
    }

    fn clear_persisted(&self) {
        if let Err(e) = self.token.remove() {
            warn!(error = %e, "Failed to remove stored auth token");
        }
        if let Err(e) = self.user.remove() {
            warn!(error = %e, "Failed to remove stored user profile");
        }
    }

    /// Derive the signed-in state from the persisted mirrors after another
    /// context changed them.
    fn reconcile(&self) {
        let token = self.token.get();
        let user = self.user.get();
        let changed = self.state.send_if_modified(|snapshot| match (token, user) {
            _ if snapshot.status == SessionStatus::Loading => false,
            (Some(_), Some(user)) => {
                if snapshot.status == SessionStatus::Authenticated
                    && snapshot.user.as_ref() == Some(&user)
                {
                    return false;
                }
                *snapshot = SessionSnapshot::authenticated(user);
                true
            }
            _ => {
                if snapshot.status != SessionStatus::Authenticated {
                    return false;
                }
                *snapshot = SessionSnapshot::signed_out(None);
                true
            }
        });
        if changed {
            debug!(status = ?self.state.borrow().status, "Session changed in another context");
        }
    }
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        if self.http.session_expiry().release(&self.expiry_callback) {
            debug!("Released session expiry callback");
        }
    }
}

/// Keeps a coordinator in step with other contexts; dropping it stops.
pub struct SessionSync {
    _token: SyncHandle,
    _user: SyncHandle,
    task: JoinHandle<()>,
}

impl Drop for SessionSync {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// Tests
// ============================================================================
