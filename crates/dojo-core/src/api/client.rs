//! HTTP client for the studio REST backend.
//!
//! Every request goes through one pipeline that attaches the bearer token
//! from persisted state, backs off on rate limiting, and reports 401
//! responses to the `SessionExpiryHook` before returning the error.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::expiry::SessionExpiryHook;
use super::ApiError;
use crate::models::{Credentials, LoginResponse};
use crate::persisted::{PersistedValue, Raw};
use crate::storage::{MemoryStorage, Storage, AUTH_TOKEN_KEY};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Login endpoint, relative to the base URL.
const LOGIN_PATH: &str = "auth/login";

/// The persisted bearer token as seen by the client.
pub type AuthToken = PersistedValue<Option<String>, Raw>;

/// API client for the studio backend.
/// Clone is cheap - all clones share one connection pool, token and hook.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: Client,
    base_url: Url,
    token: Arc<AuthToken>,
    expiry: SessionExpiryHook,
    max_retries: u32,
    initial_backoff: Duration,
}

/// Whether a 401 on this request means the session expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpiryCheck {
    Notify,
    Skip,
}

impl HttpClient {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// The token mirror requests read from. Shared with whoever signs in.
    pub fn auth_token(&self) -> &Arc<AuthToken> {
        &self.inner.token
    }

    pub fn session_expiry(&self) -> &SessionExpiryHook {
        &self.inner.expiry
    }

    /// Replace the callback run when a request comes back 401.
    /// Passing a no-op closure silences notification.
    pub fn set_session_expired_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.expiry.set_callback(Arc::new(callback));
    }

    /// Build a URL for an API path.
    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        let path = path.trim_start_matches('/');
        Ok(self.inner.base_url.join(path)?)
    }

    /// Authenticate and return the issued token and profile.
    ///
    /// A rejected login is reported as an error only; it never counts as an
    /// expired session.
    pub async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError> {
        debug!(email = %credentials.email, "Logging in");
        let response = self
            .execute(Method::POST, LOGIN_PATH, Some(credentials), ExpiryCheck::Skip)
            .await?;
        Self::decode(response).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self
            .execute(Method::GET, path, None::<&()>, ExpiryCheck::Notify)
            .await?;
        Self::decode(response).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self
            .execute(Method::POST, path, Some(body), ExpiryCheck::Notify)
            .await?;
        Self::decode(response).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self
            .execute(Method::PUT, path, Some(body), ExpiryCheck::Notify)
            .await?;
        Self::decode(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(Method::DELETE, path, None::<&()>, ExpiryCheck::Notify)
            .await?;
        Ok(())
    }

    fn bearer_token(&self) -> Option<String> {
        self.inner.token.get().filter(|token| !token.is_empty())
    }

    async fn execute<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        expiry: ExpiryCheck,
    ) -> Result<Response, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.url(path)?;
        let mut retries = 0;
        let mut backoff = self.inner.initial_backoff;

        loop {
            let mut request = self.inner.http.request(method.clone(), url.clone());
            if let Some(body) = body {
                request = request.json(body);
            }
            // Only touch the Authorization header when we hold a token
            if let Some(token) = self.bearer_token() {
                request = request.bearer_auth(token);
            }

            let response = request.send().await.map_err(|e| {
                warn!(method = %method, url = %url, error = %e, "Request failed to send");
                ApiError::Network(e)
            })?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::TOO_MANY_REQUESTS && retries < self.inner.max_retries {
                retries += 1;
                warn!(
                    url = %url,
                    retry = retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            let error = ApiError::from_status(status, &body);
            if error.is_unauthorized() && expiry == ExpiryCheck::Notify {
                warn!(method = %method, url = %url, "Credentials rejected, signalling session expiry");
                self.inner.expiry.notify();
            }
            return Err(error);
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let url = response.url().clone();
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::Decode(format!("{} from {}", e, url)))
    }
}

/// Builder for creating an `HttpClient`.
pub struct ClientBuilder {
    base_url: Option<String>,
    storage: Option<Arc<dyn Storage>>,
    token: Option<Arc<AuthToken>>,
    expiry: SessionExpiryHook,
    timeout: Duration,
    max_retries: u32,
    initial_backoff: Duration,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            storage: None,
            token: None,
            expiry: SessionExpiryHook::new(),
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            max_retries: MAX_RATE_LIMIT_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Storage the bearer token is read from. Defaults to a fresh
    /// in-memory store.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Share an existing token mirror instead of opening one from storage.
    pub fn auth_token(mut self, token: Arc<AuthToken>) -> Self {
        self.token = Some(token);
        self
    }

    /// Report 401s to an existing hook instead of a private one.
    pub fn expiry_hook(mut self, hook: SessionExpiryHook) -> Self {
        self.expiry = hook;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_rate_limit_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn build(self) -> Result<HttpClient, ApiError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ApiError::Config("base_url is required".to_string()))?;

        // Parse and normalize base URL so relative joins keep its path
        let mut base_url = Url::parse(&base_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let http = Client::builder()
            .timeout(self.timeout)
            .user_agent(format!("dojo/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        let token = match self.token {
            Some(token) => token,
            None => {
                let storage: Arc<dyn Storage> = match self.storage {
                    Some(storage) => storage,
                    None => Arc::new(MemoryStorage::new()),
                };
                Arc::new(AuthToken::open(storage, AUTH_TOKEN_KEY, None))
            }
        };

        Ok(HttpClient {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                token,
                expiry: self.expiry,
                max_retries: self.max_retries,
                initial_backoff: self.initial_backoff,
            }),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
