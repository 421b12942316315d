use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use super::provider::{CacheProvider, SharedCache};
use crate::api::{ApiError, ExpirySubscription, HttpClient};

/// Consider a cached response stale after 5 minutes.
/// Roster and class lists change during the day, but not by the second.
const DEFAULT_STALE_AFTER_MINUTES: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        Utc::now() - self.cached_at > max_age
    }
}

/// Response cache for GET requests, keyed by request path.
///
/// Sits on top of any `CacheProvider`; by default a `SharedCache`, so the
/// number of remembered responses is bounded and the least recently viewed
/// page is the first to go.
pub struct QueryCache<P = SharedCache<CachedData<Value>>> {
    client: HttpClient,
    provider: P,
    stale_after: Duration,
}

impl<P: CacheProvider<CachedData<Value>>> QueryCache<P> {
    pub fn new(client: HttpClient, provider: P) -> Self {
        Self {
            client,
            provider,
            stale_after: Duration::minutes(DEFAULT_STALE_AFTER_MINUTES),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Fetch `path`, answering from the cache while the entry is fresh.
    pub async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let value = self.fetch_value(path).await?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(format!("{} from {}", e, path)))
    }

    pub async fn fetch_value(&self, path: &str) -> Result<Value, ApiError> {
        if let Some(cached) = self.provider.get(path) {
            if !cached.is_stale(self.stale_after) {
                trace!(path = path, "Cache hit");
                return Ok(cached.data);
            }
            debug!(path = path, age_minutes = cached.age_minutes(), "Cached response is stale");
        }
        self.revalidate(path).await
    }

    /// Fetch `path` from the server regardless of what is cached.
    /// A failed request leaves any cached entry in place.
    pub async fn revalidate(&self, path: &str) -> Result<Value, ApiError> {
        let value: Value = self.client.get(path).await?;
        self.provider.set(path, CachedData::new(value.clone()));
        Ok(value)
    }

    pub fn invalidate(&self, path: &str) -> bool {
        self.provider.delete(path)
    }

    pub fn clear(&self) {
        for key in self.provider.keys() {
            self.provider.delete(&key);
        }
    }

    pub fn cached_paths(&self) -> Vec<String> {
        self.provider.keys()
    }
}

impl<P> QueryCache<P>
where
    P: CacheProvider<CachedData<Value>> + Clone + 'static,
{
    /// Drop every cached response when the client reports an expired
    /// session, so the next user never sees the previous one's data.
    pub fn clear_on_session_expiry(&self) -> ExpirySubscription {
        let provider = self.provider.clone();
        self.client.session_expiry().subscribe(move || {
            let keys = provider.keys();
            debug!(entries = keys.len(), "Clearing response cache after session expiry");
            for key in keys {
                provider.delete(&key);
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
