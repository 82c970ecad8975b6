use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_lock::Mutex;
use async_trait::async_trait;

use crate::auth::token_manager::TokenManager;
use crate::firestore::error::{permission_denied, unavailable, FirestoreError, FirestoreResult};
use crate::firestore::remote::datastore::{CredentialProvider, CredentialProviderArc};
use crate::platform::token::{TokenError, TokenSource};

/// Cached tokens are refreshed once they are this close to expiring.
pub const TOKEN_REFRESH_TOLERANCE: Duration = Duration::from_secs(5 * 60);

/// Caches tokens from a [`TokenSource`] and refreshes them on demand.
///
/// Concurrent callers share one in-flight refresh: whoever takes the refresh lock
/// fetches, everyone queued behind it reuses the fresh token.
pub struct CachingCredentialProvider<S: TokenSource> {
    source: S,
    cache: TokenManager,
    refresh_lock: Mutex<()>,
    force_refresh: AtomicBool,
}

impl<S: TokenSource> CachingCredentialProvider<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: TokenManager::new(),
            refresh_lock: Mutex::new(()),
            force_refresh: AtomicBool::new(false),
        }
    }

    /// Converts the provider into an `Arc` for use with [`crate::firestore::Firestore`].
    pub fn into_arc(self) -> CredentialProviderArc {
        Arc::new(self)
    }

    fn cached(&self) -> Option<Option<String>> {
        if self.force_refresh.load(Ordering::SeqCst)
            || self.cache.should_refresh(TOKEN_REFRESH_TOLERANCE)
        {
            return None;
        }
        Some(self.cache.access_token())
    }
}

#[async_trait]
impl<S: TokenSource> CredentialProvider for CachingCredentialProvider<S> {
    async fn current_token(&self) -> FirestoreResult<Option<String>> {
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let _refresh = self.refresh_lock.lock().await;
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let forced = self.force_refresh.swap(false, Ordering::SeqCst);
        log::debug!("refreshing access token (forced: {forced})");
        match self.source.fetch_token().await.map_err(map_token_error)? {
            Some(token) => {
                self.cache.update(token);
                Ok(self.cache.access_token())
            }
            None => {
                self.cache.clear();
                Ok(None)
            }
        }
    }

    fn invalidate_token(&self) {
        self.force_refresh.store(true, Ordering::SeqCst);
    }
}

/// Transient failures are retried by the listen session; rejected credentials end it.
fn map_token_error(error: TokenError) -> FirestoreError {
    if error.is_transient() {
        unavailable(format!("token refresh failed: {}", error.message()))
    } else {
        permission_denied(format!("token refresh rejected: {}", error.message()))
    }
}

/// Hands out the same bearer token for every stream.
#[derive(Clone, Debug)]
pub struct StaticCredentialProvider {
    token: String,
}

impl StaticCredentialProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn current_token(&self) -> FirestoreResult<Option<String>> {
        Ok(Some(self.token.clone()))
    }

    fn invalidate_token(&self) {}
}
