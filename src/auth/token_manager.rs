use std::cmp::Ordering;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use crate::platform::token::AccessToken;

#[derive(Debug, Clone, Default)]
struct TokenState {
    access_token: Option<String>,
    expiration_time: Option<SystemTime>,
}

/// Last token handed out by a credential provider, with its expiry.
#[derive(Debug, Default)]
pub struct TokenManager {
    state: Mutex<TokenState>,
}

impl Clone for TokenManager {
    fn clone(&self) -> Self {
        Self {
            state: Mutex::new(self.lock().clone()),
        }
    }
}

impl TokenManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update(&self, token: AccessToken) {
        let mut state = self.lock();
        state.access_token = Some(token.token);
        state.expiration_time = token
            .expires_in
            .and_then(|expires_in| SystemTime::now().checked_add(expires_in));
    }

    pub fn clear(&self) {
        *self.lock() = TokenState::default();
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().access_token.clone()
    }

    pub fn expiration_time(&self) -> Option<SystemTime> {
        self.lock().expiration_time
    }

    /// `true` when no token is cached or the cached one expires within `tolerance`.
    /// Tokens without an expiry never need refreshing.
    pub fn should_refresh(&self, tolerance: Duration) -> bool {
        let state = self.lock();
        if state.access_token.is_none() {
            return true;
        }
        match state.expiration_time {
            None => false,
            Some(expiration) => {
                let now = SystemTime::now();
                let threshold = now.checked_add(tolerance).unwrap_or(now);
                matches!(expiration.cmp(&threshold), Ordering::Less | Ordering::Equal)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_manager_needs_refresh() {
        let manager = TokenManager::new();
        assert!(manager.should_refresh(Duration::ZERO));
        assert_eq!(manager.access_token(), None);
    }

    #[test]
    fn refresh_is_due_inside_tolerance() {
        let manager = TokenManager::new();
        manager.update(AccessToken::new("t", Some(Duration::from_secs(60))));
        assert_eq!(manager.access_token().as_deref(), Some("t"));
        assert!(!manager.should_refresh(Duration::from_secs(10)));
        assert!(manager.should_refresh(Duration::from_secs(120)));
    }

    #[test]
    fn token_without_expiry_stays_valid_until_cleared() {
        let manager = TokenManager::new();
        manager.update(AccessToken::new("forever", None));
        assert!(!manager.should_refresh(Duration::from_secs(3600)));
        assert_eq!(manager.expiration_time(), None);

        manager.clear();
        assert!(manager.should_refresh(Duration::ZERO));
    }
}
