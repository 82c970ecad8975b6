use std::error::Error;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

/// Failure reported by a [`TokenSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenError {
    message: String,
    /// Transient failures (network, throttling) as opposed to rejected credentials.
    transient: bool,
}

impl TokenError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn from_error(err: impl Error) -> Self {
        Self::new(err.to_string())
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for TokenError {}

/// A freshly issued access token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    /// Lifetime from the moment of issue; `None` means the token does not expire.
    pub expires_in: Option<Duration>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_in: Option<Duration>) -> Self {
        Self {
            token: token.into(),
            expires_in,
        }
    }
}

/// Issues access tokens. Implemented by whatever owns sign-in (an auth client, a
/// service-account signer, a test fixture).
#[async_trait]
pub trait TokenSource: Send + Sync + 'static {
    /// Returns `Ok(None)` when there is no signed-in principal.
    async fn fetch_token(&self) -> Result<Option<AccessToken>, TokenError>;
}
