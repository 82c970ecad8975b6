//! Credential providers for listen streams.
//!
//! [`CachingCredentialProvider`] wraps any [`TokenSource`](crate::platform::token::TokenSource)
//! and caches its tokens until shortly before they expire; [`StaticCredentialProvider`]
//! always hands out the same token (API keys in tests, the emulator's `owner` token).

mod token_manager;
mod token_provider;

pub use token_manager::TokenManager;
pub use token_provider::{
    CachingCredentialProvider, StaticCredentialProvider, TOKEN_REFRESH_TOLERANCE,
};
