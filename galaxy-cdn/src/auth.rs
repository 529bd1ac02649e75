//! Token-provider capability
//!
//! The core never performs interactive logins; it consumes an abstract
//! bearer-token source that can refresh itself. The CLI supplies a
//! file-backed implementation; tests use static tokens.

use async_trait::async_trait;

use crate::error::Result;

/// Source of bearer tokens for authenticated endpoints.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current bearer token, refreshing first if it is about to expire.
    /// Returns `None` when operating anonymously (public endpoints only).
    async fn bearer_token(&self) -> Result<Option<String>>;

    /// Force a refresh after a 401 and return the new token.
    async fn refresh(&self) -> Result<Option<String>>;
}

/// Fixed token, never refreshed. Suitable for tests and short-lived
/// sessions.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Wrap a fixed token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<Option<String>> {
        Ok(Some(self.token.clone()))
    }

    async fn refresh(&self) -> Result<Option<String>> {
        Ok(Some(self.token.clone()))
    }
}

/// No token at all. Public manifest fetches work; authenticated endpoints
/// will be rejected by the server.
#[derive(Debug, Clone, Default)]
pub struct AnonymousTokenProvider;

#[async_trait]
impl TokenProvider for AnonymousTokenProvider {
    async fn bearer_token(&self) -> Result<Option<String>> {
        Ok(None)
    }

    async fn refresh(&self) -> Result<Option<String>> {
        Ok(None)
    }
}
