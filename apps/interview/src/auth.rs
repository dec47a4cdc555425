//! Bearer token supply for the interview backend.
//!
//! Token acquisition and refresh belong to the auth collaborator; this crate
//! only asks for a currently valid token before each call.

use async_trait::async_trait;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a valid bearer token, or `None` when the user is signed out.
    async fn valid_token(&self) -> Option<String>;
}

/// Serves one token fixed at startup (e.g. from `INTERVIEW_API_TOKEN`).
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn valid_token(&self) -> Option<String> {
        self.token.clone()
    }
}
