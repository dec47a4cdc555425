use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::api_client::InterviewApi;
use crate::config::Config;
use crate::models::interview::InterviewId;
use crate::session::clock::Clock;
use crate::session::{SessionHandle, SessionSettings};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Interview backend. Tests swap in an in-memory implementation.
    pub api: Arc<dyn InterviewApi>,
    pub settings: SessionSettings,
    pub clock: Arc<dyn Clock>,
    /// Live sessions, one per interview.
    pub sessions: Arc<RwLock<HashMap<InterviewId, SessionHandle>>>,
}

impl AppState {
    pub fn new(api: Arc<dyn InterviewApi>, config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self::with_settings(api, config.session_settings(), clock)
    }

    pub fn with_settings(
        api: Arc<dyn InterviewApi>,
        settings: SessionSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            api,
            settings,
            clock,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn session(&self, interview_id: InterviewId) -> Option<SessionHandle> {
        self.sessions.read().await.get(&interview_id).cloned()
    }
}
