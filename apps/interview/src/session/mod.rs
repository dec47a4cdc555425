// Adaptive interview session: question forest, answer ledger, timer,
// finalization gate and the controller that ties them together.
// All state for one session is owned by a single runtime task.

pub mod clock;
pub mod controller;
pub mod forest;
pub mod gate;
pub mod ledger;
pub mod runtime;
#[cfg(test)]
pub(crate) mod testing;
pub mod timer;
pub mod verdict;

use std::fmt;
use std::time::Duration;

use chrono::{FixedOffset, Local, Offset};
use serde::Serialize;

pub use controller::{SessionController, SessionError, SessionSnapshot};
pub use runtime::SessionHandle;

/// Default interview length: 45 minutes.
pub const DEFAULT_BUDGET_SECONDS: i64 = 2700;
/// How long the farewell message stays up before the session is finalized.
pub const DEFAULT_COMPLETION_DELAY: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Loading,
    Active,
    Submitting,
    Completed,
    Expired,
    Exited,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Expired | SessionStatus::Exited
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Loading => "loading",
            SessionStatus::Active => "active",
            SessionStatus::Submitting => "submitting",
            SessionStatus::Completed => "completed",
            SessionStatus::Expired => "expired",
            SessionStatus::Exited => "exited",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session tunables, normally derived from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub budget_seconds: i64,
    pub completion_delay: Duration,
    /// Zone used to read start timestamps that carry no offset.
    pub backend_zone: FixedOffset,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            budget_seconds: DEFAULT_BUDGET_SECONDS,
            completion_delay: DEFAULT_COMPLETION_DELAY,
            backend_zone: Local::now().offset().fix(),
        }
    }
}
