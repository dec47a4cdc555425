//! Single-fire "end interview" guard.
//!
//! Timer expiry, AI completion and manual exit all race to end the session.
//! The first one to reach [`FinalizationGate::try_fire`] wins and receives a
//! [`Finalization`]; everyone after gets `None`.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api_client::InterviewApi;
use crate::models::interview::InterviewId;
use crate::session::SessionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeReason {
    TimeLimit,
    Completed,
    ManualExit,
}

impl FinalizeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizeReason::TimeLimit => "time limit reached",
            FinalizeReason::Completed => "completed",
            FinalizeReason::ManualExit => "user exit",
        }
    }

    pub fn terminal_status(&self) -> SessionStatus {
        match self {
            FinalizeReason::TimeLimit => SessionStatus::Expired,
            FinalizeReason::Completed => SessionStatus::Completed,
            FinalizeReason::ManualExit => SessionStatus::Exited,
        }
    }

    /// The grading service already ends the interview when it reports completion.
    fn needs_end_call(&self) -> bool {
        !matches!(self, FinalizeReason::Completed)
    }
}

#[derive(Debug, Default)]
pub struct FinalizationGate {
    fired: Option<FinalizeReason>,
}

impl FinalizationGate {
    pub fn is_fired(&self) -> bool {
        self.fired.is_some()
    }

    pub fn reason(&self) -> Option<FinalizeReason> {
        self.fired
    }

    pub fn try_fire(&mut self, reason: FinalizeReason) -> Option<Finalization> {
        if let Some(winner) = self.fired {
            debug!(
                "Finalization already fired ({}), ignoring {}",
                winner.as_str(),
                reason.as_str()
            );
            return None;
        }
        self.fired = Some(reason);
        info!("Finalizing interview: {}", reason.as_str());
        Some(Finalization { reason })
    }
}

/// Proof that this caller won the gate. Consumed by [`Finalization::execute`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a fired finalization must be executed"]
pub struct Finalization {
    pub reason: FinalizeReason,
}

impl Finalization {
    pub fn calls_end_endpoint(&self) -> bool {
        self.reason.needs_end_call()
    }

    /// Performs the best-effort end call. Failures are logged, never returned:
    /// leaving the session must not depend on it.
    pub async fn execute(self, api: &dyn InterviewApi, interview_id: InterviewId) -> FinalizeReason {
        if self.calls_end_endpoint() {
            if let Err(e) = api.end_interview(interview_id).await {
                warn!("End call for interview {interview_id} failed: {e}");
            }
        } else {
            debug!("Skipping end call for interview {interview_id}: finalized server-side");
        }
        self.reason
    }
}
