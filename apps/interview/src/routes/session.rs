use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::api_client::ErrorClass;
use crate::errors::AppError;
use crate::models::interview::InterviewId;
use crate::models::question::QuestionId;
use crate::session::runtime::spawn_session;
use crate::session::{SessionHandle, SessionSnapshot, SessionStatus};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AnswerDraft {
    pub text: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CursorRequest {
    pub question_id: QuestionId,
}

async fn require_session(
    state: &AppState,
    interview_id: InterviewId,
) -> Result<SessionHandle, AppError> {
    state
        .session(interview_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No session for interview {interview_id}")))
}

/// Waits until the runtime publishes a snapshot matching `ready`.
async fn wait_for_snapshot(
    handle: &SessionHandle,
    ready: impl FnMut(&SessionSnapshot) -> bool,
) -> Result<SessionSnapshot, AppError> {
    let mut snapshots = handle.subscribe();
    let snapshot = snapshots
        .wait_for(ready)
        .await
        .map_err(|_| anyhow::anyhow!("session runtime for interview {} stopped", handle.interview_id()))?
        .clone();
    Ok(snapshot)
}

/// POST /api/v1/interviews/:id/session
/// Starts (or rejoins) the session and returns once the interview has loaded.
/// Sessions whose runtime has stopped are dropped from the registry here.
pub async fn handle_start(
    State(state): State<AppState>,
    Path(interview_id): Path<InterviewId>,
) -> Result<(StatusCode, Json<SessionSnapshot>), AppError> {
    let handle = {
        let mut sessions = state.sessions.write().await;
        sessions.retain(|_, handle| handle.is_running());
        if let Some(handle) = sessions.get(&interview_id) {
            return Ok((StatusCode::OK, Json(handle.snapshot())));
        }
        let handle = spawn_session(
            interview_id,
            state.api.clone(),
            state.settings.clone(),
            state.clock.clone(),
        );
        sessions.insert(interview_id, handle.clone());
        handle
    };

    let snapshot = wait_for_snapshot(&handle, |s| {
        s.status != SessionStatus::Loading || s.navigate_away
    })
    .await?;

    if let Some(class) = snapshot.load_failure {
        state.sessions.write().await.remove(&interview_id);
        let message = snapshot.notice.unwrap_or_default();
        return Err(match class {
            ErrorClass::Auth => AppError::Unauthorized,
            ErrorClass::NotFound => AppError::NotFound(message),
            ErrorClass::Transient | ErrorClass::Rejected => AppError::Upstream(message),
        });
    }

    info!("Session started for interview {interview_id}");
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// GET /api/v1/interviews/:id/session
pub async fn handle_get(
    State(state): State<AppState>,
    Path(interview_id): Path<InterviewId>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let handle = require_session(&state, interview_id).await?;
    Ok(Json(handle.snapshot()))
}

/// DELETE /api/v1/interviews/:id/session
/// Drops the session without finalizing the interview.
pub async fn handle_dispose(
    State(state): State<AppState>,
    Path(interview_id): Path<InterviewId>,
) -> Result<StatusCode, AppError> {
    let handle = state
        .sessions
        .write()
        .await
        .remove(&interview_id)
        .ok_or_else(|| AppError::NotFound(format!("No session for interview {interview_id}")))?;
    handle.dispose().await;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/interviews/:id/session/answers/:question_id
pub async fn handle_put_answer(
    State(state): State<AppState>,
    Path((interview_id, question_id)): Path<(InterviewId, QuestionId)>,
    Json(req): Json<AnswerDraft>,
) -> Result<Json<SessionSnapshot>, AppError> {
    if req.text.is_none() && req.notes.is_none() {
        return Err(AppError::Validation(
            "Provide at least one of 'text' or 'notes'".to_string(),
        ));
    }
    let handle = require_session(&state, interview_id).await?;
    if let Some(text) = req.text {
        handle.set_answer_text(question_id, text).await?;
    }
    if let Some(notes) = req.notes {
        handle.set_answer_notes(question_id, notes).await?;
    }
    Ok(Json(handle.snapshot()))
}

/// POST /api/v1/interviews/:id/session/cursor
pub async fn handle_select(
    State(state): State<AppState>,
    Path(interview_id): Path<InterviewId>,
    Json(req): Json<CursorRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let handle = require_session(&state, interview_id).await?;
    handle.select_question(req.question_id).await?;
    Ok(Json(handle.snapshot()))
}

/// POST /api/v1/interviews/:id/session/submit
/// Accepted once the answer is in flight; poll the snapshot for the verdict.
pub async fn handle_submit(
    State(state): State<AppState>,
    Path(interview_id): Path<InterviewId>,
) -> Result<(StatusCode, Json<SessionSnapshot>), AppError> {
    let handle = require_session(&state, interview_id).await?;
    handle.submit().await?;
    Ok((StatusCode::ACCEPTED, Json(handle.snapshot())))
}

/// POST /api/v1/interviews/:id/session/exit
pub async fn handle_exit(
    State(state): State<AppState>,
    Path(interview_id): Path<InterviewId>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let handle = require_session(&state, interview_id).await?;
    handle.exit().await?;
    let snapshot = wait_for_snapshot(&handle, |s| s.navigate_away).await?;
    Ok(Json(snapshot))
}
