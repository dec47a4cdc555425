//! Session state machine.
//!
//! Flow: load → (select / draft → begin_submission → network →
//!       complete_submission)* → finalization.
//!
//! The controller is synchronous. Network calls happen outside it: the
//! runtime takes the request produced by [`SessionController::begin_submission`],
//! sends it, and feeds the result back through
//! [`SessionController::complete_submission`]. Between those two calls the
//! controller sits in `Submitting`, which is what serializes submissions.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::api_client::{ApiError, ErrorClass, InterviewApi, SubmitOutcome};
use crate::models::interview::{EditAnswerRequest, InterviewData, InterviewId, NewAnswerRequest};
use crate::models::question::{DifficultyLevel, Question, QuestionId};
use crate::session::clock::Clock;
use crate::session::forest::QuestionForest;
use crate::session::gate::{Finalization, FinalizationGate, FinalizeReason};
use crate::session::ledger::AnswerLedger;
use crate::session::timer::{TimerOutcome, TimerReconciler};
use crate::session::verdict::Verdict;
use crate::session::{SessionSettings, SessionStatus};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("A submission is already in progress, please wait")]
    SubmissionInProgress,

    #[error("Session is still loading")]
    NotReady,

    #[error("Session has ended ({0})")]
    Closed(SessionStatus),

    #[error("Question {0} is not part of this interview")]
    UnknownQuestion(QuestionId),

    #[error("There is no current question to answer")]
    NoCurrentQuestion,

    #[error("Answer text cannot be empty")]
    EmptyAnswer,

    #[error("Session runtime has stopped")]
    Stopped,
}

// ────────────────────────────────────────────────────────────────────────────
// Submission plumbing
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMode {
    New,
    Edit,
}

/// A request ready to go to the answer endpoints.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionRequest {
    New(NewAnswerRequest),
    Edit(EditAnswerRequest),
}

impl SubmissionRequest {
    pub fn question_id(&self) -> QuestionId {
        match self {
            SubmissionRequest::New(r) => r.question_id,
            SubmissionRequest::Edit(r) => r.question_id,
        }
    }

    pub async fn send(&self, api: &dyn InterviewApi) -> Result<SubmitOutcome, ApiError> {
        match self {
            SubmissionRequest::New(request) => api.submit_answer(request).await,
            SubmissionRequest::Edit(request) => api.edit_answer(request).await,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingSubmission {
    question_id: QuestionId,
    mode: SubmissionMode,
}

/// Follow-up work the caller must perform after a submission (or refetch) resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionEffect {
    None,
    /// The result arrived after the session ended, or matched no submission.
    Ignored,
    /// The verdict named a question this session does not know: refetch, then move to `target`.
    Refetch { target: QuestionId },
    /// Interview completed: show the farewell, then finalize after the delay.
    FinalizeAfter(Duration),
    /// Transient failure; the user may retry the same submission.
    Retry { message: String },
    /// The request was refused for a non-transient reason.
    Rejected { message: String },
    /// Authentication lapsed; handled by the auth collaborator.
    SessionExpired,
    /// The interview no longer exists; leave the session.
    NavigateAway,
}

// ────────────────────────────────────────────────────────────────────────────
// Snapshot (what the UI layer sees)
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QuestionView {
    pub id: QuestionId,
    pub label: String,
    pub text: String,
    pub difficulty_level: DifficultyLevel,
    pub mark_weight: f64,
    pub parent_id: Option<QuestionId>,
    pub root_id: Option<QuestionId>,
    pub answer_text: String,
    pub notes: String,
    pub persisted: bool,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionSnapshot {
    pub interview_id: InterviewId,
    pub status: SessionStatus,
    pub remaining_seconds: i64,
    pub budget_seconds: i64,
    pub current_question_id: Option<QuestionId>,
    /// Index of the current question in display order.
    pub cursor: Option<usize>,
    pub questions: Vec<QuestionView>,
    pub notice: Option<String>,
    pub finalized: Option<FinalizeReason>,
    /// Set once finalization has run; the UI should leave the session view.
    pub navigate_away: bool,
    /// Why the initial load failed, if it did.
    #[serde(skip)]
    pub load_failure: Option<ErrorClass>,
}

impl SessionSnapshot {
    pub fn loading(interview_id: InterviewId, budget_seconds: i64) -> Self {
        Self {
            interview_id,
            status: SessionStatus::Loading,
            remaining_seconds: budget_seconds,
            budget_seconds,
            current_question_id: None,
            cursor: None,
            questions: Vec::new(),
            notice: None,
            finalized: None,
            navigate_away: false,
            load_failure: None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Controller
// ────────────────────────────────────────────────────────────────────────────

pub struct SessionController {
    interview_id: InterviewId,
    settings: SessionSettings,
    clock: Arc<dyn Clock>,
    status: SessionStatus,
    forest: QuestionForest,
    ledger: AnswerLedger,
    timer: Option<TimerReconciler>,
    gate: FinalizationGate,
    /// Id of the current question; its display index is derived on demand.
    cursor: Option<QuestionId>,
    pending: Option<PendingSubmission>,
    /// Target of an in-flight refetch. The session stays `Submitting` until it lands.
    refetch_target: Option<QuestionId>,
    notice: Option<String>,
    navigate_away: bool,
    load_failure: Option<ErrorClass>,
    /// Ids handed to follow-ups the server did not number. Negative so they never collide.
    next_provisional_id: QuestionId,
}

impl SessionController {
    pub fn new(interview_id: InterviewId, settings: SessionSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            interview_id,
            settings,
            clock,
            status: SessionStatus::Loading,
            forest: QuestionForest::default(),
            ledger: AnswerLedger::default(),
            timer: None,
            gate: FinalizationGate::default(),
            cursor: None,
            pending: None,
            refetch_target: None,
            notice: None,
            navigate_away: false,
            load_failure: None,
            next_provisional_id: -1,
        }
    }

    pub fn interview_id(&self) -> InterviewId {
        self.interview_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn forest(&self) -> &QuestionForest {
        &self.forest
    }

    pub fn ledger(&self) -> &AnswerLedger {
        &self.ledger
    }

    pub fn current_question(&self) -> Option<QuestionId> {
        self.cursor
    }

    pub fn cursor_index(&self) -> Option<usize> {
        self.cursor.and_then(|id| self.forest.position(id))
    }

    pub fn remaining_seconds(&self) -> i64 {
        self.timer
            .as_ref()
            .map(TimerReconciler::remaining_seconds)
            .unwrap_or(self.settings.budget_seconds)
    }

    pub fn is_finalized(&self) -> bool {
        self.gate.is_fired()
    }

    /// True once the UI should leave the session view.
    pub fn should_navigate_away(&self) -> bool {
        self.navigate_away
    }

    fn is_closed(&self) -> bool {
        self.status.is_terminal() || self.gate.is_fired()
    }

    /// Loading → Active. Runs the initial reconciliation, which may expire the
    /// session straight away.
    pub fn load(&mut self, data: InterviewData) -> Result<Option<Finalization>, SessionError> {
        if self.status != SessionStatus::Loading {
            return Err(SessionError::Closed(self.status));
        }

        self.forest = QuestionForest::from_records(data.questions);
        self.ledger = AnswerLedger::from_records(data.answers);

        let now = self.clock.now();
        let mut timer = TimerReconciler::new(
            &data.started_at,
            self.settings.budget_seconds,
            &self.settings.backend_zone,
            now,
        );
        timer.start();
        self.timer = Some(timer);

        self.cursor = self.first_open_question();
        self.status = SessionStatus::Active;
        info!(
            "Interview {} loaded: {} questions, {} completed, cursor {:?}",
            self.interview_id,
            self.forest.len(),
            self.ledger.completed().len(),
            self.cursor
        );

        Ok(self.reconcile())
    }

    /// The interview data could not be fetched; the session cannot start.
    pub fn abandon_load(&mut self, e: &ApiError) {
        error!("Could not load interview {}: {e}", self.interview_id);
        self.load_failure = Some(e.class());
        self.notice = Some(match e.class() {
            ErrorClass::Auth => "Your session has expired. Please sign in again.".to_string(),
            ErrorClass::NotFound => "This interview could not be found.".to_string(),
            ErrorClass::Transient | ErrorClass::Rejected => format!("Could not load interview: {e}"),
        });
        self.navigate_away = true;
    }

    /// First question without a completed answer, or the last question when all are done.
    fn first_open_question(&self) -> Option<QuestionId> {
        let order = self.forest.flatten();
        order
            .iter()
            .copied()
            .find(|id| !self.ledger.is_completed(*id))
            .or_else(|| order.last().copied())
    }

    // ── timer ───────────────────────────────────────────────────────────────

    pub fn tick(&mut self) -> Option<Finalization> {
        if self.is_closed() {
            return None;
        }
        let outcome = self.timer.as_mut()?.tick();
        self.on_timer(outcome)
    }

    pub fn reconcile(&mut self) -> Option<Finalization> {
        if self.is_closed() {
            return None;
        }
        let now = self.clock.now();
        let has_answers = self.ledger.has_persisted_answers();
        let outcome = self.timer.as_mut()?.reconcile(now, has_answers);
        self.on_timer(outcome)
    }

    fn on_timer(&mut self, outcome: TimerOutcome) -> Option<Finalization> {
        match outcome {
            TimerOutcome::Expired => self.fire(FinalizeReason::TimeLimit),
            TimerOutcome::Idle | TimerOutcome::Counting(_) => None,
        }
    }

    fn fire(&mut self, reason: FinalizeReason) -> Option<Finalization> {
        let finalization = self.gate.try_fire(reason)?;
        self.status = reason.terminal_status();
        self.pending = None;
        self.refetch_target = None;
        if let Some(timer) = self.timer.as_mut() {
            timer.stop();
        }
        if reason == FinalizeReason::TimeLimit {
            self.notice = Some("Time limit reached".to_string());
        }
        Some(finalization)
    }

    // ── user actions ────────────────────────────────────────────────────────

    /// Active → Exited.
    pub fn exit(&mut self) -> Result<Option<Finalization>, SessionError> {
        match self.status {
            SessionStatus::Active => Ok(self.fire(FinalizeReason::ManualExit)),
            SessionStatus::Submitting => Err(SessionError::SubmissionInProgress),
            SessionStatus::Loading => Err(SessionError::NotReady),
            SessionStatus::Completed | SessionStatus::Expired | SessionStatus::Exited => Ok(None),
        }
    }

    /// Fires the completion finalization once the farewell delay has elapsed.
    pub fn finish_completion(&mut self) -> Option<Finalization> {
        if self.status != SessionStatus::Completed {
            return None;
        }
        self.fire(FinalizeReason::Completed)
    }

    /// Records that finalization has run; the UI should now navigate away.
    pub fn mark_finalized(&mut self) {
        self.navigate_away = true;
        if let Some(timer) = self.timer.take() {
            timer.dispose();
        }
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Loading => Err(SessionError::NotReady),
            status if status.is_terminal() => Err(SessionError::Closed(status)),
            _ => Ok(()),
        }
    }

    fn ensure_known(&self, question_id: QuestionId) -> Result<(), SessionError> {
        if self.forest.contains(question_id) {
            Ok(())
        } else {
            Err(SessionError::UnknownQuestion(question_id))
        }
    }

    pub fn set_answer_text(
        &mut self,
        question_id: QuestionId,
        text: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.ensure_known(question_id)?;
        self.ledger.upsert_text(question_id, text);
        Ok(())
    }

    pub fn set_answer_notes(
        &mut self,
        question_id: QuestionId,
        notes: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.ensure_known(question_id)?;
        self.ledger.upsert_notes(question_id, notes);
        Ok(())
    }

    /// Moves the cursor to any existing question, e.g. to revise an earlier answer.
    pub fn select_question(&mut self, question_id: QuestionId) -> Result<(), SessionError> {
        self.ensure_open()?;
        if self.status == SessionStatus::Submitting {
            return Err(SessionError::SubmissionInProgress);
        }
        self.ensure_known(question_id)?;
        self.cursor = Some(question_id);
        Ok(())
    }

    // ── submission ──────────────────────────────────────────────────────────

    /// Active → Submitting. Builds the request for the current question,
    /// choosing the edit endpoint when the server already holds an answer.
    pub fn begin_submission(&mut self) -> Result<SubmissionRequest, SessionError> {
        match self.status {
            SessionStatus::Active => {}
            SessionStatus::Submitting => return Err(SessionError::SubmissionInProgress),
            SessionStatus::Loading => return Err(SessionError::NotReady),
            status => return Err(SessionError::Closed(status)),
        }

        let question_id = self.cursor.ok_or(SessionError::NoCurrentQuestion)?;
        let text = self.ledger.text(question_id).trim().to_string();
        if text.is_empty() {
            return Err(SessionError::EmptyAnswer);
        }

        let (mode, request) = if self.ledger.is_edit(question_id) {
            (
                SubmissionMode::Edit,
                SubmissionRequest::Edit(EditAnswerRequest {
                    interview_id: self.interview_id,
                    question_id,
                    new_text: text,
                }),
            )
        } else {
            (
                SubmissionMode::New,
                SubmissionRequest::New(NewAnswerRequest {
                    interview_id: self.interview_id,
                    question_id,
                    text,
                }),
            )
        };

        self.pending = Some(PendingSubmission { question_id, mode });
        self.status = SessionStatus::Submitting;
        self.notice = None;
        info!(
            "Submitting {:?} answer for question {} of interview {}",
            mode, question_id, self.interview_id
        );
        Ok(request)
    }

    /// Submitting → Active, then applies the verdict.
    pub fn complete_submission(
        &mut self,
        result: Result<SubmitOutcome, ApiError>,
    ) -> SubmissionEffect {
        if self.is_closed() {
            debug!("Dropping submission result for closed interview {}", self.interview_id);
            return SubmissionEffect::Ignored;
        }
        let Some(pending) = self.pending.take() else {
            warn!("Submission result arrived with nothing in flight");
            return SubmissionEffect::Ignored;
        };
        self.status = SessionStatus::Active;

        match result {
            Ok(outcome) => self.apply_outcome(pending, outcome),
            Err(e) => self.error_effect(e),
        }
    }

    fn error_effect(&mut self, e: ApiError) -> SubmissionEffect {
        let message = e.to_string();
        match e.class() {
            ErrorClass::Transient => {
                warn!("Transient error for interview {}: {message}", self.interview_id);
                self.notice = Some(format!("{message}. Please try again."));
                SubmissionEffect::Retry { message }
            }
            ErrorClass::Rejected => {
                warn!("Request rejected for interview {}: {message}", self.interview_id);
                self.notice = Some(message.clone());
                SubmissionEffect::Rejected { message }
            }
            ErrorClass::Auth => {
                warn!("Authentication expired during interview {}", self.interview_id);
                self.notice = Some("Your session has expired. Please sign in again.".to_string());
                SubmissionEffect::SessionExpired
            }
            ErrorClass::NotFound => {
                error!("Interview {} no longer exists", self.interview_id);
                self.notice = Some("This interview could not be found.".to_string());
                self.navigate_away = true;
                if let Some(timer) = self.timer.as_mut() {
                    timer.stop();
                }
                SubmissionEffect::NavigateAway
            }
        }
    }

    fn apply_outcome(
        &mut self,
        pending: PendingSubmission,
        outcome: SubmitOutcome,
    ) -> SubmissionEffect {
        let PendingSubmission { question_id, mode } = pending;

        if mode == SubmissionMode::New {
            match outcome.answer_id {
                Some(answer_id) => {
                    if let Err(e) = self.ledger.commit(question_id, answer_id) {
                        warn!("Could not commit answer for question {question_id}: {e}");
                    }
                }
                None => warn!(
                    "Server returned no answer id for question {question_id}; it stays unsaved"
                ),
            }
        }

        debug!(
            "Verdict for question {}: {}",
            question_id,
            outcome.verdict.kind()
        );

        match outcome.verdict {
            Verdict::Complete { message } => {
                self.status = SessionStatus::Completed;
                if let Some(timer) = self.timer.as_mut() {
                    timer.stop();
                }
                self.notice =
                    Some(message.unwrap_or_else(|| "Thank you, the interview is complete.".to_string()));
                info!("Interview {} completed by grading service", self.interview_id);
                SubmissionEffect::FinalizeAfter(self.settings.completion_delay)
            }
            Verdict::AdvanceTo {
                question_id: target,
            } => {
                if mode == SubmissionMode::Edit {
                    self.prune_after(question_id);
                }
                if self.forest.contains(target) {
                    if !self.forest.is_root(target) {
                        warn!("Advancing to {target}, which is a follow-up rather than a root");
                    }
                    self.cursor = Some(target);
                    SubmissionEffect::None
                } else {
                    info!("Question {target} is not known locally, refetching interview");
                    self.refetch_target = Some(target);
                    self.status = SessionStatus::Submitting;
                    SubmissionEffect::Refetch { target }
                }
            }
            Verdict::Continue {
                question,
                question_id: follow_up_id,
            } => {
                if mode == SubmissionMode::Edit {
                    self.prune_after(question_id);
                }
                self.add_follow_up(question_id, follow_up_id, question);
                SubmissionEffect::None
            }
            Verdict::Unrecognized => {
                match mode {
                    SubmissionMode::New => {
                        if let Some(next) = self.forest.next_after(question_id) {
                            self.cursor = Some(next);
                        }
                        warn!("Unrecognized verdict for new answer; moving to next question");
                    }
                    SubmissionMode::Edit => {
                        warn!("Unrecognized verdict for edited answer; staying on question {question_id}");
                    }
                }
                SubmissionEffect::None
            }
        }
    }

    fn add_follow_up(&mut self, after: QuestionId, id: Option<QuestionId>, text: String) {
        let Some(parent) = self.forest.get(after) else {
            error!("Invariant violated: follow-up target {after} missing from forest");
            return;
        };
        let id = match id {
            Some(id) if !self.forest.contains(id) => id,
            suggested => {
                if let Some(taken) = suggested {
                    warn!("Follow-up id {taken} is already in use; assigning a provisional id");
                }
                let provisional = self.next_provisional_id;
                self.next_provisional_id -= 1;
                provisional
            }
        };
        let follow_up = Question::follow_up_of(parent, id, text);

        match self.forest.insert_follow_up(after, follow_up) {
            Ok(()) => {
                info!("Inserted follow-up {id} after question {after}");
                self.cursor = Some(id);
            }
            Err(e) => error!("Invariant violated while inserting follow-up: {e}"),
        }
    }

    /// Drops everything after `question_id` in its branch from both the forest and the ledger.
    fn prune_after(&mut self, question_id: QuestionId) -> HashSet<QuestionId> {
        match self.forest.truncate_after(question_id) {
            Ok(removed) => {
                if !removed.is_empty() {
                    info!(
                        "Edit of question {} pruned {} downstream follow-ups",
                        question_id,
                        removed.len()
                    );
                }
                self.ledger.remove(&removed);
                removed
            }
            Err(e) => {
                error!("Invariant violated while pruning: {e}");
                HashSet::new()
            }
        }
    }

    // ── refetch ─────────────────────────────────────────────────────────────

    /// Submitting → Active. Replaces questions and answers with fresh server
    /// data and moves to `target`. Unsaved drafts for questions that still exist are kept. The
    /// timer is not re-anchored.
    pub fn apply_refresh(
        &mut self,
        result: Result<InterviewData, ApiError>,
        target: QuestionId,
    ) -> SubmissionEffect {
        if self.is_closed() {
            return SubmissionEffect::Ignored;
        }
        if self.refetch_target.take() != Some(target) {
            warn!("Refetch result for question {target} arrived with no matching refetch in flight");
            return SubmissionEffect::Ignored;
        }
        self.status = SessionStatus::Active;
        let data = match result {
            Ok(data) => data,
            Err(e) => return self.error_effect(e),
        };

        let forest = QuestionForest::from_records(data.questions);
        let mut ledger = AnswerLedger::from_records(data.answers);
        for id in forest.flatten() {
            if ledger.get(id).is_some() {
                continue;
            }
            if let Some(draft) = self.ledger.get(id).filter(|a| !a.is_persisted()) {
                ledger.upsert_text(id, draft.text.clone());
                ledger.upsert_notes(id, draft.notes.clone());
            }
        }
        self.forest = forest;
        self.ledger = ledger;

        if self.forest.contains(target) {
            self.cursor = Some(target);
        } else {
            warn!("Question {target} still missing after refetch; resuming at first open question");
            self.cursor = self.first_open_question();
        }
        SubmissionEffect::None
    }

    // ── view ────────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        let questions = self
            .forest
            .questions()
            .into_iter()
            .map(|q| {
                let answer = self.ledger.get(q.id);
                QuestionView {
                    id: q.id,
                    label: self.forest.label_of(q.id).unwrap_or_default(),
                    text: q.text.clone(),
                    difficulty_level: q.difficulty_level,
                    mark_weight: q.mark_weight,
                    parent_id: q.parent_id,
                    root_id: self.forest.root_of(q.id),
                    answer_text: answer.map(|a| a.text.clone()).unwrap_or_default(),
                    notes: answer.map(|a| a.notes.clone()).unwrap_or_default(),
                    persisted: answer.is_some_and(|a| a.is_persisted()),
                    completed: self.ledger.is_completed(q.id),
                }
            })
            .collect();

        SessionSnapshot {
            interview_id: self.interview_id,
            status: self.status,
            remaining_seconds: self.remaining_seconds(),
            budget_seconds: self.settings.budget_seconds,
            current_question_id: self.cursor,
            cursor: self.cursor_index(),
            questions,
            notice: self.notice.clone(),
            finalized: self.gate.reason(),
            navigate_away: self.navigate_away,
            load_failure: self.load_failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::answer::Answer;
    use crate::session::clock::ManualClock;
    use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};

    const BUDGET: i64 = 2700;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-16T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            budget_seconds: BUDGET,
            completion_delay: Duration::from_millis(2500),
            backend_zone: FixedOffset::east_opt(0).unwrap(),
        }
    }

    fn question(id: QuestionId, parent_id: Option<QuestionId>) -> Question {
        Question {
            id,
            text: format!("question {id}"),
            difficulty_level: DifficultyLevel::Mid,
            mark_weight: 1.0,
            parent_id,
        }
    }

    fn persisted(id: i64, question_id: QuestionId) -> Answer {
        Answer {
            id,
            question_id,
            text: format!("answer {question_id}"),
            notes: String::new(),
        }
    }

    fn data(questions: Vec<Question>, answers: Vec<Answer>) -> InterviewData {
        InterviewData {
            questions,
            answers,
            started_at: "2026-10-16T09:59:55Z".to_string(),
        }
    }

    fn loaded(data: InterviewData) -> (SessionController, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now()));
        let mut controller = SessionController::new(7, settings(), clock.clone());
        assert!(controller.load(data).unwrap().is_none());
        (controller, clock)
    }

    /// Roots 1, 2, 3 with no answers.
    fn fresh_session() -> SessionController {
        loaded(data(
            vec![question(1, None), question(2, None), question(3, None)],
            vec![],
        ))
        .0
    }

    fn outcome(answer_id: Option<i64>, verdict: Verdict) -> Result<SubmitOutcome, ApiError> {
        Ok(SubmitOutcome { answer_id, verdict })
    }

    fn answer_current(controller: &mut SessionController, text: &str) -> SubmissionRequest {
        let current = controller.current_question().unwrap();
        controller.set_answer_text(current, text).unwrap();
        controller.begin_submission().unwrap()
    }

    #[test]
    fn test_load_places_cursor_on_first_unanswered_question() {
        let (controller, _) = loaded(data(
            vec![question(1, None), question(2, None), question(10, Some(1))],
            vec![persisted(100, 1), persisted(101, 10)],
        ));
        assert_eq!(controller.status(), SessionStatus::Active);
        assert_eq!(controller.current_question(), Some(2));
        assert_eq!(controller.cursor_index(), Some(2));
    }

    #[test]
    fn test_load_with_everything_answered_lands_on_last() {
        let (controller, _) = loaded(data(
            vec![question(1, None), question(2, None)],
            vec![persisted(100, 1), persisted(101, 2)],
        ));
        assert_eq!(controller.current_question(), Some(2));
    }

    #[test]
    fn test_load_twice_is_rejected() {
        let mut controller = fresh_session();
        let err = controller.load(data(vec![], vec![])).unwrap_err();
        assert_eq!(err, SessionError::Closed(SessionStatus::Active));
    }

    #[test]
    fn test_new_answer_with_follow_up_inserts_and_advances() {
        let mut controller = fresh_session();
        let request = answer_current(&mut controller, "I like Rust");
        assert!(matches!(request, SubmissionRequest::New(ref r) if r.question_id == 1 && r.text == "I like Rust"));
        assert_eq!(controller.status(), SessionStatus::Submitting);

        let effect = controller.complete_submission(outcome(
            Some(500),
            Verdict::Continue {
                question: "Can you elaborate?".to_string(),
                question_id: Some(20),
            },
        ));

        assert_eq!(effect, SubmissionEffect::None);
        assert_eq!(controller.status(), SessionStatus::Active);
        let follow_up = controller.forest().get(20).unwrap();
        assert_eq!(follow_up.parent_id, Some(1));
        assert_eq!(follow_up.text, "Can you elaborate?");
        assert_eq!(controller.forest().label_of(20).as_deref(), Some("A"));
        assert_eq!(controller.current_question(), Some(20));
        assert!(controller.ledger().is_edit(1));
        assert!(controller.ledger().is_completed(1));
    }

    #[test]
    fn test_follow_up_without_server_id_gets_provisional_id() {
        let mut controller = fresh_session();
        answer_current(&mut controller, "answer");
        controller.complete_submission(outcome(
            Some(500),
            Verdict::Continue {
                question: "Why?".to_string(),
                question_id: None,
            },
        ));
        let current = controller.current_question().unwrap();
        assert!(current < 0);
        assert_eq!(controller.forest().get(current).unwrap().parent_id, Some(1));
    }

    #[test]
    fn test_edit_of_root_then_advance_prunes_follow_up() {
        let (mut controller, _) = loaded(data(
            vec![question(1, None), question(2, None), question(10, Some(1))],
            vec![persisted(100, 1), persisted(101, 10)],
        ));
        controller.select_question(1).unwrap();
        let request = answer_current(&mut controller, "a better answer");
        assert!(matches!(request, SubmissionRequest::Edit(ref r) if r.new_text == "a better answer"));

        let effect = controller.complete_submission(outcome(
            None,
            Verdict::AdvanceTo { question_id: 2 },
        ));

        assert_eq!(effect, SubmissionEffect::None);
        assert!(!controller.forest().contains(10));
        assert!(controller.ledger().get(10).is_none());
        assert!(!controller.ledger().is_completed(10));
        assert_eq!(controller.current_question(), Some(2));
        assert_eq!(controller.forest().flatten(), vec![1, 2]);
    }

    #[test]
    fn test_edit_of_follow_up_keeps_earlier_chain_members() {
        let (mut controller, _) = loaded(data(
            vec![
                question(1, None),
                question(10, Some(1)),
                question(11, Some(10)),
                question(12, Some(11)),
            ],
            vec![
                persisted(100, 1),
                persisted(101, 10),
                persisted(102, 11),
                persisted(103, 12),
            ],
        ));
        controller.select_question(10).unwrap();
        answer_current(&mut controller, "revised follow-up answer");
        controller.complete_submission(outcome(
            None,
            Verdict::Continue {
                question: "And then?".to_string(),
                question_id: Some(30),
            },
        ));

        assert_eq!(controller.forest().branch_of(1), vec![1, 10, 30]);
        assert!(controller.ledger().is_completed(1));
        assert!(controller.ledger().is_completed(10));
        assert!(controller.ledger().get(11).is_none());
        assert!(controller.ledger().get(12).is_none());
        assert_eq!(controller.forest().label_of(30).as_deref(), Some("B"));
        assert_eq!(controller.current_question(), Some(30));
    }

    #[test]
    fn test_second_submission_is_rejected_while_first_in_flight() {
        let mut controller = fresh_session();
        answer_current(&mut controller, "first");
        assert_eq!(
            controller.begin_submission(),
            Err(SessionError::SubmissionInProgress)
        );
        assert_eq!(controller.exit(), Err(SessionError::SubmissionInProgress));
    }

    #[test]
    fn test_empty_answer_is_not_submitted() {
        let mut controller = fresh_session();
        controller.set_answer_text(1, "   ").unwrap();
        assert_eq!(controller.begin_submission(), Err(SessionError::EmptyAnswer));
        assert_eq!(controller.status(), SessionStatus::Active);
    }

    #[test]
    fn test_unknown_advance_target_requests_refetch() {
        let mut controller = fresh_session();
        answer_current(&mut controller, "answer");
        let effect =
            controller.complete_submission(outcome(Some(9), Verdict::AdvanceTo { question_id: 4 }));
        assert_eq!(effect, SubmissionEffect::Refetch { target: 4 });
        assert_eq!(controller.current_question(), Some(1));

        controller.set_answer_text(3, "draft for three").unwrap();
        let refreshed = data(
            vec![question(1, None), question(2, None), question(3, None), question(4, None)],
            vec![persisted(9, 1)],
        );
        assert_eq!(controller.apply_refresh(Ok(refreshed), 4), SubmissionEffect::None);
        assert_eq!(controller.current_question(), Some(4));
        assert_eq!(controller.ledger().text(3), "draft for three");
        assert!(controller.ledger().is_edit(1));
    }

    #[test]
    fn test_submissions_blocked_while_refetch_in_flight() {
        let mut controller = fresh_session();
        answer_current(&mut controller, "answer");
        let effect =
            controller.complete_submission(outcome(Some(9), Verdict::AdvanceTo { question_id: 4 }));
        assert_eq!(effect, SubmissionEffect::Refetch { target: 4 });
        assert_eq!(controller.status(), SessionStatus::Submitting);

        controller.set_answer_text(1, "second try").unwrap();
        assert_eq!(
            controller.begin_submission(),
            Err(SessionError::SubmissionInProgress)
        );
        assert_eq!(
            controller.select_question(2),
            Err(SessionError::SubmissionInProgress)
        );

        let refreshed = data(
            vec![question(1, None), question(2, None), question(3, None), question(4, None)],
            vec![persisted(9, 1)],
        );
        assert_eq!(controller.apply_refresh(Ok(refreshed), 4), SubmissionEffect::None);
        assert_eq!(controller.status(), SessionStatus::Active);
        assert_eq!(controller.current_question(), Some(4));
    }

    #[test]
    fn test_failed_refetch_releases_guard() {
        let mut controller = fresh_session();
        answer_current(&mut controller, "answer");
        controller.complete_submission(outcome(Some(9), Verdict::AdvanceTo { question_id: 4 }));

        let effect = controller.apply_refresh(
            Err(ApiError::Api {
                status: 502,
                message: "bad gateway".to_string(),
            }),
            4,
        );
        assert!(matches!(effect, SubmissionEffect::Retry { .. }));
        assert_eq!(controller.status(), SessionStatus::Active);
        assert_eq!(controller.current_question(), Some(1));

        // A stray second refresh for the same target is not applied.
        let stray = data(vec![question(1, None), question(4, None)], vec![]);
        assert_eq!(controller.apply_refresh(Ok(stray), 4), SubmissionEffect::Ignored);
        assert!(!controller.forest().contains(4));
    }

    #[test]
    fn test_follow_up_with_taken_id_gets_provisional_id() {
        let mut controller = fresh_session();
        answer_current(&mut controller, "answer");
        let effect = controller.complete_submission(outcome(
            Some(500),
            Verdict::Continue {
                question: "Can you elaborate?".to_string(),
                question_id: Some(2),
            },
        ));

        assert_eq!(effect, SubmissionEffect::None);
        assert_eq!(controller.forest().len(), 4);
        let current = controller.current_question().unwrap();
        assert!(current < 0);
        let follow_up = controller.forest().get(current).unwrap();
        assert_eq!(follow_up.text, "Can you elaborate?");
        assert_eq!(follow_up.parent_id, Some(1));
        assert_eq!(controller.forest().flatten(), vec![1, current, 2, 3]);
        assert!(controller.forest().is_root(2));
    }

    #[test]
    fn test_unrecognized_verdict_on_new_answer_moves_forward() {
        let mut controller = fresh_session();
        answer_current(&mut controller, "answer");
        controller.complete_submission(outcome(Some(9), Verdict::Unrecognized));
        assert_eq!(controller.current_question(), Some(2));
    }

    #[test]
    fn test_unrecognized_verdict_on_edit_stays_put() {
        let (mut controller, _) = loaded(data(
            vec![question(1, None), question(2, None), question(10, Some(1))],
            vec![persisted(100, 1), persisted(101, 10)],
        ));
        controller.select_question(1).unwrap();
        answer_current(&mut controller, "edited");
        controller.complete_submission(outcome(None, Verdict::Unrecognized));

        assert_eq!(controller.current_question(), Some(1));
        assert!(controller.forest().contains(10));
    }

    #[test]
    fn test_transient_error_offers_retry_and_releases_guard() {
        let mut controller = fresh_session();
        answer_current(&mut controller, "answer");
        let effect = controller.complete_submission(Err(ApiError::Api {
            status: 503,
            message: "grader down".to_string(),
        }));
        assert!(matches!(effect, SubmissionEffect::Retry { .. }));
        assert_eq!(controller.status(), SessionStatus::Active);
        assert!(!controller.ledger().is_edit(1));
        // Same submission can be re-issued.
        assert!(matches!(
            controller.begin_submission(),
            Ok(SubmissionRequest::New(_))
        ));
    }

    #[test]
    fn test_auth_and_not_found_errors() {
        let mut controller = fresh_session();
        answer_current(&mut controller, "answer");
        assert_eq!(
            controller.complete_submission(Err(ApiError::Unauthorized)),
            SubmissionEffect::SessionExpired
        );

        answer_current(&mut controller, "answer");
        assert_eq!(
            controller.complete_submission(Err(ApiError::NotFound)),
            SubmissionEffect::NavigateAway
        );
        assert!(controller.snapshot().navigate_away);
    }

    #[test]
    fn test_completion_defers_finalization_and_skips_end_call() {
        let mut controller = fresh_session();
        answer_current(&mut controller, "final answer");
        let effect = controller.complete_submission(outcome(
            Some(9),
            Verdict::Complete {
                message: Some("Thanks for your time!".to_string()),
            },
        ));

        assert_eq!(effect, SubmissionEffect::FinalizeAfter(Duration::from_millis(2500)));
        assert_eq!(controller.status(), SessionStatus::Completed);
        assert_eq!(
            controller.snapshot().notice.as_deref(),
            Some("Thanks for your time!")
        );
        assert!(!controller.is_finalized());
        assert!(controller.tick().is_none());
        assert_eq!(controller.exit(), Ok(None));

        let finalization = controller.finish_completion().unwrap();
        assert_eq!(finalization.reason, FinalizeReason::Completed);
        assert!(!finalization.calls_end_endpoint());
        assert!(controller.finish_completion().is_none());
    }

    #[test]
    fn test_timer_expiry_fires_once_and_blocks_submissions() {
        let (mut controller, clock) = loaded(data(vec![question(1, None)], vec![persisted(5, 1)]));
        clock.advance(ChronoDuration::seconds(BUDGET + 10));

        let finalization = controller.reconcile().unwrap();
        assert_eq!(finalization.reason, FinalizeReason::TimeLimit);
        assert_eq!(controller.status(), SessionStatus::Expired);
        assert_eq!(controller.remaining_seconds(), 0);

        assert!(controller.reconcile().is_none());
        assert!(controller.tick().is_none());
        assert_eq!(controller.exit(), Ok(None));
        assert_eq!(
            controller.begin_submission(),
            Err(SessionError::Closed(SessionStatus::Expired))
        );
    }

    #[test]
    fn test_late_result_after_expiry_is_ignored() {
        let (mut controller, clock) = loaded(data(
            vec![question(1, None), question(2, None)],
            vec![persisted(5, 1)],
        ));
        controller.set_answer_text(2, "slow answer").unwrap();
        controller.begin_submission().unwrap();

        clock.advance(ChronoDuration::seconds(BUDGET));
        assert!(controller.reconcile().is_some());

        let effect = controller.complete_submission(outcome(
            Some(6),
            Verdict::Continue {
                question: "More?".to_string(),
                question_id: Some(40),
            },
        ));
        assert_eq!(effect, SubmissionEffect::Ignored);
        assert!(!controller.forest().contains(40));
        assert_eq!(controller.status(), SessionStatus::Expired);
    }

    #[test]
    fn test_ticks_expire_short_session() {
        let clock = Arc::new(ManualClock::new(now()));
        let mut controller = SessionController::new(
            7,
            SessionSettings {
                budget_seconds: 2,
                ..settings()
            },
            clock,
        );
        let mut short = data(vec![question(1, None)], vec![]);
        short.started_at = "2026-10-16T10:00:00Z".to_string();
        assert!(controller.load(short).unwrap().is_none());

        assert!(controller.tick().is_none());
        let fired = controller.tick().unwrap();
        assert_eq!(fired.reason, FinalizeReason::TimeLimit);
        assert!(controller.tick().is_none());
        assert!(controller.remaining_seconds() >= 0);
    }

    #[test]
    fn test_manual_exit_fires_gate_once() {
        let mut controller = fresh_session();
        let finalization = controller.exit().unwrap().unwrap();
        assert_eq!(finalization.reason, FinalizeReason::ManualExit);
        assert!(finalization.calls_end_endpoint());
        assert_eq!(controller.status(), SessionStatus::Exited);
        assert_eq!(controller.exit(), Ok(None));
        assert!(controller.reconcile().is_none());
    }

    #[test]
    fn test_drafts_rejected_for_unknown_question_and_while_loading() {
        let clock = Arc::new(ManualClock::new(now()));
        let mut loading = SessionController::new(7, settings(), clock);
        assert_eq!(loading.set_answer_text(1, "x"), Err(SessionError::NotReady));
        assert_eq!(loading.begin_submission(), Err(SessionError::NotReady));

        let mut controller = fresh_session();
        assert_eq!(
            controller.set_answer_notes(99, "notes"),
            Err(SessionError::UnknownQuestion(99))
        );
    }

    #[test]
    fn test_snapshot_reports_labels_and_answers() {
        let (mut controller, _) = loaded(data(
            vec![question(1, None), question(2, None), question(10, Some(1))],
            vec![persisted(100, 1)],
        ));
        controller.set_answer_notes(10, "mention tokio").unwrap();
        let snapshot = controller.snapshot();

        let labels: Vec<_> = snapshot.questions.iter().map(|q| q.label.as_str()).collect();
        assert_eq!(labels, vec!["1", "A", "2"]);
        assert_eq!(snapshot.current_question_id, Some(10));
        assert_eq!(snapshot.cursor, Some(1));
        assert!(snapshot.questions[0].persisted);
        assert_eq!(snapshot.questions[1].notes, "mention tokio");
        assert_eq!(snapshot.questions[1].root_id, Some(1));
        assert_eq!(snapshot.remaining_seconds, BUDGET - 5);
    }
}
