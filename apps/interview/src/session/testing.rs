//! In-memory `InterviewApi` for exercising the runtime and routes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::api_client::{ApiError, InterviewApi, SubmitOutcome};
use crate::models::interview::{EditAnswerRequest, InterviewData, InterviewId, NewAnswerRequest};
use crate::models::question::{DifficultyLevel, Question, QuestionId};
use crate::session::verdict::Verdict;

pub struct MockApi {
    data: Mutex<Option<InterviewData>>,
    verdicts: Mutex<VecDeque<Result<SubmitOutcome, ApiError>>>,
    submissions: Mutex<Vec<String>>,
    end_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    next_answer_id: AtomicI64,
    /// When present, every submission waits for a permit before answering.
    hold: Option<Semaphore>,
}

impl MockApi {
    pub fn new(data: InterviewData) -> Self {
        Self {
            data: Mutex::new(Some(data)),
            verdicts: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            end_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            next_answer_id: AtomicI64::new(1000),
            hold: None,
        }
    }

    /// An interview id the backend does not know.
    pub fn missing() -> Self {
        let api = Self::new(roots(&[]));
        *api.data.lock().unwrap() = None;
        api
    }

    pub fn holding_submissions(mut self) -> Self {
        self.hold = Some(Semaphore::new(0));
        self
    }

    pub fn release_submission(&self) {
        if let Some(hold) = &self.hold {
            hold.add_permits(1);
        }
    }

    pub fn push_verdict(&self, result: Result<SubmitOutcome, ApiError>) {
        self.verdicts.lock().unwrap().push_back(result);
    }

    pub fn submissions(&self) -> Vec<String> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn end_calls(&self) -> usize {
        self.end_calls.load(Ordering::SeqCst)
    }

    async fn answer(&self, record: String) -> Result<SubmitOutcome, ApiError> {
        self.submissions.lock().unwrap().push(record);
        if let Some(hold) = &self.hold {
            hold.acquire().await.expect("semaphore closed").forget();
        }
        let queued = self.verdicts.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            Ok(SubmitOutcome {
                answer_id: Some(self.next_answer_id.fetch_add(1, Ordering::SeqCst)),
                verdict: Verdict::Unrecognized,
            })
        })
    }
}

#[async_trait]
impl InterviewApi for MockApi {
    async fn fetch_interview(&self, _interview_id: InterviewId) -> Result<InterviewData, ApiError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.data.lock().unwrap().clone().ok_or(ApiError::NotFound)
    }

    async fn submit_answer(&self, request: &NewAnswerRequest) -> Result<SubmitOutcome, ApiError> {
        self.answer(format!("new:{}:{}", request.question_id, request.text))
            .await
    }

    async fn edit_answer(&self, request: &EditAnswerRequest) -> Result<SubmitOutcome, ApiError> {
        self.answer(format!("edit:{}:{}", request.question_id, request.new_text))
            .await
    }

    async fn end_interview(&self, _interview_id: InterviewId) -> Result<(), ApiError> {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Interview data with the given root questions, no answers, started at `started_at`.
pub fn roots_started_at(ids: &[QuestionId], started_at: &str) -> InterviewData {
    InterviewData {
        questions: ids
            .iter()
            .map(|id| Question {
                id: *id,
                text: format!("question {id}"),
                difficulty_level: DifficultyLevel::Junior,
                mark_weight: 1.0,
                parent_id: None,
            })
            .collect(),
        answers: Vec::new(),
        started_at: started_at.to_string(),
    }
}

pub fn roots(ids: &[QuestionId]) -> InterviewData {
    roots_started_at(ids, &chrono::Utc::now().to_rfc3339())
}
