//! Wire types exchanged with the interview backend.

use serde::{Deserialize, Serialize};

use crate::models::answer::{Answer, AnswerId};
use crate::models::question::{Question, QuestionId};
use crate::session::verdict::RawVerdict;

pub type InterviewId = i64;

/// Payload of the interview data endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewData {
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub answers: Vec<Answer>,
    #[serde(alias = "started_at")]
    pub started_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewAnswerRequest {
    pub interview_id: InterviewId,
    pub question_id: QuestionId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EditAnswerRequest {
    pub interview_id: InterviewId,
    pub question_id: QuestionId,
    pub new_text: String,
}

/// Body returned by both answer endpoints: the grading verdict plus, for new
/// answers, the id the server assigned.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitResponse {
    #[serde(default, alias = "answerId")]
    pub answer_id: Option<AnswerId>,
    #[serde(flatten)]
    pub verdict: RawVerdict,
}
