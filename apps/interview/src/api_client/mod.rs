//! Interview backend client: the single point of entry for all calls to the
//! interview, grading and finalize endpoints.
//!
//! The session layer only sees the [`InterviewApi`] trait; [`HttpInterviewApi`]
//! is the production implementation over `reqwest`.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::TokenProvider;
use crate::models::answer::AnswerId;
use crate::models::interview::{
    EditAnswerRequest, InterviewData, InterviewId, NewAnswerRequest, SubmitResponse,
};
use crate::session::verdict::Verdict;

const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Attempts for idempotent reads. Answer submissions are never retried automatically.
const MAX_FETCH_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Not authenticated")]
    Unauthorized,

    #[error("Interview not found")]
    NotFound,
}

/// How the session layer should react to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network trouble or a 5xx/429: offer the user a retry.
    Transient,
    /// Session expired; handled by the auth collaborator.
    Auth,
    /// The interview no longer exists; leave the session.
    NotFound,
    /// Any other rejection of the request.
    Rejected,
}

impl ApiError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::Http(_) => ErrorClass::Transient,
            ApiError::Api { status, .. } if *status == 429 || *status >= 500 => {
                ErrorClass::Transient
            }
            ApiError::Api { .. } | ApiError::Parse(_) => ErrorClass::Rejected,
            ApiError::Unauthorized => ErrorClass::Auth,
            ApiError::NotFound => ErrorClass::NotFound,
        }
    }
}

/// What an answer submission produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    /// Server id of a newly persisted answer.
    pub answer_id: Option<AnswerId>,
    pub verdict: Verdict,
}

/// External endpoints the session controller depends on.
#[async_trait]
pub trait InterviewApi: Send + Sync {
    async fn fetch_interview(&self, interview_id: InterviewId) -> Result<InterviewData, ApiError>;

    async fn submit_answer(&self, request: &NewAnswerRequest) -> Result<SubmitOutcome, ApiError>;

    async fn edit_answer(&self, request: &EditAnswerRequest) -> Result<SubmitOutcome, ApiError>;

    async fn end_interview(&self, interview_id: InterviewId) -> Result<(), ApiError>;
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Clone)]
pub struct HttpInterviewApi {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpInterviewApi {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenProvider>) -> Result<Self, ApiError> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    fn url(&self, path: &str) -> String {
        endpoint(&self.base_url, path)
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let token = self
            .tokens
            .valid_token()
            .await
            .ok_or(ApiError::Unauthorized)?;
        Ok(request.bearer_auth(token))
    }

    /// Maps non-success statuses onto [`ApiError`].
    async fn check(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status.as_u16() {
            401 => Err(ApiError::Unauthorized),
            404 => Err(ApiError::NotFound),
            code => {
                let body = response.text().await.unwrap_or_default();
                Err(ApiError::Api {
                    status: code,
                    message: extract_error_message(&body),
                })
            }
        }
    }

    async fn send_answer<T: serde::Serialize + Sync>(
        &self,
        request: RequestBuilder,
        body: &T,
    ) -> Result<SubmitOutcome, ApiError> {
        let response = self.authorized(request).await?.json(body).send().await?;
        let response = Self::check(response).await?;
        let text = response.text().await?;
        Ok(decode_submit_body(&text))
    }
}

#[async_trait]
impl InterviewApi for HttpInterviewApi {
    /// Retries transport errors and 5xx/429 with exponential backoff.
    async fn fetch_interview(&self, interview_id: InterviewId) -> Result<InterviewData, ApiError> {
        let url = self.url(&format!("interview/{interview_id}"));
        let mut last_error: Option<ApiError> = None;

        for attempt in 0..MAX_FETCH_RETRIES {
            if attempt > 0 {
                // 500ms, 1s
                let delay = Duration::from_millis(500 * (1 << (attempt - 1)));
                warn!(
                    "Interview fetch attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let result = async {
                let response = self.authorized(self.client.get(&url)).await?.send().await?;
                let response = Self::check(response).await?;
                Ok::<_, ApiError>(response.json::<InterviewData>().await?)
            }
            .await;

            match result {
                Ok(data) => {
                    debug!(
                        "Fetched interview {}: {} questions, {} answers",
                        interview_id,
                        data.questions.len(),
                        data.answers.len()
                    );
                    return Ok(data);
                }
                Err(e) if e.class() == ErrorClass::Transient => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(ApiError::Api {
            status: 503,
            message: "interview fetch exhausted retries".to_string(),
        }))
    }

    async fn submit_answer(&self, request: &NewAnswerRequest) -> Result<SubmitOutcome, ApiError> {
        let url = self.url(&format!("interview/{}/answers", request.interview_id));
        self.send_answer(self.client.post(url), request).await
    }

    async fn edit_answer(&self, request: &EditAnswerRequest) -> Result<SubmitOutcome, ApiError> {
        let url = self.url(&format!("interview/{}/answers", request.interview_id));
        self.send_answer(self.client.put(url), request).await
    }

    async fn end_interview(&self, interview_id: InterviewId) -> Result<(), ApiError> {
        let url = self.url(&format!("interview/{interview_id}/end"));
        let response = self.authorized(self.client.post(url)).await?.send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Pulls a human-readable message out of an error body, falling back to the raw text.
fn extract_error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope {
            error: Some(ErrorBody { message }),
            ..
        }) => message,
        Ok(ErrorEnvelope {
            message: Some(message),
            ..
        }) => message,
        _ => body.trim().to_string(),
    }
}

/// Decodes an answer endpoint body. A body that is not a verdict at all is
/// still a successful submission, just one with no usable verdict.
fn decode_submit_body(body: &str) -> SubmitOutcome {
    match serde_json::from_str::<SubmitResponse>(body) {
        Ok(response) => SubmitOutcome {
            answer_id: response.answer_id.filter(|id| *id > 0),
            verdict: response.verdict.into(),
        },
        Err(e) => {
            warn!("Grading response is not a verdict ({e}); treating as unrecognized");
            SubmitOutcome {
                answer_id: None,
                verdict: Verdict::Unrecognized,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_without_double_slashes() {
        assert_eq!(
            endpoint("https://api.example.com/v1/", "/interview/4/end"),
            "https://api.example.com/v1/interview/4/end"
        );
        assert_eq!(
            endpoint("http://localhost:8000", "interview/4"),
            "http://localhost:8000/interview/4"
        );
    }

    #[test]
    fn test_extract_error_message_shapes() {
        assert_eq!(
            extract_error_message(r#"{"error": {"message": "grader unavailable"}}"#),
            "grader unavailable"
        );
        assert_eq!(extract_error_message(r#"{"message": "bad input"}"#), "bad input");
        assert_eq!(extract_error_message(" Bad Gateway \n"), "Bad Gateway");
    }

    #[test]
    fn test_decode_submit_body_with_follow_up() {
        let outcome = decode_submit_body(
            r#"{"answer_id": 17, "should_continue": true, "question": "Can you elaborate?"}"#,
        );
        assert_eq!(outcome.answer_id, Some(17));
        assert_eq!(
            outcome.verdict,
            Verdict::Continue {
                question: "Can you elaborate?".to_string(),
                question_id: None
            }
        );
    }

    #[test]
    fn test_decode_submit_body_tolerates_garbage() {
        let outcome = decode_submit_body("<html>oops</html>");
        assert_eq!(outcome.answer_id, None);
        assert_eq!(outcome.verdict, Verdict::Unrecognized);
    }

    #[test]
    fn test_decode_submit_body_ignores_non_positive_answer_id() {
        let outcome = decode_submit_body(r#"{"answerId": 0, "should_continue": false, "next_question_id": 2}"#);
        assert_eq!(outcome.answer_id, None);
        assert_eq!(outcome.verdict, Verdict::AdvanceTo { question_id: 2 });
    }

    #[test]
    fn test_error_classes() {
        let server = ApiError::Api {
            status: 502,
            message: String::new(),
        };
        let throttled = ApiError::Api {
            status: 429,
            message: String::new(),
        };
        let invalid = ApiError::Api {
            status: 422,
            message: String::new(),
        };
        assert_eq!(server.class(), ErrorClass::Transient);
        assert_eq!(throttled.class(), ErrorClass::Transient);
        assert_eq!(invalid.class(), ErrorClass::Rejected);
        assert_eq!(ApiError::Unauthorized.class(), ErrorClass::Auth);
        assert_eq!(ApiError::NotFound.class(), ErrorClass::NotFound);
    }
}
