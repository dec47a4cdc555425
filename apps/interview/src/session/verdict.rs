//! Grading verdicts.
//!
//! The grading service answers with a loose bag of optional fields. It is
//! decoded exactly once into [`Verdict`]; nothing past this module looks at
//! the raw shape.

use serde::{Deserialize, Serialize};

use crate::models::question::QuestionId;

/// Verdict exactly as the grading service sends it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawVerdict {
    #[serde(default)]
    pub should_continue: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub next_question_id: Option<QuestionId>,
    /// Follow-up question text.
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub interview_completed: Option<bool>,
    #[serde(default)]
    pub farewell_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Ask a follow-up. `question_id` is the id the server assigned to it, when it sent one.
    Continue {
        question: String,
        question_id: Option<QuestionId>,
    },
    /// Move on to another root question.
    AdvanceTo { question_id: QuestionId },
    /// The grading service finalized the interview server-side.
    Complete { message: Option<String> },
    Unrecognized,
}

impl From<RawVerdict> for Verdict {
    fn from(raw: RawVerdict) -> Self {
        if raw.interview_completed == Some(true) {
            return Verdict::Complete {
                message: raw.farewell_message.filter(|m| !m.trim().is_empty()),
            };
        }

        let follow_up = raw
            .question
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty());

        match (raw.should_continue, follow_up, raw.next_question_id) {
            (Some(true), Some(question), question_id) => Verdict::Continue {
                question,
                question_id,
            },
            (Some(false), _, Some(question_id)) => Verdict::AdvanceTo { question_id },
            _ => Verdict::Unrecognized,
        }
    }
}

impl Verdict {
    pub fn kind(&self) -> &'static str {
        match self {
            Verdict::Continue { .. } => "continue",
            Verdict::AdvanceTo { .. } => "advance",
            Verdict::Complete { .. } => "complete",
            Verdict::Unrecognized => "unrecognized",
        }
    }
}
