use serde::{Deserialize, Serialize};

use crate::models::question::QuestionId;

pub type AnswerId = i64;

/// An answer to one question. `id == 0` means the server has not persisted it yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    #[serde(default)]
    pub id: AnswerId,
    #[serde(alias = "question_id")]
    pub question_id: QuestionId,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub notes: String,
}

impl Answer {
    pub fn draft(question_id: QuestionId) -> Self {
        Answer {
            question_id,
            ..Default::default()
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }
}
