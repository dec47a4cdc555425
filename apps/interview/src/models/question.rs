use serde::{Deserialize, Serialize};

pub type QuestionId = i64;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum DifficultyLevel {
    #[serde(alias = "intern", alias = "INTERN")]
    Intern,
    #[serde(alias = "junior", alias = "JUNIOR")]
    Junior,
    #[default]
    #[serde(alias = "mid", alias = "MID")]
    Mid,
    #[serde(alias = "senior", alias = "SENIOR")]
    Senior,
}

/// A single interview question as delivered by the interview data endpoint.
/// `parent_id` is `None` for root questions and set for follow-ups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    #[serde(default, alias = "difficulty_level")]
    pub difficulty_level: DifficultyLevel,
    #[serde(default = "default_mark_weight", alias = "mark_weight")]
    pub mark_weight: f64,
    #[serde(default, alias = "parent_id")]
    pub parent_id: Option<QuestionId>,
}

fn default_mark_weight() -> f64 {
    1.0
}

impl Question {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Builds a follow-up that inherits difficulty and weight from the question it follows.
    pub fn follow_up_of(parent: &Question, id: QuestionId, text: String) -> Self {
        Question {
            id,
            text,
            difficulty_level: parent.difficulty_level,
            mark_weight: parent.mark_weight,
            parent_id: Some(parent.id),
        }
    }
}
