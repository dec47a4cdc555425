//! In-memory answer records for one session.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::{debug, warn};

use crate::models::answer::{Answer, AnswerId};
use crate::models::question::QuestionId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("no answer recorded for question {0}")]
    MissingAnswer(QuestionId),

    #[error("server returned invalid answer id {answer_id} for question {question_id}")]
    InvalidAnswerId {
        question_id: QuestionId,
        answer_id: AnswerId,
    },
}

#[derive(Debug, Clone, Default)]
pub struct AnswerLedger {
    answers: HashMap<QuestionId, Answer>,
    /// Always a subset of the questions whose answer is persisted.
    completed: HashSet<QuestionId>,
}

impl AnswerLedger {
    /// Seeds the ledger from server records; persisted answers count as completed.
    pub fn from_records(records: Vec<Answer>) -> Self {
        let mut ledger = AnswerLedger::default();
        for answer in records {
            if answer.is_persisted() {
                ledger.completed.insert(answer.question_id);
            }
            if let Some(previous) = ledger.answers.insert(answer.question_id, answer) {
                warn!(
                    "Multiple answers delivered for question {}, keeping the last one",
                    previous.question_id
                );
            }
        }
        // A duplicate may have replaced a persisted answer with a draft.
        let answers = &ledger.answers;
        ledger
            .completed
            .retain(|q| answers.get(q).is_some_and(Answer::is_persisted));
        ledger
    }

    pub fn get(&self, question_id: QuestionId) -> Option<&Answer> {
        self.answers.get(&question_id)
    }

    pub fn text(&self, question_id: QuestionId) -> &str {
        self.answers
            .get(&question_id)
            .map(|a| a.text.as_str())
            .unwrap_or("")
    }

    /// True when the server already holds an answer for this question, so the
    /// next submission must go through the edit endpoint.
    pub fn is_edit(&self, question_id: QuestionId) -> bool {
        self.answers
            .get(&question_id)
            .is_some_and(Answer::is_persisted)
    }

    pub fn is_completed(&self, question_id: QuestionId) -> bool {
        self.completed.contains(&question_id)
    }

    pub fn completed(&self) -> &HashSet<QuestionId> {
        &self.completed
    }

    pub fn has_persisted_answers(&self) -> bool {
        self.answers.values().any(Answer::is_persisted)
    }

    pub fn upsert_text(&mut self, question_id: QuestionId, text: impl Into<String>) {
        self.answers
            .entry(question_id)
            .or_insert_with(|| Answer::draft(question_id))
            .text = text.into();
    }

    pub fn upsert_notes(&mut self, question_id: QuestionId, notes: impl Into<String>) {
        self.answers
            .entry(question_id)
            .or_insert_with(|| Answer::draft(question_id))
            .notes = notes.into();
    }

    /// Records the id the server assigned to a newly submitted answer.
    pub fn commit(
        &mut self,
        question_id: QuestionId,
        answer_id: AnswerId,
    ) -> Result<(), LedgerError> {
        if answer_id <= 0 {
            return Err(LedgerError::InvalidAnswerId {
                question_id,
                answer_id,
            });
        }
        let answer = self
            .answers
            .get_mut(&question_id)
            .ok_or(LedgerError::MissingAnswer(question_id))?;
        answer.id = answer_id;
        self.completed.insert(question_id);
        debug!("Answer {answer_id} committed for question {question_id}");
        Ok(())
    }

    /// Drops answers for pruned questions and forgets their completion.
    pub fn remove(&mut self, question_ids: &HashSet<QuestionId>) {
        for id in question_ids {
            self.answers.remove(id);
            self.completed.remove(id);
        }
    }
}
