//! Question forest: root questions plus one linear follow-up chain per root.
//!
//! Nodes live in an id-keyed arena. Chain order is held in a successor map
//! (`question -> next follow-up`), so insertion and truncation relink ids
//! instead of splicing positions. The flattened ordering is always derived
//! from `roots` + `successor` and never stored.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::warn;

use crate::models::question::{Question, QuestionId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForestError {
    #[error("question {0} is not in the forest")]
    UnknownQuestion(QuestionId),

    #[error("question {0} already exists in the forest")]
    DuplicateQuestion(QuestionId),
}

#[derive(Debug, Clone, Default)]
pub struct QuestionForest {
    nodes: HashMap<QuestionId, Question>,
    /// Root ids in creation order.
    roots: Vec<QuestionId>,
    /// Next follow-up after a question within its branch.
    successor: HashMap<QuestionId, QuestionId>,
}

impl QuestionForest {
    /// Builds a forest from server records.
    ///
    /// Roots keep the order they were delivered in. A follow-up whose parent
    /// already has a successor is appended to the tail of that chain so every
    /// branch stays linear. Follow-ups whose ancestry never reaches a root are
    /// dropped.
    pub fn from_records(records: Vec<Question>) -> Self {
        let mut forest = QuestionForest::default();
        let (roots, mut pending): (Vec<_>, Vec<_>) =
            records.into_iter().partition(Question::is_root);

        for root in roots {
            if forest.nodes.contains_key(&root.id) {
                warn!("Duplicate root question {} in interview data, skipping", root.id);
                continue;
            }
            forest.roots.push(root.id);
            forest.nodes.insert(root.id, root);
        }

        // Parents may be delivered after their follow-ups, so link in passes
        // until nothing more attaches.
        loop {
            let before = pending.len();
            let mut unresolved = Vec::new();
            for question in pending {
                let Some(parent_id) = question.parent_id else {
                    continue;
                };
                if forest.nodes.contains_key(&question.id) {
                    warn!("Duplicate follow-up {} in interview data, skipping", question.id);
                    continue;
                }
                if !forest.nodes.contains_key(&parent_id) {
                    unresolved.push(question);
                    continue;
                }
                forest.append_to_chain(parent_id, question);
            }
            pending = unresolved;
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }

        for orphan in &pending {
            warn!(
                "Follow-up {} references unknown parent {:?}, dropping",
                orphan.id, orphan.parent_id
            );
        }

        forest
    }

    fn append_to_chain(&mut self, parent_id: QuestionId, mut question: Question) {
        let tail = self.chain_tail(parent_id);
        if tail != parent_id {
            warn!(
                "Question {} already has follow-up {}, appending {} to chain tail {}",
                parent_id,
                self.successor[&parent_id],
                question.id,
                tail
            );
        }
        question.parent_id = Some(tail);
        self.successor.insert(tail, question.id);
        self.nodes.insert(question.id, question);
    }

    fn chain_tail(&self, from: QuestionId) -> QuestionId {
        let mut tail = from;
        while let Some(next) = self.successor.get(&tail) {
            tail = *next;
        }
        tail
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: QuestionId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: QuestionId) -> Option<&Question> {
        self.nodes.get(&id)
    }

    pub fn roots(&self) -> &[QuestionId] {
        &self.roots
    }

    pub fn is_root(&self, id: QuestionId) -> bool {
        self.nodes.get(&id).is_some_and(Question::is_root)
    }

    /// Walks parent links up to the root of the branch containing `id`.
    pub fn root_of(&self, id: QuestionId) -> Option<QuestionId> {
        let mut current = self.nodes.get(&id)?;
        // Bounded by the node count so a corrupted parent cycle cannot spin forever.
        for _ in 0..=self.nodes.len() {
            match current.parent_id {
                None => return Some(current.id),
                Some(parent) => current = self.nodes.get(&parent)?,
            }
        }
        None
    }

    /// Root followed by its entire follow-up chain. Empty when `root_id` is not a root.
    pub fn branch_of(&self, root_id: QuestionId) -> Vec<QuestionId> {
        if !self.is_root(root_id) {
            return Vec::new();
        }
        let mut branch = vec![root_id];
        let mut current = root_id;
        while let Some(next) = self.successor.get(&current) {
            branch.push(*next);
            current = *next;
        }
        branch
    }

    /// Display ordering: each root immediately followed by its chain.
    pub fn flatten(&self) -> Vec<QuestionId> {
        self.roots
            .iter()
            .flat_map(|root| self.branch_of(*root))
            .collect()
    }

    /// Questions in display order.
    pub fn questions(&self) -> Vec<&Question> {
        self.flatten()
            .into_iter()
            .filter_map(|id| self.nodes.get(&id))
            .collect()
    }

    pub fn position(&self, id: QuestionId) -> Option<usize> {
        self.flatten().iter().position(|q| *q == id)
    }

    /// The question displayed right after `id`, if any.
    pub fn next_after(&self, id: QuestionId) -> Option<QuestionId> {
        let order = self.flatten();
        let index = order.iter().position(|q| *q == id)?;
        order.get(index + 1).copied()
    }

    /// Human-readable label: `1, 2, 3…` for roots, `A, B, C…` for follow-ups
    /// by position within their root's chain.
    pub fn label_of(&self, id: QuestionId) -> Option<String> {
        if self.is_root(id) {
            let index = self.roots.iter().position(|r| *r == id)?;
            return Some((index + 1).to_string());
        }
        let root = self.root_of(id)?;
        let position = self.branch_of(root).iter().position(|q| *q == id)?;
        Some(follow_up_label(position))
    }

    /// Inserts `question` directly after `after` in display order and makes
    /// `after` its parent. A follow-up that previously came next is relinked
    /// behind the new node.
    pub fn insert_follow_up(
        &mut self,
        after: QuestionId,
        mut question: Question,
    ) -> Result<(), ForestError> {
        if !self.nodes.contains_key(&after) {
            return Err(ForestError::UnknownQuestion(after));
        }
        if self.nodes.contains_key(&question.id) {
            return Err(ForestError::DuplicateQuestion(question.id));
        }

        let new_id = question.id;
        question.parent_id = Some(after);
        if let Some(displaced) = self.successor.insert(after, new_id) {
            self.successor.insert(new_id, displaced);
            if let Some(node) = self.nodes.get_mut(&displaced) {
                node.parent_id = Some(new_id);
            }
        }
        self.nodes.insert(new_id, question);
        Ok(())
    }

    /// Removes every chain member positioned after `id` in its branch. For a
    /// root this is the whole chain; the root itself always survives.
    pub fn truncate_after(&mut self, id: QuestionId) -> Result<HashSet<QuestionId>, ForestError> {
        if !self.nodes.contains_key(&id) {
            return Err(ForestError::UnknownQuestion(id));
        }
        let mut removed = HashSet::new();
        let mut next = self.successor.remove(&id);
        while let Some(current) = next {
            next = self.successor.remove(&current);
            self.nodes.remove(&current);
            removed.insert(current);
        }
        Ok(removed)
    }
}

/// 1 → A, 26 → Z, 27 → AA.
fn follow_up_label(position: usize) -> String {
    let mut remaining = position;
    let mut letters = Vec::new();
    while remaining > 0 {
        remaining -= 1;
        letters.push((b'A' + (remaining % 26) as u8) as char);
        remaining /= 26;
    }
    letters.iter().rev().collect()
}
