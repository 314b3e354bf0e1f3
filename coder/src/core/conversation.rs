//! Append-only conversation with bounded compaction.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Ordered turns that always begin with exactly one system turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn {
                role: Role::System,
                content: system_prompt.into(),
            }],
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::User,
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::Assistant,
            content: content.into(),
        });
    }

    /// Collapse to `{system, summary, last keep_recent turns}` once the turn
    /// count exceeds `max_turns`. Returns whether compaction happened.
    pub fn compact(&mut self, max_turns: usize, keep_recent: usize, summary: String) -> bool {
        if self.turns.len() <= max_turns {
            return false;
        }
        let system = self.turns[0].clone();
        let tail_start = self.turns.len().saturating_sub(keep_recent).max(1);
        let mut compacted = Vec::with_capacity(keep_recent + 2);
        compacted.push(system);
        compacted.push(Turn {
            role: Role::User,
            content: summary,
        });
        compacted.extend(self.turns.drain(tail_start..));
        self.turns = compacted;
        true
    }
}
