//! Per-persona conversation history
//!
//! A record always starts with exactly one system turn. User turns are
//! deduplicated against the immediately preceding turn, trimming drops the
//! oldest exchange first, and a reset reseeds a single fresh system turn.

use crate::llm::{Role, Turn};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Conversation {
    turns: Vec<Turn>,
    last_active: Instant,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::system(system_prompt)],
            last_active: Instant::now(),
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Only the system turn is present
    pub fn is_fresh(&self) -> bool {
        self.turns.len() == 1
    }

    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    /// Append a user turn unless the immediately preceding turn is a user turn
    /// with the same text. Returns whether a turn was appended.
    pub fn append_user(&mut self, text: &str, now: Instant) -> bool {
        if self
            .turns
            .last()
            .is_some_and(|last| last.role == Role::User && last.text == text)
        {
            return false;
        }
        self.turns.push(Turn::user(text));
        self.last_active = now;
        true
    }

    pub fn append_assistant(&mut self, text: &str, now: Instant) {
        self.turns.push(Turn::assistant(text));
        self.last_active = now;
    }

    /// Remove the last turn if it is a user turn with exactly this text.
    /// Used to roll back an append after a failed provider call.
    pub fn retract_user(&mut self, text: &str) -> bool {
        let matches = self.turns.len() > 1
            && self
                .turns
                .last()
                .is_some_and(|last| last.role == Role::User && last.text == text);
        if matches {
            self.turns.pop();
        }
        matches
    }

    /// Drop the oldest exchanges until at most `max_context` pairs remain
    /// after the system turn. Returns the number of turns removed.
    pub fn trim(&mut self, max_context: usize) -> usize {
        let limit = 1 + 2 * max_context.max(1);
        let before = self.turns.len();
        while self.turns.len() > limit {
            self.turns.remove(1);
            // Keep the pair together: drop the answer that went with it
            if self.turns.get(1).is_some_and(|t| t.role == Role::Assistant) {
                self.turns.remove(1);
            }
        }
        before - self.turns.len()
    }

    /// Whether the idle reset rule applies, ignoring the busy flag
    pub fn is_idle(&self, now: Instant, threshold: Duration) -> bool {
        !self.is_fresh() && now.saturating_duration_since(self.last_active) >= threshold
    }

    /// Clear history and reseed with a fresh system turn
    pub fn reset(&mut self, system_prompt: impl Into<String>, now: Instant) {
        self.turns.clear();
        self.turns.push(Turn::system(system_prompt));
        self.last_active = now;
    }
}
