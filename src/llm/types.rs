//! Common types for LLM interactions

use std::fmt;

/// Role of a turn in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role-tagged message unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Generation parameters sent with every request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationParams {
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { max_tokens: 256 }
    }
}

/// LLM request: the full ordered history plus generation parameters
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub turns: Vec<Turn>,
    pub params: GenerationParams,
}

impl LlmRequest {
    /// Concatenated text of all system turns, for providers that take the
    /// system prompt out of band
    pub fn system_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .turns
            .iter()
            .filter(|t| t.role == Role::System)
            .map(|t| t.text.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    /// Non-system turns in order, with consecutive turns of the same role
    /// folded into one. A retained user turn from a failed attempt followed by
    /// a new user turn would otherwise break strict role alternation.
    pub fn dialogue(&self) -> Vec<Turn> {
        let mut merged: Vec<Turn> = Vec::new();
        for turn in self.turns.iter().filter(|t| t.role != Role::System) {
            match merged.last_mut() {
                Some(last) if last.role == turn.role => {
                    last.text.push_str("\n\n");
                    last.text.push_str(&turn.text);
                }
                _ => merged.push(turn.clone()),
            }
        }
        merged
    }
}

/// LLM response
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Usage,
}

/// Usage statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}
