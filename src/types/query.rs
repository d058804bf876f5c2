//! Query request types

use serde::{Deserialize, Serialize};

/// One prior turn of conversation, passed through to the retrieval service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    /// "user" or "assistant"
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A question against a project's knowledge base
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Project whose index should be queried
    pub project_id: String,
    /// The question to answer
    pub question: String,
    /// Optional conversation history
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

impl QueryRequest {
    /// Create a history-free query
    pub fn new(project_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            question: question.into(),
            history: Vec::new(),
        }
    }

    /// Attach conversation history
    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }
}
