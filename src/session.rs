use chrono::Local;
use serde::Serialize;
use uuid::Uuid;

use crate::constants::GREETING;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: String,
}

/// Everything one browser session remembers: the visible transcript and the
/// list of questions asked so far.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub id: Uuid,
    messages: Vec<Message>,
    query_history: Vec<String>,
}

impl ChatSession {
    pub fn new() -> Self {
        let mut session = Self {
            id: Uuid::new_v4(),
            messages: Vec::new(),
            query_history: Vec::new(),
        };
        session.clear_messages();
        session
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn query_history(&self) -> &[String] {
        &self.query_history
    }

    /// History lines as shown in the sidebar, numbered from 1.
    pub fn numbered_history(&self) -> Vec<String> {
        self.query_history
            .iter()
            .enumerate()
            .map(|(i, query)| format!("{}. {}", i + 1, query))
            .collect()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Role::User, content.into());
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Role::Assistant, content.into());
    }

    pub fn record_query(&mut self, question: impl Into<String>) {
        self.query_history.push(question.into());
    }

    /// Reset the transcript to the greeting. Query history is kept.
    pub fn clear_messages(&mut self) {
        self.messages.clear();
        self.push(Role::Assistant, GREETING.to_string());
    }

    fn push(&mut self, role: Role, content: String) {
        let timestamp = Local::now().format("%H:%M:%S").to_string();
        self.messages.push(Message {
            role,
            content,
            timestamp,
        });
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}
