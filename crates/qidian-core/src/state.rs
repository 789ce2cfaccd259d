//! UI-agnostic conversation state types
//!
//! This module contains the message list shared between the session runner
//! and whatever front-end displays it. Nothing here depends on a UI framework.

use serde::{Deserialize, Serialize};

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    pub role: ChatRole,
    pub content: String,
    /// Set on the assistant placeholder until its answer starts or ends.
    #[serde(default)]
    pub generating: bool,
    /// The content is an error report, not an answer.
    #[serde(default)]
    pub failed: bool,
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// `{role, content}` pair as sent in a request's `chat_history`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: ChatRole,
    pub content: String,
}

/// Ordered message list with stable ids
#[derive(Debug, Default, Clone)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    next_id: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn message(&self, id: u64) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn message_mut(&mut self, id: u64) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    pub fn push_user(&mut self, content: &str) -> u64 {
        self.push(ChatRole::User, content.to_string(), false)
    }

    /// Empty assistant message awaiting its answer.
    pub fn push_placeholder(&mut self) -> u64 {
        self.push(ChatRole::Assistant, String::new(), true)
    }

    /// Already complete message, e.g. restored history.
    pub fn push_complete(&mut self, role: ChatRole, content: &str) -> u64 {
        self.push(role, content.to_string(), false)
    }

    /// Prior turns worth sending back to the server: everything except
    /// placeholders that are still generating or never received content,
    /// and failed answers.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.messages
            .iter()
            .filter(|m| !m.generating && !m.failed && !m.content.is_empty())
            .map(|m| HistoryEntry {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    }

    /// Id of the message currently generating, if any.
    pub fn generating(&self) -> Option<u64> {
        self.messages.iter().find(|m| m.generating).map(|m| m.id)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn push(&mut self, role: ChatRole, content: String, generating: bool) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.messages.push(ChatMessage {
            id,
            role,
            content,
            generating,
            failed: false,
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_after_clear() {
        let mut conversation = Conversation::new();
        let first = conversation.push_user("hi");
        conversation.clear();
        let second = conversation.push_user("hi again");
        assert_ne!(first, second);
    }

    #[test]
    fn test_history_skips_placeholders() {
        let mut conversation = Conversation::new();
        conversation.push_user("question");
        conversation.push_complete(ChatRole::Assistant, "answer");
        conversation.push_user("follow-up");
        let placeholder = conversation.push_placeholder();

        let history = conversation.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].role, ChatRole::Assistant);
        assert_eq!(conversation.generating(), Some(placeholder));
    }

    #[test]
    fn test_history_skips_failed_answers() {
        let mut conversation = Conversation::new();
        conversation.push_user("first");
        let failed = conversation.push_placeholder();
        if let Some(message) = conversation.message_mut(failed) {
            message.content = "Error: model overloaded".to_string();
            message.generating = false;
            message.failed = true;
        }
        conversation.push_user("second");
        conversation.push_complete(ChatRole::Assistant, "answer");

        let history = conversation.history();
        let contents: Vec<&str> = history.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "answer"]);
    }

    #[test]
    fn test_history_entry_wire_shape() {
        let entry = HistoryEntry {
            role: ChatRole::User,
            content: "hi".to_string(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
