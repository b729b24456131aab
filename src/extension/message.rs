//! Chat message payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatAuthor {
    pub name: String,
    pub channel_id: String,
    #[serde(default)]
    pub is_moderator: bool,
    #[serde(default)]
    pub is_owner: bool,
}

impl ChatAuthor {
    pub fn new(name: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel_id: channel_id.into(),
            is_moderator: false,
            is_owner: false,
        }
    }

    pub fn moderator(mut self) -> Self {
        self.is_moderator = true;
        self
    }

    pub fn owner(mut self) -> Self {
        self.is_owner = true;
        self
    }
}

/// One inbound chat message as delivered to [`Extension::handle_message`](super::Extension::handle_message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub author: ChatAuthor,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(author: ChatAuthor, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// `"[author]: text"`, the overlay's display form.
    pub fn display_line(&self) -> String {
        format!("[{}]: {}", self.author.name, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_line() {
        let msg = ChatMessage::new(ChatAuthor::new("dave", "UC123"), "hello there");
        assert_eq!(msg.display_line(), "[dave]: hello there");
    }

    #[test]
    fn test_author_roles() {
        let author = ChatAuthor::new("mod", "UC1").moderator();
        assert!(author.is_moderator);
        assert!(!author.is_owner);
        assert!(ChatAuthor::new("o", "UC2").owner().is_owner);
    }

    #[test]
    fn test_deserialize_defaults_roles() {
        let author: ChatAuthor =
            serde_json::from_str(r#"{"name":"a","channel_id":"UC9"}"#).unwrap();
        assert!(!author.is_moderator);
        assert!(!author.is_owner);
    }

    #[test]
    fn test_messages_get_unique_ids() {
        let a = ChatMessage::new(ChatAuthor::new("a", "1"), "x");
        let b = ChatMessage::new(ChatAuthor::new("a", "1"), "x");
        assert_ne!(a.id, b.id);
    }
}
