//! Conversation state management
//!
//! An ordered transcript of chat turns. Turns are only ever appended; the
//! text of an assistant turn may be replaced while it streams.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Opaque identifier of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(Uuid);

impl TurnId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who wrote a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Assistant,
}

/// A single chat turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: TurnId,
    pub author: Author,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: TurnId::new(),
            author: Author::User,
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant() -> Self {
        Self {
            id: TurnId::new(),
            author: Author::Assistant,
            text: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// Append-only transcript
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    turns: Vec<ChatTurn>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user turn and return its id.
    pub fn append_user(&mut self, text: impl Into<String>) -> TurnId {
        let turn = ChatTurn::user(text);
        let id = turn.id;
        self.turns.push(turn);
        id
    }

    /// Append an empty assistant turn and return its id.
    pub fn append_assistant_placeholder(&mut self) -> TurnId {
        let turn = ChatTurn::assistant();
        let id = turn.id;
        self.turns.push(turn);
        id
    }

    /// Replace the text of an assistant turn.
    ///
    /// Returns `true` when the transcript changed. Unknown ids and user turns
    /// are logged and ignored: updates can race with [`clear`](Self::clear).
    pub fn update_text(&mut self, id: TurnId, text: impl Into<String>) -> bool {
        let Some(turn) = self.turns.iter_mut().rev().find(|t| t.id == id) else {
            warn!(turn = %id, "update for unknown turn ignored");
            return false;
        };
        if turn.author == Author::User {
            warn!(turn = %id, "refusing to rewrite a user turn");
            return false;
        }
        let text = text.into();
        if turn.text == text {
            return false;
        }
        turn.text = text;
        true
    }

    pub fn get(&self, id: TurnId) -> Option<&ChatTurn> {
        self.turns.iter().find(|t| t.id == id)
    }

    /// Snapshot of all turns in display order.
    pub fn all(&self) -> Vec<ChatTurn> {
        self.turns.clone()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Drop every turn.
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let mut store = ConversationStore::new();
        let user = store.append_user("Hi");
        let assistant = store.append_assistant_placeholder();

        let turns = store.all();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].id, user);
        assert_eq!(turns[0].author, Author::User);
        assert_eq!(turns[0].text, "Hi");
        assert_eq!(turns[1].id, assistant);
        assert_eq!(turns[1].author, Author::Assistant);
        assert!(turns[1].text.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let mut store = ConversationStore::new();
        let a = store.append_user("a");
        let b = store.append_user("a");
        assert_ne!(a, b);
    }

    #[test]
    fn test_update_text_replaces_not_appends() {
        let mut store = ConversationStore::new();
        let id = store.append_assistant_placeholder();

        assert!(store.update_text(id, "H"));
        assert!(store.update_text(id, "Hello"));
        assert_eq!(store.get(id).unwrap().text, "Hello");
    }

    #[test]
    fn test_update_text_same_value_is_unchanged() {
        let mut store = ConversationStore::new();
        let id = store.append_assistant_placeholder();

        assert!(store.update_text(id, "Hello!"));
        assert!(!store.update_text(id, "Hello!"));
        assert_eq!(store.get(id).unwrap().text, "Hello!");
    }

    #[test]
    fn test_update_text_unknown_id_is_noop() {
        let mut store = ConversationStore::new();
        store.append_user("Hi");
        let before = store.all();

        assert!(!store.update_text(TurnId::new(), "boom"));
        assert_eq!(store.all(), before);
    }

    #[test]
    fn test_update_text_after_clear_is_noop() {
        let mut store = ConversationStore::new();
        let id = store.append_assistant_placeholder();
        store.clear();

        assert!(!store.update_text(id, "late"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_user_turn_is_immutable() {
        let mut store = ConversationStore::new();
        let id = store.append_user("original");

        assert!(!store.update_text(id, "edited"));
        assert_eq!(store.get(id).unwrap().text, "original");
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut store = ConversationStore::new();
        let id = store.append_assistant_placeholder();
        let snapshot = store.all();

        store.update_text(id, "changed");
        store.append_user("more");

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].text.is_empty());
        assert_eq!(store.len(), 2);
    }
}
