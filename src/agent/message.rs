//! Conversation state owned by the turn orchestrator.
//!
//! The conversation is append-only while a turn runs. Only the orchestrator
//! may roll it back (connectivity failure) or clear it between turns.

use serde::{Deserialize, Serialize};

use super::tool::{ToolCall, ToolOutput};

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationEntry {
    /// User input.
    User {
        /// Input text.
        content: String,
    },
    /// Final assistant answer of a turn.
    Assistant {
        /// Answer text.
        content: String,
    },
    /// A client-side tool call made during a turn.
    ToolCall(ToolCall),
    /// The output of a client-side tool call.
    ToolOutput(ToolOutput),
    /// A turn that was abandoned after the server had answered.
    ///
    /// Kept for the session record; never sent back to the server.
    Failure {
        /// Why the turn was abandoned.
        message: String,
    },
}

impl ConversationEntry {
    /// A user entry.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    /// An assistant entry.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    /// Whether the entry is part of the request payload.
    #[must_use]
    pub const fn is_sent(&self) -> bool {
        !matches!(self, Self::Failure { .. })
    }
}

/// Ordered conversation history of one session.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    entries: Vec<ConversationEntry>,
}

impl Conversation {
    /// Empty conversation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn push(&mut self, entry: ConversationEntry) {
        self.entries.push(entry);
    }

    /// Appends several entries in order.
    pub fn extend(&mut self, entries: impl IntoIterator<Item = ConversationEntry>) {
        self.entries.extend(entries);
    }

    /// All entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    /// Entries that go on the wire.
    pub fn sent_entries(&self) -> impl Iterator<Item = &ConversationEntry> {
        self.entries.iter().filter(|e| e.is_sent())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been said yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of user turns.
    #[must_use]
    pub fn turn_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, ConversationEntry::User { .. }))
            .count()
    }

    /// Drops everything after `len` entries.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Forgets the whole history.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
