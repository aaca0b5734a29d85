//! Conversation transcript
//!
//! An append-only log of finished turns plus one mutable slot holding the
//! utterance that is still being transcribed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolStatus,
}

/// One finished conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptItem {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptItem {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Ordered transcript log and the current partial utterance
///
/// The log sits behind an `Arc` so snapshots can share it without copying;
/// appends copy-on-write only when a snapshot still holds the old log.
#[derive(Debug, Default)]
pub struct Transcript {
    items: Arc<Vec<TranscriptItem>>,
    partial: String,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finished turn and return a copy of it
    pub fn append(&mut self, role: Role, text: impl Into<String>) -> TranscriptItem {
        let item = TranscriptItem::new(role, text);
        Arc::make_mut(&mut self.items).push(item.clone());
        item
    }

    pub fn set_partial(&mut self, text: impl Into<String>) {
        self.partial = text.into();
    }

    pub fn clear_partial(&mut self) {
        self.partial.clear();
    }

    /// Replace the log with an empty one and drop the partial utterance
    pub fn clear(&mut self) {
        self.items = Arc::new(Vec::new());
        self.partial.clear();
    }

    pub fn items(&self) -> &[TranscriptItem] {
        &self.items
    }

    /// Shared handle to the current log
    pub fn shared(&self) -> Arc<Vec<TranscriptItem>> {
        Arc::clone(&self.items)
    }

    pub fn partial(&self) -> &str {
        &self.partial
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
