//! Per-channel conversation memory.
//!
//! Keeps a sliding window of recent messages plus a rolling narrative
//! summary of everything older. Plain eviction at the cap is only a
//! backstop; the summarizer compacts history well before it is reached.

use crate::directory::ChannelId;
use crate::error::StoreError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
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

/// A single message in a channel's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Serializable copy of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationExport {
    pub history: Vec<Message>,
    #[serde(default)]
    pub summary: String,
    pub max_len: usize,
}

/// Position in a conversation's append sequence, taken with
/// [`ConversationStore::marked_context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendMark(u64);

#[derive(Debug)]
struct ConversationState {
    history: VecDeque<Message>,
    summary: String,
    max_len: usize,
    /// Messages ever appended; survives compaction and clear.
    appended: u64,
}

impl ConversationState {
    fn evict_overflow(&mut self) {
        while self.history.len() > self.max_len {
            self.history.pop_front();
        }
    }

    fn keep_last(&mut self, keep: usize) {
        while self.history.len() > keep {
            self.history.pop_front();
        }
    }
}

/// Ordered message log and rolling summary for one channel.
#[derive(Debug)]
pub struct ConversationStore {
    channel_id: ChannelId,
    state: RwLock<ConversationState>,
}

impl ConversationStore {
    /// Create an empty conversation capped at `max_len` messages.
    ///
    /// A cap of zero is treated as one.
    pub fn new(channel_id: ChannelId, max_len: usize) -> Self {
        Self {
            channel_id,
            state: RwLock::new(ConversationState {
                history: VecDeque::new(),
                summary: String::new(),
                max_len: max_len.max(1),
                appended: 0,
            }),
        }
    }

    /// Rebuild a conversation from an export.
    pub fn from_export(
        channel_id: ChannelId,
        export: &ConversationExport,
    ) -> Result<Self, StoreError> {
        let state = Self::state_from_export(export)?;
        Ok(Self {
            channel_id,
            state: RwLock::new(state),
        })
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Append a message, evicting the oldest ones beyond the cap.
    ///
    /// Returns the history length after the append.
    pub fn append(&self, role: Role, content: impl Into<String>) -> usize {
        let mut state = self.state.write();
        state.history.push_back(Message::new(role, content));
        state.appended += 1;
        state.evict_overflow();
        state.history.len()
    }

    /// Copy of the current history, oldest first.
    pub fn history(&self) -> Vec<Message> {
        self.state.read().history.iter().cloned().collect()
    }

    /// History and summary read under one lock.
    pub fn context(&self) -> (Vec<Message>, String) {
        let state = self.state.read();
        (
            state.history.iter().cloned().collect(),
            state.summary.clone(),
        )
    }

    /// Like [`context`](Self::context), plus a mark for
    /// [`set_summary_and_compact_since`](Self::set_summary_and_compact_since).
    pub fn marked_context(&self) -> (Vec<Message>, String, AppendMark) {
        let state = self.state.read();
        (
            state.history.iter().cloned().collect(),
            state.summary.clone(),
            AppendMark(state.appended),
        )
    }

    pub fn summary(&self) -> String {
        self.state.read().summary.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().history.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.state.read().max_len
    }

    /// Replace the summary and keep only the last `keep` messages.
    ///
    /// Both changes happen under one write lock, so a concurrent append
    /// lands entirely before or entirely after the compaction.
    pub fn set_summary_and_compact(&self, summary: impl Into<String>, keep: usize) {
        let mut state = self.state.write();
        state.summary = summary.into();
        state.keep_last(keep);
    }

    /// Replace the summary written from the history read at `mark`.
    ///
    /// Keeps the last `keep` messages, or every message appended since
    /// `mark` if there are more of those, since the new summary has not
    /// seen them. The history cap still applies.
    pub fn set_summary_and_compact_since(
        &self,
        summary: impl Into<String>,
        keep: usize,
        mark: AppendMark,
    ) {
        let mut state = self.state.write();
        let unseen =
            usize::try_from(state.appended.saturating_sub(mark.0)).unwrap_or(usize::MAX);
        state.summary = summary.into();
        state.keep_last(keep.max(unseen));
    }

    /// Forget everything: history and summary.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.history.clear();
        state.summary.clear();
    }

    /// Copy the current contents.
    pub fn export(&self) -> ConversationExport {
        let state = self.state.read();
        ConversationExport {
            history: state.history.iter().cloned().collect(),
            summary: state.summary.clone(),
            max_len: state.max_len,
        }
    }

    /// Replace the whole contents with an export.
    ///
    /// The export is validated first; on error the conversation is unchanged.
    pub fn restore(&self, export: &ConversationExport) -> Result<(), StoreError> {
        let mut restored = Self::state_from_export(export)?;
        let mut state = self.state.write();
        restored.appended = state.appended;
        *state = restored;
        Ok(())
    }

    fn state_from_export(export: &ConversationExport) -> Result<ConversationState, StoreError> {
        if export.max_len == 0 {
            return Err(StoreError::invalid("conversation max_len must be at least 1"));
        }
        let mut state = ConversationState {
            history: export.history.iter().cloned().collect(),
            summary: export.summary.clone(),
            max_len: export.max_len,
            appended: 0,
        };
        state.evict_overflow();
        Ok(state)
    }
}
