//! Rolling-summary compaction of channel history.
//!
//! Once a channel's history reaches the trigger length, a background job
//! asks the model to fold the previous summary and the recent messages
//! into a new summary, then compacts the history down to a short tail.
//! The model call happens with no channel lock held.

use crate::completion::{ChatCompletion, CompletionError};
use crate::conversation::{ConversationStore, Message, Role};
use crate::directory::ChannelId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::task::JoinHandle;

const SUMMARY_INSTRUCTIONS: &str = "Using the previous summary and the recent conversation, \
write a new, coherent story summary. Include the current time and place, key NPCs, \
the players' current condition, quests in progress, and important items gained or lost. \
Output only the summary.";

/// Builds summaries and applies them to conversations.
pub struct Summarizer {
    completion: Arc<dyn ChatCompletion>,
    trigger: usize,
    keep: usize,
    in_flight: Mutex<HashSet<ChannelId>>,
}

impl Summarizer {
    /// Summarize once history reaches `trigger` messages, keeping the last
    /// `keep` messages afterwards.
    pub fn new(completion: Arc<dyn ChatCompletion>, trigger: usize, keep: usize) -> Self {
        Self {
            completion,
            trigger: trigger.max(1),
            keep,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn trigger(&self) -> usize {
        self.trigger
    }

    pub fn keep(&self) -> usize {
        self.keep
    }

    /// Whether a conversation is long enough to summarize.
    pub fn should_summarize(&self, conversation: &ConversationStore) -> bool {
        conversation.len() >= self.trigger
    }

    /// Whether a job is currently running for a channel.
    pub fn is_running(&self, channel_id: ChannelId) -> bool {
        self.in_flight.lock().contains(&channel_id)
    }

    /// Summarize and compact a conversation now.
    ///
    /// Reads history and summary, releases the lock, awaits the model, and
    /// then writes the new summary with a single compaction. Messages
    /// appended during the model call are kept even beyond `keep`, since
    /// the new summary does not cover them.
    pub async fn summarize(
        &self,
        conversation: &ConversationStore,
    ) -> Result<String, CompletionError> {
        let (history, previous, mark) = conversation.marked_context();
        let prompt = build_summary_prompt(&previous, &history);

        let summary = self.completion.complete(vec![Message::user(prompt)]).await?;
        let summary = summary.trim().to_string();
        if summary.is_empty() {
            return Err(CompletionError::EmptyResponse);
        }

        conversation.set_summary_and_compact_since(summary.clone(), self.keep, mark);
        Ok(summary)
    }

    /// Start a background summarization if the conversation is long enough
    /// and no job is already running for its channel.
    ///
    /// Must be called from within a tokio runtime.
    pub fn maybe_spawn(
        self: &Arc<Self>,
        conversation: Arc<ConversationStore>,
    ) -> Option<JoinHandle<()>> {
        if !self.should_summarize(&conversation) {
            return None;
        }

        let channel_id = conversation.channel_id();
        if !self.in_flight.lock().insert(channel_id) {
            tracing::debug!(channel_id, "Summarization already running");
            return None;
        }

        tracing::info!(
            channel_id,
            history_len = conversation.len(),
            "Auto-summary triggered"
        );
        let summarizer = Arc::clone(self);
        Some(tokio::spawn(async move {
            match summarizer.summarize(&conversation).await {
                Ok(summary) => {
                    tracing::info!(channel_id, summary_len = summary.len(), "Auto-summary updated");
                }
                Err(err) => tracing::warn!(channel_id, error = %err, "Auto-summary failed"),
            }
            summarizer.in_flight.lock().remove(&channel_id);
        }))
    }
}

/// Prompt asking the model for a new rolling summary.
///
/// System messages are left out; player and narrator lines are labelled.
pub fn build_summary_prompt(previous_summary: &str, history: &[Message]) -> String {
    let mut prompt = String::from(SUMMARY_INSTRUCTIONS);
    prompt.push_str("\n\n");

    if !previous_summary.is_empty() {
        let _ = write!(prompt, "Previous summary:\n{previous_summary}\n\n");
    }

    prompt.push_str("Recent conversation:\n");
    for message in history {
        let speaker = match message.role {
            Role::System => continue,
            Role::User => "Player/System",
            Role::Assistant => "DM",
        };
        let _ = writeln!(prompt, "{speaker}: {}", message.content);
    }
    prompt
}
