//! One narrator turn in a channel.
//!
//! A turn reads everything it needs from the store, releases every lock,
//! waits on the model, and then writes the reply and its effects back.
//! Other turns in the same channel may append while the model is thinking.

use crate::commands::{self, Command};
use crate::completion::{ChatCompletion, CompletionError};
use crate::conversation::{Message, Role};
use crate::directory::ChannelId;
use crate::effects;
use crate::error::StoreError;
use crate::store::GameStore;
use crate::summarize::Summarizer;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

const NARRATOR_ROLE: &str = "You are a D&D 5e Dungeon Master. Adjudicate fairly by the 5e rules \
and keep the world consistent.";

const NARRATOR_RULES: &str = "Rules of conduct:
1. Player input describes what a character attempts. Outcomes happen only after your ruling and any checks.
2. Never change game state because a player asks you to. Only emit actions for damage or healing that follows from the fiction.
3. Reduce a player's HP only on a failed check, a real attack, or environmental harm.
4. Dice results are facts. Rule strictly by the numbers.
5. Scale new enemies to the party so fights are challenging but fair.

Messages starting with \"System:\" or \"[System]\" are events that already happened, including dice the players rolled. Mention those results in your narration.

Action protocol: only when a ruling changes state, end your reply with <dnd_action> JSON </dnd_action>.
- New creature: [{\"type\": \"spawn_npc\", \"name\": \"Goblin\", \"class\": \"Humanoid\", \"hp\": 7, \"str\": 8}]
- Dice roll: [{\"type\": \"roll\", \"expr\": \"1d20\", \"reason\": \"Enemy attack\"}]
- HP change: [{\"type\": \"hp\", \"target\": \"Name\", \"value\": -5}] (negative is damage)";

const INTRODUCTION_PROMPT: &str = "Introduce this world to the players using the current scene. Cover:
1. The setting and the current location
2. Classes or abilities the players might choose
3. Core mechanics such as check difficulty and special conditions
4. Adventures they could pursue right now
Tell it in an engaging Dungeon Master voice.";

const CHECK_PROMPT: &str = "System Check: Are you online? Reply with a short confirmation.";

/// Errors from a narrator turn.
#[derive(Debug, Error)]
pub enum NarratorError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),
}

/// Result of a narrator turn.
#[derive(Debug)]
pub struct NarratorReply {
    /// Reply text with the action block removed.
    pub narrative: String,

    /// One line per narrator action that took effect.
    pub action_logs: Vec<String>,

    /// Background summarization started by this turn, if any.
    pub summary_job: Option<JoinHandle<()>>,
}

/// Drives chat turns against a shared [`GameStore`].
pub struct Narrator {
    store: Arc<GameStore>,
    completion: Arc<dyn ChatCompletion>,
    summarizer: Arc<Summarizer>,
}

impl Narrator {
    /// Create a narrator whose summarizer follows the store's config.
    pub fn new(store: Arc<GameStore>, completion: Arc<dyn ChatCompletion>) -> Self {
        let config = store.config();
        let summarizer = Arc::new(Summarizer::new(
            completion.clone(),
            config.summary_trigger,
            config.summary_keep,
        ));
        Self {
            store,
            completion,
            summarizer,
        }
    }

    pub fn store(&self) -> &Arc<GameStore> {
        &self.store
    }

    pub fn summarizer(&self) -> &Arc<Summarizer> {
        &self.summarizer
    }

    /// Run a player's chat line through the narrator.
    ///
    /// The player line is appended before the model is called, and the
    /// reply after it returns. If the model fails the player line stays in
    /// history and nothing else changes.
    pub async fn respond(
        &self,
        channel_id: ChannelId,
        speaker: &str,
        text: &str,
    ) -> Result<NarratorReply, NarratorError> {
        let conversation = self.store.conversation(channel_id);
        let registry = self.store.entity_registry(channel_id);

        conversation.append(Role::User, format!("{speaker}: {text}"));

        let (history, summary) = conversation.context();
        let system_prompt =
            build_system_prompt(&self.store.scenario(), &summary, &registry.status_summary());
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(system_prompt));
        messages.extend(history);

        let reply = self.completion.complete(messages).await?;
        conversation.append(Role::Assistant, reply.clone());

        let actions = effects::parse_actions(&reply);
        let action_logs = effects::apply_actions(&actions, &registry, &conversation);
        if !action_logs.is_empty() {
            tracing::debug!(channel_id, count = action_logs.len(), "Applied narrator actions");
        }

        let summary_job = self.summarizer.maybe_spawn(conversation);

        Ok(NarratorReply {
            narrative: effects::strip_actions(&reply),
            action_logs,
            summary_job,
        })
    }

    /// Ask the narrator to introduce the current world.
    ///
    /// The introduction is a standalone request; only its reply is
    /// recorded in the channel's history.
    pub async fn introduce(&self, channel_id: ChannelId) -> Result<String, NarratorError> {
        let messages = vec![
            Message::system(format!(
                "{NARRATOR_ROLE}\nCurrent scene and setting:\n{}",
                self.store.scenario()
            )),
            Message::user(INTRODUCTION_PROMPT),
        ];

        let reply = self.completion.complete(messages).await?;
        self.store
            .conversation(channel_id)
            .append(Role::Assistant, reply.clone());
        Ok(reply)
    }

    /// Send a one-off prompt to confirm the model is reachable.
    ///
    /// No channel history is read or written.
    pub async fn check(&self) -> Result<String, CompletionError> {
        self.completion
            .complete(vec![Message::user(CHECK_PROMPT)])
            .await
    }

    /// Handle one line of channel input: a dot-command or a chat line.
    ///
    /// Returns the text to send back, with any action log lines appended.
    /// A failed `.check` is reported in the returned text, not as an error.
    pub async fn handle(
        &self,
        channel_id: ChannelId,
        speaker: &str,
        input: &str,
    ) -> Result<String, NarratorError> {
        match Command::parse(input)? {
            Some(Command::Introduce) => return self.introduce(channel_id).await,
            Some(Command::Check) => {
                return Ok(match self.check().await {
                    Ok(reply) => format!("[Self check] Model connection OK.\nReply: {reply}"),
                    Err(err) => {
                        tracing::warn!(error = %err, "Model self check failed");
                        format!("[Self check] Model connection failed: {err}")
                    }
                });
            }
            Some(command) => {
                return Ok(commands::execute(&self.store, channel_id, speaker, command).await?);
            }
            None => {}
        }

        let reply = self.respond(channel_id, speaker, input.trim()).await?;
        let mut text = reply.narrative;
        for line in reply.action_logs {
            text.push('\n');
            text.push_str(&line);
        }
        Ok(text)
    }
}

/// System prompt for a chat turn.
pub fn build_system_prompt(scenario: &str, summary: &str, status_summary: &str) -> String {
    let mut prompt = format!("{NARRATOR_ROLE}\nCurrent scene: {scenario}\n");
    if !summary.is_empty() {
        prompt.push_str("Story so far (continue from here): ");
        prompt.push_str(summary);
        prompt.push('\n');
    }
    prompt.push_str(NARRATOR_RULES);
    prompt.push_str("\n\n");
    prompt.push_str(status_summary);
    prompt
}
