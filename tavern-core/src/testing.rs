//! Testing utilities.
//!
//! - `ScriptedCompletion` returns queued replies instead of calling a model
//! - an optional gate holds each reply until the test releases it, which
//!   lets tests mutate a channel while a "network call" is in flight

use crate::completion::{ChatCompletion, CompletionError};
use crate::conversation::Message;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// Reply used when the script runs out.
pub const DEFAULT_REPLY: &str = "The narrator has nothing more to say.";

/// A chat-completion double that replays scripted replies in order.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
    gate: Option<Gate>,
}

struct Gate {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

/// Test-side controls for a gated [`ScriptedCompletion`].
#[derive(Clone)]
pub struct GateHandle {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl GateHandle {
    /// Wait until a request has reached the completion.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Let one pending request return.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

impl ScriptedCompletion {
    pub fn new(replies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            ..Self::default()
        }
    }

    /// A completion that blocks each request until released.
    pub fn gated(replies: impl IntoIterator<Item = impl Into<String>>) -> (Self, GateHandle) {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut completion = Self::new(replies);
        completion.gate = Some(Gate {
            started: started.clone(),
            release: release.clone(),
        });
        (completion, GateHandle { started, release })
    }

    /// Queue another reply.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().push_back(Ok(reply.into()));
    }

    /// Queue a failure.
    pub fn push_error(&self, error: CompletionError) {
        self.replies.lock().push_back(Err(error));
    }

    /// Every message list received so far.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ChatCompletion for ScriptedCompletion {
    async fn complete(&self, messages: Vec<Message>) -> Result<String, CompletionError> {
        self.requests.lock().push(messages);

        if let Some(gate) = &self.gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }

        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(DEFAULT_REPLY.to_string()))
    }
}
