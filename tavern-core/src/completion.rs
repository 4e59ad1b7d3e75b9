//! Chat-completion collaborator interface.
//!
//! The store never performs network calls itself. Handlers and the
//! summarizer call a [`ChatCompletion`] implementation after releasing
//! every channel lock.

use crate::conversation::Message;
use async_trait::async_trait;
use thiserror::Error;

/// Errors from a chat-completion backend.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Empty response from model")]
    EmptyResponse,
}

/// A backend that turns a message list into the next assistant reply.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, messages: Vec<Message>) -> Result<String, CompletionError>;
}
