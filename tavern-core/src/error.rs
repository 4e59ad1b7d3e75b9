//! Error types shared by the store, snapshot, and command layers.

use thiserror::Error;

/// Errors from store operations.
///
/// An absent snapshot on load is not an error: `load_latest` returns
/// `Ok(None)` for that case.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("No snapshot found")]
    NoSnapshot,
}

impl StoreError {
    pub(crate) fn entity_not_found(name: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind: "Character",
            name: name.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        StoreError::InvalidArgument(message.into())
    }

    /// Whether this error should be shown to a player rather than logged.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. } | StoreError::InvalidArgument(_) | StoreError::NoSnapshot
        )
    }
}
