//! Per-channel game state for a chat-hosted D&D narrator.
//!
//! This crate provides:
//! - A character registry and a bounded conversation history per channel
//! - Rolling-summary compaction of long conversations
//! - Point-in-time snapshots of every channel, restored at startup
//! - Dot-commands and narrator turns driven through a chat-completion trait
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tavern_core::{GameStore, Narrator, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = GameStore::shared(StoreConfig::from_env()?)?;
//!     store.restore_latest().await?;
//!
//!     let narrator = Narrator::new(store.clone(), Arc::new(MyModelClient::new()));
//!     let reply = narrator.handle(1001, "Alice", "I look around the tavern").await?;
//!     println!("{reply}");
//!
//!     store.save_snapshot(store.scenario()).await?;
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod dice;
pub mod directory;
pub mod effects;
pub mod entity;
pub mod error;
pub mod narrator;
pub mod snapshot;
pub mod store;
pub mod summarize;
pub mod testing;

// Primary public API
pub use commands::Command;
pub use completion::{ChatCompletion, CompletionError};
pub use config::StoreConfig;
pub use conversation::{AppendMark, ConversationStore, Message, Role};
pub use directory::{ChannelId, Directory};
pub use entity::{Entity, EntityRegistry, HpChange, HpOutcome};
pub use error::StoreError;
pub use narrator::{Narrator, NarratorError, NarratorReply};
pub use snapshot::{LoadedSnapshot, Snapshot, SnapshotStore};
pub use store::GameStore;
pub use summarize::Summarizer;
pub use testing::ScriptedCompletion;
