//! The process-wide game store.
//!
//! `GameStore` is constructed once at startup and shared by handle with
//! every request handler. It owns the two channel directories, the current
//! scenario text, and the snapshot directory.

use crate::config::{check_scenario_file_name, StoreConfig};
use crate::conversation::ConversationStore;
use crate::directory::{ChannelId, Directory};
use crate::entity::EntityRegistry;
use crate::error::StoreError;
use crate::snapshot::{ChannelSnapshot, LoadedSnapshot, Snapshot, SnapshotStore};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::fs;

/// Shared state for all channels.
#[derive(Debug)]
pub struct GameStore {
    config: StoreConfig,
    conversations: Directory<ConversationStore>,
    entities: Directory<EntityRegistry>,
    scenario: RwLock<String>,
    snapshots: SnapshotStore,
}

impl GameStore {
    /// Create an empty store after validating the config.
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        Ok(Self {
            scenario: RwLock::new(config.scenario.clone()),
            snapshots: SnapshotStore::new(config.snapshot_dir.clone()),
            conversations: Directory::new(),
            entities: Directory::new(),
            config,
        })
    }

    /// Create a store ready to be shared between handlers.
    pub fn shared(config: StoreConfig) -> Result<Arc<Self>, StoreError> {
        Self::new(config).map(Arc::new)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// The channel's conversation, created empty on first access.
    pub fn conversation(&self, channel_id: ChannelId) -> Arc<ConversationStore> {
        let max_history = self.config.max_history;
        self.conversations
            .get_or_create_with(channel_id, || ConversationStore::new(channel_id, max_history))
    }

    /// The channel's entity registry, created empty on first access.
    pub fn entity_registry(&self, channel_id: ChannelId) -> Arc<EntityRegistry> {
        self.entities
            .get_or_create_with(channel_id, || EntityRegistry::new(channel_id))
    }

    /// Existing conversation without creating one.
    pub fn find_conversation(&self, channel_id: ChannelId) -> Option<Arc<ConversationStore>> {
        self.conversations.get(channel_id)
    }

    /// Existing entity registry without creating one.
    pub fn find_entity_registry(&self, channel_id: ChannelId) -> Option<Arc<EntityRegistry>> {
        self.entities.get(channel_id)
    }

    /// Every channel id known to either directory, sorted.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        let mut ids = self.conversations.channel_ids();
        ids.extend(self.entities.channel_ids());
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn scenario(&self) -> String {
        self.scenario.read().clone()
    }

    pub fn set_scenario(&self, scenario: impl Into<String>) {
        *self.scenario.write() = scenario.into();
    }

    /// Capture every channel.
    ///
    /// Each channel's conversation and registry is copied under its own read
    /// lock, so every per-channel export is internally consistent. No lock
    /// spans more than one channel.
    pub fn export(&self, scenario: impl Into<String>) -> Snapshot {
        let mut snapshot = Snapshot::new(scenario);

        for (id, conversation) in self.conversations.handles() {
            snapshot.channels.entry(id).or_default().conversation = Some(conversation.export());
        }
        for (id, registry) in self.entities.handles() {
            snapshot.channels.entry(id).or_default().entities = Some(registry.export());
        }

        snapshot
    }

    /// Load a snapshot's channels into the directories.
    ///
    /// Channels present in the snapshot are overwritten; other channels are
    /// left alone. Every channel is validated before any is touched, so an
    /// invalid snapshot changes nothing. Existing handles stay valid and see
    /// the restored content. The scenario text is not changed.
    pub fn import(&self, snapshot: &Snapshot) -> Result<usize, StoreError> {
        let mut staged = Vec::with_capacity(snapshot.channels.len());
        for (&id, channel) in &snapshot.channels {
            let conversation = channel
                .conversation
                .as_ref()
                .map(|export| ConversationStore::from_export(id, export))
                .transpose()?;
            let registry = channel
                .entities
                .as_ref()
                .map(|export| EntityRegistry::from_export(id, export))
                .transpose()?;
            staged.push((id, channel, conversation, registry));
        }

        for (id, channel, conversation, registry) in staged {
            self.install_channel(id, channel, conversation, registry)?;
        }

        tracing::info!(channels = snapshot.channel_count(), "Snapshot imported");
        Ok(snapshot.channel_count())
    }

    fn install_channel(
        &self,
        id: ChannelId,
        channel: &ChannelSnapshot,
        conversation: Option<ConversationStore>,
        registry: Option<EntityRegistry>,
    ) -> Result<(), StoreError> {
        if let (Some(conversation), Some(export)) = (conversation, &channel.conversation) {
            if let Some(existing) = self.conversations.insert_if_absent(id, conversation) {
                existing.restore(export)?;
            }
        }
        if let (Some(registry), Some(export)) = (registry, &channel.entities) {
            if let Some(existing) = self.entities.insert_if_absent(id, registry) {
                existing.restore(export)?;
            }
        }
        Ok(())
    }

    /// Export everything and write it as a new snapshot file.
    pub async fn save_snapshot(&self, scenario: impl Into<String>) -> Result<String, StoreError> {
        let snapshot = self.export(scenario);
        self.snapshots.save(&snapshot).await
    }

    /// Read the most recent snapshot without touching the directories.
    pub async fn load_latest_snapshot(&self) -> Result<Option<LoadedSnapshot>, StoreError> {
        self.snapshots.load_latest().await
    }

    /// Delete the most recent snapshot file.
    pub async fn delete_latest_snapshot(&self) -> Result<String, StoreError> {
        self.snapshots.delete_latest().await
    }

    /// Read a scenario file from the scenario directory and make it the
    /// current scenario.
    ///
    /// Names containing `..`, `/` or `\` are `InvalidArgument`.
    pub async fn load_scenario_file(&self, name: &str) -> Result<String, StoreError> {
        check_scenario_file_name(name)?;

        let path = self.config.scenario_dir.join(name);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    kind: "Scenario file",
                    name: path.display().to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        self.set_scenario(content.clone());
        tracing::info!(file = %name, "Loaded scenario file");
        Ok(content)
    }

    /// Load the most recent snapshot, import it, and adopt its scenario.
    ///
    /// The configured scenario file, when it can be read, then replaces
    /// the scenario from the snapshot. This also applies on a fresh start.
    /// Returns the snapshot file name restored from, or `None` if there
    /// was no snapshot.
    pub async fn restore_latest(&self) -> Result<Option<String>, StoreError> {
        let restored = match self.load_latest_snapshot().await? {
            Some(loaded) => {
                self.import(&loaded.snapshot)?;
                self.set_scenario(loaded.snapshot.scenario.clone());
                tracing::info!(
                    file = %loaded.file_name,
                    taken_at = %loaded.snapshot.timestamp,
                    "Restored game state"
                );
                Some(loaded.file_name)
            }
            None => {
                tracing::info!("No snapshot to restore, starting fresh");
                None
            }
        };

        if let Some(file) = self.config.scenario_file.clone() {
            if let Err(err) = self.load_scenario_file(&file).await {
                tracing::warn!(file = %file, error = %err, "Keeping current scenario");
            }
        }

        Ok(restored)
    }
}
