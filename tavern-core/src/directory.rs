//! Channel-keyed directories of per-channel state.
//!
//! The directory lock only guards the map itself. It is held to look up or
//! insert a handle and released before the caller touches the channel's
//! content, so one busy channel never stalls another.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Identifier of a chat channel (a group chat, or the local console).
pub type ChannelId = i64;

/// Lazily-populated map from channel to shared per-channel state.
#[derive(Debug)]
pub struct Directory<T> {
    channels: RwLock<HashMap<ChannelId, Arc<T>>>,
}

impl<T> Directory<T> {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Handle for a channel, if one exists.
    pub fn get(&self, channel_id: ChannelId) -> Option<Arc<T>> {
        self.channels.read().get(&channel_id).cloned()
    }

    /// Handle for a channel, creating it with `create` on first access.
    ///
    /// Concurrent first accesses all receive the same handle; `create` runs
    /// at most once per channel that ends up inserted.
    pub fn get_or_create_with(
        &self,
        channel_id: ChannelId,
        create: impl FnOnce() -> T,
    ) -> Arc<T> {
        if let Some(existing) = self.get(channel_id) {
            return existing;
        }

        let mut channels = self.channels.write();
        channels
            .entry(channel_id)
            .or_insert_with(|| {
                tracing::debug!(channel_id, "Creating channel state");
                Arc::new(create())
            })
            .clone()
    }

    /// Insert `value` unless the channel already exists.
    ///
    /// Returns `None` when inserted, or the existing handle otherwise.
    pub fn insert_if_absent(&self, channel_id: ChannelId, value: T) -> Option<Arc<T>> {
        let mut channels = self.channels.write();
        match channels.get(&channel_id) {
            Some(existing) => Some(existing.clone()),
            None => {
                channels.insert(channel_id, Arc::new(value));
                None
            }
        }
    }

    /// All channel ids, sorted.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<_> = self.channels.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Handles for every channel, sorted by id.
    ///
    /// The directory lock is released before this returns, so callers may
    /// lock each channel in turn without blocking channel creation.
    pub fn handles(&self) -> Vec<(ChannelId, Arc<T>)> {
        let mut handles: Vec<_> = self
            .channels
            .read()
            .iter()
            .map(|(id, value)| (*id, value.clone()))
            .collect();
        handles.sort_unstable_by_key(|(id, _)| *id);
        handles
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}

impl<T> Default for Directory<T> {
    fn default() -> Self {
        Self::new()
    }
}
