//! Point-in-time snapshots of every channel, written to disk.
//!
//! One JSON document per save, named `snapshot_<UTC timestamp>.ss`. The
//! "latest" snapshot is the matching file with the newest modification
//! time in the snapshot directory (non-recursive); ties go to the larger
//! file name.

use crate::conversation::ConversationExport;
use crate::directory::ChannelId;
use crate::entity::EntityExport;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

const SNAPSHOT_PREFIX: &str = "snapshot_";
const SNAPSHOT_EXTENSION: &str = ".ss";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Exported state of one channel. Either half may be absent when the
/// channel only ever touched one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationExport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<EntityExport>,
}

/// A complete capture of the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Format version for compatibility checking.
    pub version: u32,

    /// When the capture was taken.
    pub timestamp: DateTime<Utc>,

    /// Scenario text active at capture time.
    pub scenario: String,

    /// Every channel, by id.
    pub channels: BTreeMap<ChannelId, ChannelSnapshot>,
}

impl Snapshot {
    /// An empty snapshot stamped with the current time.
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            timestamp: Utc::now(),
            scenario: scenario.into(),
            channels: BTreeMap::new(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// A snapshot read back from disk, with the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    pub file_name: String,
    pub snapshot: Snapshot,
}

/// Whether a file name follows the snapshot naming convention.
pub fn is_snapshot_file_name(name: &str) -> bool {
    name.len() > SNAPSHOT_PREFIX.len() + SNAPSHOT_EXTENSION.len()
        && name.starts_with(SNAPSHOT_PREFIX)
        && name.ends_with(SNAPSHOT_EXTENSION)
        && !name.contains(['/', '\\'])
}

/// File name for a snapshot taken at `timestamp`.
pub fn snapshot_file_name(timestamp: DateTime<Utc>) -> String {
    format!(
        "{SNAPSHOT_PREFIX}{}{SNAPSHOT_EXTENSION}",
        timestamp.format(TIMESTAMP_FORMAT)
    )
}

/// Reads and writes snapshot files in one directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a snapshot to a new file and return its name.
    ///
    /// The document is written to a temporary file private to this save and
    /// then hard-linked under the first free snapshot name. Linking fails
    /// if the name exists, so concurrent saves never share or overwrite a
    /// file, and a failed save never leaves a partial file under a
    /// snapshot name.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<String, StoreError> {
        let content = serde_json::to_string_pretty(snapshot)?;
        fs::create_dir_all(&self.dir).await?;

        let base = snapshot_file_name(snapshot.timestamp);
        let tmp_path = self
            .dir
            .join(format!("{base}.{:016x}.tmp", rand::random::<u64>()));
        if let Err(err) = fs::write(&tmp_path, content).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        let claimed = self.claim_file_name(&base, &tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        let file_name = claimed?;

        tracing::info!(
            file = %file_name,
            channels = snapshot.channel_count(),
            "Snapshot saved"
        );
        Ok(file_name)
    }

    /// Load a specific snapshot by file name.
    pub async fn load(&self, file_name: &str) -> Result<Snapshot, StoreError> {
        if !is_snapshot_file_name(file_name) {
            return Err(StoreError::invalid(format!(
                "'{file_name}' is not a snapshot file name"
            )));
        }

        let content = fs::read_to_string(self.dir.join(file_name)).await?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: snapshot.version,
            });
        }

        Ok(snapshot)
    }

    /// Load the most recently modified snapshot, or `None` if there is none.
    pub async fn load_latest(&self) -> Result<Option<LoadedSnapshot>, StoreError> {
        let Some(file_name) = self.latest_file_name().await? else {
            tracing::debug!(dir = %self.dir.display(), "No snapshot found");
            return Ok(None);
        };

        tracing::info!(file = %file_name, "Loading snapshot");
        let snapshot = self.load(&file_name).await?;
        Ok(Some(LoadedSnapshot {
            file_name,
            snapshot,
        }))
    }

    /// Delete the most recently modified snapshot and return its name.
    pub async fn delete_latest(&self) -> Result<String, StoreError> {
        let file_name = self
            .latest_file_name()
            .await?
            .ok_or(StoreError::NoSnapshot)?;

        fs::remove_file(self.dir.join(&file_name)).await?;
        tracing::info!(file = %file_name, "Snapshot deleted");
        Ok(file_name)
    }

    /// All snapshot file names with their modification times, newest first.
    pub async fn list(&self) -> Result<Vec<(String, SystemTime)>, StoreError> {
        let mut found = Vec::new();

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_snapshot_file_name(&name) {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            found.push((name, modified));
        }

        found.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        Ok(found)
    }

    async fn latest_file_name(&self) -> Result<Option<String>, StoreError> {
        Ok(self.list().await?.into_iter().next().map(|(name, _)| name))
    }

    /// Link `tmp_path` under `base`, or `base` with the first free `-N`
    /// suffix.
    async fn claim_file_name(&self, base: &str, tmp_path: &Path) -> Result<String, StoreError> {
        let stem = &base[..base.len() - SNAPSHOT_EXTENSION.len()];
        let mut counter = 0u32;
        loop {
            let candidate = if counter == 0 {
                base.to_string()
            } else {
                format!("{stem}-{counter}{SNAPSHOT_EXTENSION}")
            };
            match fs::hard_link(tmp_path, self.dir.join(&candidate)).await {
                Ok(()) => return Ok(candidate),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => counter += 1,
                Err(err) => return Err(err.into()),
            }
        }
    }
}
