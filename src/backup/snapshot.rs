//! Versioned snapshot documents

use crate::engine::EngineSnapshot;
use crate::error::{MatchmakingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Layout version of the serialized document
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

const SNAPSHOT_EXTENSION: &str = ".json";

/// Point-in-time copy of the engine state, tagged with a monotonic version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub format_version: u32,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub state: EngineSnapshot,
}

impl BackupSnapshot {
    pub fn new(version: u64, created_at: DateTime<Utc>, state: EngineSnapshot) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            version,
            created_at,
            state,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::StorageError {
                message: format!("Failed to serialize snapshot {}: {}", self.version, e),
            }
            .into()
        })
    }

    /// Parse a stored document, refusing layouts newer than this build
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: BackupSnapshot =
            serde_json::from_slice(bytes).map_err(|e| MatchmakingError::StorageError {
                message: format!("Unreadable snapshot: {}", e),
            })?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(MatchmakingError::StorageError {
                message: format!(
                    "Snapshot {} uses format {}, newest supported is {}",
                    snapshot.version, snapshot.format_version, SNAPSHOT_FORMAT_VERSION
                ),
            }
            .into());
        }
        Ok(snapshot)
    }
}

/// Summary of one stored snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub version: u64,
    pub key: String,
    pub created_at: Option<DateTime<Utc>>,
    pub size_bytes: Option<usize>,
}

/// Storage key for a version. Zero padding keeps lexical and numeric order
/// the same.
pub fn snapshot_key(prefix: &str, version: u64) -> String {
    format!("{}{:020}{}", prefix, version, SNAPSHOT_EXTENSION)
}

/// Inverse of [`snapshot_key`]; None for keys that are not snapshots
pub fn parse_version(prefix: &str, key: &str) -> Option<u64> {
    key.strip_prefix(prefix)?
        .strip_suffix(SNAPSHOT_EXTENSION)?
        .parse()
        .ok()
}
