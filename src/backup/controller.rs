//! Backup controller
//!
//! Writes versioned snapshots of the engine state and restores the newest
//! readable one at startup. The engine lock is held only while the state is
//! cloned and numbered; serialization and the store write happen afterwards,
//! bounded by a timeout. Store failures are logged and retried on the next
//! tick.

use crate::backup::snapshot::{parse_version, snapshot_key, BackupSnapshot, SnapshotInfo};
use crate::backup::store::SnapshotStore;
use crate::config::BackupSettings;
use crate::engine::{Matchmaker, RestoreReport};
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::types::EngineEvent;
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Result of the most recent snapshot attempt, for health checks
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotOutcome {
    pub version: u64,
    pub at: DateTime<Utc>,
    pub error: Option<String>,
}

impl SnapshotOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// What startup restore found
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    Restored {
        version: u64,
        report: RestoreReport,
        /// Newer snapshots that could not be read
        skipped: Vec<u64>,
    },
    /// No snapshot stored; the engine starts empty
    Empty,
    /// Snapshots exist but none could be loaded; the engine starts empty
    Failed { reason: String },
}

impl RestoreOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RestoreOutcome::Restored { .. } => "restored",
            RestoreOutcome::Empty => "empty",
            RestoreOutcome::Failed { .. } => "failed",
        }
    }
}

pub struct BackupController {
    store: Arc<dyn SnapshotStore>,
    prefix: String,
    retention: usize,
    write_timeout: Duration,
    next_version: AtomicU64,
    last_outcome: RwLock<Option<SnapshotOutcome>>,
    metrics_collector: Option<Arc<MetricsCollector>>,
}

impl BackupController {
    pub fn new(store: Arc<dyn SnapshotStore>, settings: &BackupSettings) -> Self {
        Self {
            store,
            prefix: settings.prefix.clone(),
            retention: settings.retention_count.max(1),
            write_timeout: Duration::from_secs(settings.write_timeout_seconds.max(1)),
            next_version: AtomicU64::new(1),
            last_outcome: RwLock::new(None),
            metrics_collector: None,
        }
    }

    pub fn with_metrics(mut self, metrics_collector: Arc<MetricsCollector>) -> Self {
        self.metrics_collector = Some(metrics_collector);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Version the next snapshot will carry
    pub fn next_version(&self) -> u64 {
        self.next_version.load(Ordering::SeqCst)
    }

    pub fn last_outcome(&self) -> Option<SnapshotOutcome> {
        self.last_outcome
            .read()
            .map(|outcome| outcome.clone())
            .unwrap_or(None)
    }

    fn set_last_outcome(&self, outcome: SnapshotOutcome) {
        if let Ok(mut last) = self.last_outcome.write() {
            *last = Some(outcome);
        }
    }

    /// Keep version numbers increasing across restarts
    fn advance_past(&self, version: u64) {
        self.next_version
            .fetch_max(version.saturating_add(1), Ordering::SeqCst);
    }

    /// Write one snapshot of the current state, then prune old ones
    pub async fn snapshot(&self, matchmaker: &Matchmaker) -> Result<SnapshotInfo> {
        let started = Instant::now();
        // Numbered under the engine lock so a higher version never holds older state
        let (version, state) = matchmaker
            .export_numbered(|| self.next_version.fetch_add(1, Ordering::SeqCst))
            .await;
        let created_at = current_timestamp();
        let key = snapshot_key(&self.prefix, version);

        let result = self
            .write(&key, BackupSnapshot::new(version, created_at, state))
            .await;

        let elapsed = started.elapsed();
        match result {
            Ok(size) => {
                if let Some(metrics) = &self.metrics_collector {
                    metrics.record_snapshot(true, version, size, elapsed);
                }
                self.set_last_outcome(SnapshotOutcome {
                    version,
                    at: created_at,
                    error: None,
                });
                info!(
                    "Wrote snapshot {} ({} bytes) in {}ms",
                    version,
                    size,
                    elapsed.as_millis()
                );

                if let Err(e) = self.prune(self.retention).await {
                    warn!("Snapshot retention pass failed: {}", e);
                }
                Ok(SnapshotInfo {
                    version,
                    key,
                    created_at: Some(created_at),
                    size_bytes: Some(size),
                })
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics_collector {
                    metrics.record_snapshot(false, version, 0, elapsed);
                }
                self.set_last_outcome(SnapshotOutcome {
                    version,
                    at: created_at,
                    error: Some(e.to_string()),
                });
                error!("Snapshot {} failed, will retry next interval: {}", version, e);
                Err(e)
            }
        }
    }

    async fn write(&self, key: &str, snapshot: BackupSnapshot) -> Result<usize> {
        let bytes = snapshot.to_bytes()?;
        let size = bytes.len();
        match tokio::time::timeout(self.write_timeout, self.store.put(key, bytes)).await {
            Ok(result) => result.map(|_| size),
            Err(_) => Err(MatchmakingError::StorageError {
                message: format!(
                    "Writing {} timed out after {}s",
                    key,
                    self.write_timeout.as_secs()
                ),
            }
            .into()),
        }
    }

    /// Stored snapshot versions, oldest first
    async fn versions(&self) -> Result<Vec<(u64, String)>> {
        let mut versions: Vec<(u64, String)> = self
            .store
            .list(&self.prefix)
            .await?
            .into_iter()
            .filter_map(|key| parse_version(&self.prefix, &key).map(|v| (v, key)))
            .collect();
        versions.sort();
        Ok(versions)
    }

    async fn load(&self, key: &str) -> Result<BackupSnapshot> {
        let bytes = self.store.get(key).await?.ok_or_else(|| {
            anyhow::Error::from(MatchmakingError::StorageError {
                message: format!("Snapshot {} disappeared", key),
            })
        })?;
        BackupSnapshot::from_bytes(&bytes)
    }

    /// Load the newest readable snapshot into the engine. Never fails: an
    /// empty or unreadable store leaves the engine empty and reports a
    /// `RestoreFailed` event.
    pub async fn restore(&self, matchmaker: &Matchmaker) -> RestoreOutcome {
        let outcome = self.try_restore(matchmaker).await;

        if let Some(metrics) = &self.metrics_collector {
            metrics.record_restore(outcome.label());
        }
        let reason = match &outcome {
            RestoreOutcome::Restored { .. } => None,
            RestoreOutcome::Empty => Some("no snapshot found, starting empty".to_string()),
            RestoreOutcome::Failed { reason } => Some(reason.clone()),
        };
        if let Some(reason) = reason {
            warn!("Restore did not load a snapshot: {}", reason);
            matchmaker
                .publish(vec![EngineEvent::RestoreFailed {
                    reason,
                    timestamp: current_timestamp(),
                }])
                .await;
        }
        outcome
    }

    async fn try_restore(&self, matchmaker: &Matchmaker) -> RestoreOutcome {
        let versions = match self.versions().await {
            Ok(versions) => versions,
            Err(e) => {
                return RestoreOutcome::Failed {
                    reason: format!("could not list snapshots: {}", e),
                }
            }
        };
        if let Some((newest, _)) = versions.last() {
            self.advance_past(*newest);
        } else {
            return RestoreOutcome::Empty;
        }

        let mut skipped = Vec::new();
        for (version, key) in versions.into_iter().rev() {
            match self.load(&key).await {
                Ok(snapshot) => {
                    let report = matchmaker.import_snapshot(snapshot.state).await;
                    info!(
                        "Restored snapshot {} taken at {} ({} skipped)",
                        version,
                        snapshot.created_at,
                        skipped.len()
                    );
                    return RestoreOutcome::Restored {
                        version,
                        report,
                        skipped,
                    };
                }
                Err(e) => {
                    warn!("Skipping unreadable snapshot {}: {}", version, e);
                    skipped.push(version);
                }
            }
        }

        RestoreOutcome::Failed {
            reason: format!("none of {} stored snapshots could be read", skipped.len()),
        }
    }

    /// Read one stored snapshot without touching the engine
    pub async fn load_version(&self, version: u64) -> Result<BackupSnapshot> {
        self.load(&snapshot_key(&self.prefix, version)).await
    }

    /// Load one specific version, replacing the engine state
    pub async fn restore_version(
        &self,
        matchmaker: &Matchmaker,
        version: u64,
    ) -> Result<RestoreReport> {
        let snapshot = self.load_version(version).await?;
        self.advance_past(version);
        let report = matchmaker.import_snapshot(snapshot.state).await;
        info!("Restored snapshot {} on request", version);
        Ok(report)
    }

    /// Every stored snapshot, oldest first. Unreadable documents are listed
    /// without a creation time.
    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        let mut infos = Vec::new();
        for (version, key) in self.versions().await? {
            let bytes = self.store.get(&key).await?;
            let size_bytes = bytes.as_ref().map(Vec::len);
            let created_at = bytes
                .as_deref()
                .and_then(|b| BackupSnapshot::from_bytes(b).ok())
                .map(|s| s.created_at);
            infos.push(SnapshotInfo {
                version,
                key,
                created_at,
                size_bytes,
            });
        }
        Ok(infos)
    }

    /// Delete all but the newest `keep` snapshots. Returns how many were
    /// removed.
    pub async fn prune(&self, keep: usize) -> Result<usize> {
        let versions = self.versions().await?;
        let excess = versions.len().saturating_sub(keep);
        for (version, key) in versions.into_iter().take(excess) {
            self.store.delete(&key).await?;
            debug!("Pruned snapshot {}", version);
        }
        Ok(excess)
    }
}
