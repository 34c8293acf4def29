//! Health check endpoints and monitoring
//!
//! Health checks read the service through a `ServiceProbe`, a cheap clone of
//! the handles the checks need, so the HTTP server never owns the service.

use crate::backup::BackupController;
use crate::engine::{EngineStats, Matchmaker};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Engine lock waits longer than this mark the engine as degraded
const ENGINE_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value: 2 healthy, 1 degraded, 0 unhealthy
    pub fn gauge_value(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Handles the health checks need
#[derive(Clone)]
pub struct ServiceProbe {
    pub service_name: String,
    pub matchmaker: Matchmaker,
    pub backup: Option<Arc<BackupController>>,
    pub is_running: Arc<RwLock<bool>>,
    pub started_at: Instant,
}

impl ServiceProbe {
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub uptime_seconds: u64,
    /// Engine counts, absent when the engine did not answer in time
    pub engine: Option<EngineStats>,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(probe: &ServiceProbe) -> Result<Self> {
        let mut checks = Vec::new();

        checks.push(Self::check_service_running(probe).await);
        let (engine_check, engine) = Self::check_engine(probe).await;
        checks.push(engine_check);
        checks.push(Self::check_backup(probe));

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, c| acc.worst(c.status.clone()));

        Ok(HealthCheck {
            status,
            service: probe.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            uptime_seconds: probe.uptime().as_secs(),
            engine,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(probe: &ServiceProbe) -> Result<HealthStatus> {
        if probe.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - running and the engine answers
    pub async fn readiness_check(probe: &ServiceProbe) -> Result<HealthStatus> {
        if !probe.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }
        Ok(Self::check_engine(probe).await.0.status)
    }

    async fn check_service_running(probe: &ServiceProbe) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if probe.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// The engine is reachable if its lock can be taken within the probe
    /// timeout
    async fn check_engine(probe: &ServiceProbe) -> (ComponentCheck, Option<EngineStats>) {
        let start = Instant::now();

        let (status, message, stats) =
            match tokio::time::timeout(ENGINE_PROBE_TIMEOUT, probe.matchmaker.stats()).await {
                Ok(stats) => (HealthStatus::Healthy, None, Some(stats)),
                Err(_) => {
                    debug!("Engine did not answer the health probe in time");
                    (
                        HealthStatus::Degraded,
                        Some(format!(
                            "Engine busy for more than {}s",
                            ENGINE_PROBE_TIMEOUT.as_secs()
                        )),
                        None,
                    )
                }
            };

        let check = ComponentCheck {
            name: "engine".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        (check, stats)
    }

    /// A failed last snapshot degrades the service; it keeps serving
    fn check_backup(probe: &ServiceProbe) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match &probe.backup {
            None => (HealthStatus::Healthy, Some("Backups disabled".to_string())),
            Some(backup) => match backup.last_outcome() {
                None => (HealthStatus::Healthy, Some("No snapshot yet".to_string())),
                Some(outcome) if outcome.succeeded() => (
                    HealthStatus::Healthy,
                    Some(format!("Snapshot {} at {}", outcome.version, outcome.at)),
                ),
                Some(outcome) => (
                    HealthStatus::Degraded,
                    Some(format!(
                        "Snapshot {} failed: {}",
                        outcome.version,
                        outcome.error.unwrap_or_default()
                    )),
                ),
            },
        };

        ComponentCheck {
            name: "backup".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Convert health check to JSON string
impl HealthCheck {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
