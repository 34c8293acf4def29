//! Main application configuration
//!
//! This module defines the primary configuration structures for the draft-room
//! engine, including TOML and environment variable loading and validation.

use crate::config::modes::{default_modes, ModeCatalog, ModeConfig};
use crate::types::GameMode;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for every configured timeout or interval (one week)
pub const MAX_TIMEOUT_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub matchmaking: MatchmakingSettings,
    pub backup: BackupSettings,
    pub rating: RatingSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for health check and metrics endpoint
    pub health_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Queue, session and ghost sweep settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Supported modes keyed by name
    pub modes: BTreeMap<GameMode, ModeConfig>,
    /// How long a formed session waits for every member to ready up
    pub confirmation_window_seconds: u64,
    /// Inactivity after which a queued or matched player is flagged as a ghost
    pub ghost_staleness_seconds: u64,
    /// How long a session waits for a substitute before it is cancelled
    pub substitution_grace_seconds: u64,
    /// Interval of the maintenance sweep
    pub ghost_sweep_interval_seconds: u64,
    /// Maximum rating distance between a ghost and their substitute
    pub substitution_rating_band: f64,
    /// Largest roster a party may hold, host included
    pub max_party_size: usize,
}

/// Where snapshots are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupBackend {
    File,
    Memory,
}

impl FromStr for BackupBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "file" => Ok(BackupBackend::File),
            "memory" => Ok(BackupBackend::Memory),
            other => Err(anyhow!("Unknown backup backend: {}", other)),
        }
    }
}

/// Snapshot and retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Take periodic snapshots and restore at startup
    pub enabled: bool,
    pub backend: BackupBackend,
    /// Root directory for the file backend
    pub directory: PathBuf,
    /// Key prefix under which snapshots are stored
    pub prefix: String,
    pub snapshot_interval_seconds: u64,
    /// Number of snapshots kept after each successful write
    pub retention_count: usize,
    /// Bound on a single store write
    pub write_timeout_seconds: u64,
}

/// Skill rating settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingSettings {
    /// Apply Weng-Lin updates when a session completes
    pub update_on_result: bool,
    pub initial_rating: f64,
    pub initial_uncertainty: f64,
    pub beta: f64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "draft-room".to_string(),
            log_level: "info".to_string(),
            health_port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            modes: default_modes(),
            confirmation_window_seconds: 120,
            ghost_staleness_seconds: 600,
            substitution_grace_seconds: 120,
            ghost_sweep_interval_seconds: 30,
            substitution_rating_band: 300.0,
            max_party_size: 5,
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BackupBackend::File,
            directory: PathBuf::from("./backups"),
            prefix: "snapshots/".to_string(),
            snapshot_interval_seconds: 300,
            retention_count: 10,
            write_timeout_seconds: 10,
        }
    }
}

impl Default for RatingSettings {
    fn default() -> Self {
        Self {
            update_on_result: true,
            initial_rating: 1500.0,
            initial_uncertainty: 200.0,
            beta: 200.0,
        }
    }
}

/// Read and parse an environment variable, if it is set
fn env_override<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("Invalid {} value: {}", name, value)),
        Err(_) => Ok(None),
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file; environment variables still win
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env_overrides()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Some(port) = env_override("HEALTH_PORT")? {
            self.service.health_port = port;
        }
        if let Some(timeout) = env_override("SHUTDOWN_TIMEOUT_SECONDS")? {
            self.service.shutdown_timeout_seconds = timeout;
        }

        // Matchmaking settings
        if let Some(window) = env_override("CONFIRMATION_WINDOW_SECONDS")? {
            self.matchmaking.confirmation_window_seconds = window;
        }
        if let Some(staleness) = env_override("GHOST_STALENESS_SECONDS")? {
            self.matchmaking.ghost_staleness_seconds = staleness;
        }
        if let Some(grace) = env_override("SUBSTITUTION_GRACE_SECONDS")? {
            self.matchmaking.substitution_grace_seconds = grace;
        }
        if let Some(interval) = env_override("GHOST_SWEEP_INTERVAL_SECONDS")? {
            self.matchmaking.ghost_sweep_interval_seconds = interval;
        }
        if let Some(band) = env_override("SUBSTITUTION_RATING_BAND")? {
            self.matchmaking.substitution_rating_band = band;
        }
        if let Some(size) = env_override("MAX_PARTY_SIZE")? {
            self.matchmaking.max_party_size = size;
        }

        // Backup settings
        if let Some(enabled) = env_override("BACKUP_ENABLED")? {
            self.backup.enabled = enabled;
        }
        if let Some(backend) = env_override("BACKUP_BACKEND")? {
            self.backup.backend = backend;
        }
        if let Ok(dir) = env::var("BACKUP_DIR") {
            self.backup.directory = PathBuf::from(dir);
        }
        if let Some(interval) = env_override("SNAPSHOT_INTERVAL_SECONDS")? {
            self.backup.snapshot_interval_seconds = interval;
        }
        if let Some(retention) = env_override("SNAPSHOT_RETENTION_COUNT")? {
            self.backup.retention_count = retention;
        }

        // Rating settings
        if let Some(update) = env_override("RATING_UPDATE_ON_RESULT")? {
            self.rating.update_on_result = update;
        }

        Ok(())
    }

    /// Build the validated mode catalog
    pub fn mode_catalog(&self) -> Result<ModeCatalog> {
        ModeCatalog::new(self.matchmaking.modes.clone())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get maintenance sweep interval as Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.matchmaking.ghost_sweep_interval_seconds)
    }

    /// Get snapshot interval as Duration
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.backup.snapshot_interval_seconds)
    }

    /// Get the bound on a single snapshot write
    pub fn snapshot_write_timeout(&self) -> Duration {
        Duration::from_secs(self.backup.write_timeout_seconds)
    }
}

fn check_seconds(name: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(anyhow!("{} must be greater than 0", name));
    }
    if value > MAX_TIMEOUT_SECONDS {
        return Err(anyhow!(
            "{} cannot exceed {} seconds",
            name,
            MAX_TIMEOUT_SECONDS
        ));
    }
    Ok(())
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate ports
    if config.service.health_port == 0 {
        return Err(anyhow!("Health port cannot be 0"));
    }

    // Validate timeouts
    check_seconds("Shutdown timeout", config.service.shutdown_timeout_seconds)?;
    check_seconds(
        "Confirmation window",
        config.matchmaking.confirmation_window_seconds,
    )?;
    check_seconds(
        "Ghost staleness threshold",
        config.matchmaking.ghost_staleness_seconds,
    )?;
    check_seconds(
        "Substitution grace period",
        config.matchmaking.substitution_grace_seconds,
    )?;
    check_seconds(
        "Ghost sweep interval",
        config.matchmaking.ghost_sweep_interval_seconds,
    )?;
    check_seconds("Snapshot interval", config.backup.snapshot_interval_seconds)?;
    check_seconds("Snapshot write timeout", config.backup.write_timeout_seconds)?;

    // Validate matchmaking settings
    if !(config.matchmaking.substitution_rating_band >= 0.0) {
        return Err(anyhow!("Substitution rating band must be non-negative"));
    }
    if config.matchmaking.max_party_size == 0 {
        return Err(anyhow!("Maximum party size must be at least 1"));
    }
    config.mode_catalog()?;

    // Validate backup settings
    if config.backup.retention_count == 0 {
        return Err(anyhow!("Snapshot retention count must be at least 1"));
    }
    if config.backup.prefix.is_empty() {
        return Err(anyhow!("Snapshot prefix cannot be empty"));
    }

    // Validate rating settings
    if config.rating.beta <= 0.0 {
        return Err(anyhow!("Rating beta must be positive"));
    }
    if config.rating.initial_uncertainty <= 0.0 {
        return Err(anyhow!("Initial uncertainty must be positive"));
    }

    Ok(())
}
