//! Configuration management for the draft-room engine
//!
//! This module handles configuration loading from TOML files and environment
//! variables, validation, and default values.

pub mod app;
pub mod modes;

// Re-export commonly used types
pub use app::{
    validate_config, AppConfig, BackupBackend, BackupSettings, MatchmakingSettings,
    RatingSettings, ServiceSettings,
};
pub use modes::{default_modes, ModeCatalog, ModeConfig};
