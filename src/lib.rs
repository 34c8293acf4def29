//! Draft Room - matchmaking engine for balanced team drafts
//!
//! This crate queues players per game mode, snake-drafts full pools into
//! balanced teams, tracks sessions from confirmation to result, substitutes
//! unresponsive players and persists its state in versioned snapshots.

pub mod backup;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod events;
pub mod formation;
pub mod ghost;
pub mod metrics;
pub mod party;
pub mod queue;
pub mod rating;
pub mod registry;
pub mod service;
pub mod session;
pub mod stats;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use engine::{Command, CommandResponse, Matchmaker};
pub use events::EventPublisher;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
