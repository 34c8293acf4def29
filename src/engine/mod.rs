//! Matchmaking engine
//!
//! Ties the registry, queues, team formation, sessions, ghost sweeping and
//! the points ledger together behind a single serialized state.

pub mod command;
pub mod matchmaker;
pub mod state;

pub use command::{Command, CommandResponse};
pub use matchmaker::Matchmaker;
pub use state::{
    ClaimReport, EngineSnapshot, EngineState, EngineStats, JoinOutcome, MaintenanceReport,
    PartyJoinOutcome, QueuePosition, QueueStatus, RestoreReport, ResultSummary,
};
