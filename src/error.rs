//! Error types for the matchmaking engine
//!
//! Every error kind here is recoverable: a failed command is reported back to
//! the caller and the engine keeps serving. Callers that need to branch on the
//! kind use `MatchmakingError::from_anyhow`.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Player not found: {player_id}")]
    PlayerNotFound { player_id: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("No party for player {player_id}")]
    PartyNotFound { player_id: String },

    #[error("Player {player_id} is already queued for {mode}")]
    AlreadyQueued { player_id: String, mode: String },

    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("Unsupported game mode: {mode}")]
    InvalidMode { mode: String },

    #[error("Insufficient players for {mode}: {reason}")]
    InsufficientPlayers { mode: String, reason: String },

    #[error("Identity conflict for player {player_id}: {reason}")]
    Conflict { player_id: String, reason: String },

    #[error("Snapshot storage failed: {message}")]
    StorageError { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Recover the typed error from an `anyhow` chain, if there is one
    pub fn from_anyhow(error: &anyhow::Error) -> Option<&MatchmakingError> {
        error.downcast_ref::<MatchmakingError>()
    }

    /// Short machine-readable name used for metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            MatchmakingError::PlayerNotFound { .. } => "player_not_found",
            MatchmakingError::SessionNotFound { .. } => "session_not_found",
            MatchmakingError::PartyNotFound { .. } => "party_not_found",
            MatchmakingError::AlreadyQueued { .. } => "already_queued",
            MatchmakingError::InvalidState { .. } => "invalid_state",
            MatchmakingError::InvalidMode { .. } => "invalid_mode",
            MatchmakingError::InsufficientPlayers { .. } => "insufficient_players",
            MatchmakingError::Conflict { .. } => "conflict",
            MatchmakingError::StorageError { .. } => "storage",
            MatchmakingError::ConfigurationError { .. } => "configuration",
            MatchmakingError::InternalError { .. } => "internal",
        }
    }

    pub(crate) fn invalid_state(reason: impl Into<String>) -> Self {
        MatchmakingError::InvalidState {
            reason: reason.into(),
        }
    }
}
