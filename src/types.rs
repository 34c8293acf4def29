//! Common types used throughout the matchmaking engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skillratings::weng_lin::WengLinRating;
use uuid::Uuid;

/// Unique identifier for players, stable across sessions
pub type PlayerId = String;

/// Unique identifier for sessions
pub type SessionId = Uuid;

/// Name of a configured game mode (e.g. "2v2")
pub type GameMode = String;

/// Kind of participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerType {
    Human,
    /// Operator-created placeholder used to fill matches; never ghosted
    Bot,
}

/// Current status of a player. This is the single source of truth for
/// queue and session membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerStatus {
    Idle,
    Queued,
    InMatch,
    Ghost,
}

impl std::fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerStatus::Idle => write!(f, "Idle"),
            PlayerStatus::Queued => write!(f, "Queued"),
            PlayerStatus::InMatch => write!(f, "InMatch"),
            PlayerStatus::Ghost => write!(f, "Ghost"),
        }
    }
}

/// Rating information for a player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRating {
    pub rating: f64,
    pub uncertainty: f64,
}

impl PlayerRating {
    pub fn new(rating: f64, uncertainty: f64) -> Self {
        Self {
            rating,
            uncertainty,
        }
    }
}

impl Default for PlayerRating {
    fn default() -> Self {
        Self {
            rating: 1500.0,
            uncertainty: 200.0,
        }
    }
}

impl From<WengLinRating> for PlayerRating {
    fn from(rating: WengLinRating) -> Self {
        Self {
            rating: rating.rating,
            uncertainty: rating.uncertainty,
        }
    }
}

impl From<PlayerRating> for WengLinRating {
    fn from(rating: PlayerRating) -> Self {
        Self {
            rating: rating.rating,
            uncertainty: rating.uncertainty,
        }
    }
}

/// A registered player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    pub player_type: PlayerType,
    pub rating: PlayerRating,
    pub status: PlayerStatus,
    pub last_activity: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Forming,
    Confirming,
    Active,
    Completed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Cancelled)
    }

    /// Forming and Confirming both wait on ready-up signals
    pub fn awaiting_confirmation(self) -> bool {
        matches!(self, SessionState::Forming | SessionState::Confirming)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Forming => write!(f, "Forming"),
            SessionState::Confirming => write!(f, "Confirming"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Completed => write!(f, "Completed"),
            SessionState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Reported result of an active session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Team at this index won; every other team lost
    Win { team: usize },
    Draw,
}

/// Why a session ended in Cancelled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    ConfirmationTimeout,
    GhostNotReplaced { ghosts: Vec<PlayerId> },
    Aborted {
        reason: String,
        requested_by: Option<PlayerId>,
    },
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::ConfirmationTimeout => write!(f, "confirmation window elapsed"),
            CancelReason::GhostNotReplaced { ghosts } => {
                write!(f, "no substitute for {}", ghosts.join(", "))
            }
            CancelReason::Aborted { reason, .. } => write!(f, "aborted: {}", reason),
        }
    }
}

impl CancelReason {
    /// Label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            CancelReason::ConfirmationTimeout => "confirmation_timeout",
            CancelReason::GhostNotReplaced { .. } => "ghost_not_replaced",
            CancelReason::Aborted { .. } => "aborted",
        }
    }
}

/// Events published to the dispatcher and operator side channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    MatchFormed {
        session_id: SessionId,
        mode: GameMode,
        teams: Vec<Vec<PlayerId>>,
        timestamp: DateTime<Utc>,
    },
    SessionActivated {
        session_id: SessionId,
        timestamp: DateTime<Utc>,
    },
    SessionCompleted {
        session_id: SessionId,
        mode: GameMode,
        outcome: Outcome,
        timestamp: DateTime<Utc>,
    },
    SessionCancelled {
        session_id: SessionId,
        mode: GameMode,
        reason: CancelReason,
        requeued: Vec<PlayerId>,
        timestamp: DateTime<Utc>,
    },
    PlayerGhosted {
        player_id: PlayerId,
        session_id: Option<SessionId>,
        timestamp: DateTime<Utc>,
    },
    PlayerSubstituted {
        session_id: SessionId,
        ghost_id: PlayerId,
        substitute_id: PlayerId,
        team_index: usize,
        timestamp: DateTime<Utc>,
    },
    ResultDisputed {
        session_id: SessionId,
        timestamp: DateTime<Utc>,
    },
    RestoreFailed {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Event name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::MatchFormed { .. } => "MatchFormed",
            EngineEvent::SessionActivated { .. } => "SessionActivated",
            EngineEvent::SessionCompleted { .. } => "SessionCompleted",
            EngineEvent::SessionCancelled { .. } => "SessionCancelled",
            EngineEvent::PlayerGhosted { .. } => "PlayerGhosted",
            EngineEvent::PlayerSubstituted { .. } => "PlayerSubstituted",
            EngineEvent::ResultDisputed { .. } => "ResultDisputed",
            EngineEvent::RestoreFailed { .. } => "RestoreFailed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
        assert!(!SessionState::Active.is_terminal());
        assert!(SessionState::Forming.awaiting_confirmation());
        assert!(!SessionState::Active.awaiting_confirmation());
    }

    #[test]
    fn test_rating_conversion() {
        let rating = PlayerRating::new(1620.0, 150.0);
        let weng_lin: WengLinRating = rating.clone().into();
        let back: PlayerRating = weng_lin.into();
        assert_eq!(back, rating);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = EngineEvent::ResultDisputed {
            session_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ResultDisputed");
        assert_eq!(event.name(), "ResultDisputed");
    }
}
