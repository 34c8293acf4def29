//! Typed commands accepted by the matchmaker

use crate::engine::state::{ClaimReport, JoinOutcome, PartyJoinOutcome, QueueStatus, ResultSummary};
use crate::party::{Party, PartyDeparture};
use crate::queue::QueueEntry;
use crate::session::{AbortOutcome, ConfirmOutcome};
use crate::stats::LeaderboardEntry;
use crate::types::{GameMode, Outcome, Player, PlayerId, PlayerType, SessionId};
use serde::{Deserialize, Serialize};

/// Every operation a client or operator can request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Register {
        player_id: PlayerId,
        display_name: String,
        player_type: PlayerType,
    },
    JoinQueue {
        player_id: PlayerId,
        mode: GameMode,
    },
    LeaveQueue {
        player_id: PlayerId,
    },
    CreateParty {
        player_id: PlayerId,
    },
    RenameParty {
        player_id: PlayerId,
        name: String,
    },
    InviteToParty {
        host_id: PlayerId,
        player_id: PlayerId,
    },
    AcceptPartyInvite {
        player_id: PlayerId,
        host_id: PlayerId,
    },
    DeclinePartyInvite {
        player_id: PlayerId,
        host_id: PlayerId,
    },
    LeaveParty {
        player_id: PlayerId,
    },
    KickFromParty {
        host_id: PlayerId,
        player_id: PlayerId,
    },
    /// Queue every member of the host's party as one unit
    JoinQueueAsParty {
        host_id: PlayerId,
        mode: GameMode,
    },
    PartyStatus {
        player_id: PlayerId,
    },
    ConfirmReady {
        session_id: SessionId,
        player_id: PlayerId,
    },
    /// Authoritative result from a trusted reporter
    ReportResult {
        session_id: SessionId,
        outcome: Outcome,
    },
    /// A captain's claim; the session completes once all captains agree
    ClaimResult {
        session_id: SessionId,
        player_id: PlayerId,
        won: bool,
    },
    AbortSession {
        session_id: SessionId,
        reason: String,
        requested_by: Option<PlayerId>,
    },
    Heartbeat {
        player_id: PlayerId,
    },
    ClearGhost {
        player_id: PlayerId,
    },
    SetPoints {
        mode: GameMode,
        player_id: PlayerId,
        points: i64,
    },
    SetWins {
        mode: GameMode,
        player_id: PlayerId,
        wins: u32,
    },
    SetLosses {
        mode: GameMode,
        player_id: PlayerId,
        losses: u32,
    },
    QueueStatus {
        player_id: Option<PlayerId>,
    },
    Leaderboard {
        mode: GameMode,
        limit: usize,
    },
}

impl Command {
    /// Label used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Command::Register { .. } => "register",
            Command::JoinQueue { .. } => "join_queue",
            Command::LeaveQueue { .. } => "leave_queue",
            Command::CreateParty { .. } => "create_party",
            Command::RenameParty { .. } => "rename_party",
            Command::InviteToParty { .. } => "invite_to_party",
            Command::AcceptPartyInvite { .. } => "accept_party_invite",
            Command::DeclinePartyInvite { .. } => "decline_party_invite",
            Command::LeaveParty { .. } => "leave_party",
            Command::KickFromParty { .. } => "kick_from_party",
            Command::JoinQueueAsParty { .. } => "join_queue_as_party",
            Command::PartyStatus { .. } => "party_status",
            Command::ConfirmReady { .. } => "confirm_ready",
            Command::ReportResult { .. } => "report_result",
            Command::ClaimResult { .. } => "claim_result",
            Command::AbortSession { .. } => "abort_session",
            Command::Heartbeat { .. } => "heartbeat",
            Command::ClearGhost { .. } => "clear_ghost",
            Command::SetPoints { .. } => "set_points",
            Command::SetWins { .. } => "set_wins",
            Command::SetLosses { .. } => "set_losses",
            Command::QueueStatus { .. } => "queue_status",
            Command::Leaderboard { .. } => "leaderboard",
        }
    }
}

/// Response to a successfully executed command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResponse {
    Registered(Player),
    Joined(JoinOutcome),
    Left(Option<QueueEntry>),
    PartyUpdated(Party),
    PartyLeft(PartyDeparture),
    PartyQueued(PartyJoinOutcome),
    PartyStatus(Option<Party>),
    Confirmed(ConfirmOutcome),
    ResultRecorded(ResultSummary),
    Claimed(ClaimReport),
    Aborted(AbortOutcome),
    HeartbeatAccepted,
    GhostCleared,
    PointsSet(i64),
    WinsSet(u32),
    LossesSet(u32),
    QueueStatus(QueueStatus),
    Leaderboard(Vec<LeaderboardEntry>),
}
