//! Shared matchmaker handle
//!
//! `Matchmaker` is a cheap-to-clone handle around the engine state. Every
//! command takes the state lock, runs to completion, and releases it before
//! any event is published, so subscribers never observe a half-applied
//! command and never block the engine.

use crate::config::AppConfig;
use crate::display::{GlyphTable, SessionSummary};
use crate::engine::command::{Command, CommandResponse};
use crate::engine::state::{
    EngineSnapshot, EngineState, EngineStats, MaintenanceReport, RestoreReport,
};
use crate::error::{MatchmakingError, Result};
use crate::events::EventPublisher;
use crate::metrics::MetricsCollector;
use crate::session::Session;
use crate::types::{EngineEvent, Player, SessionId};
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Matchmaker {
    state: Arc<Mutex<EngineState>>,
    event_publisher: Arc<dyn EventPublisher>,
    metrics_collector: Option<Arc<MetricsCollector>>,
}

impl Matchmaker {
    pub fn new(config: &AppConfig, event_publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        Ok(Self::from_state(EngineState::new(config)?, event_publisher))
    }

    /// Create a matchmaker that records command and engine metrics
    pub fn with_metrics(
        config: &AppConfig,
        event_publisher: Arc<dyn EventPublisher>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Result<Self> {
        let state = EngineState::new(config)?.with_metrics(Arc::clone(&metrics_collector));
        let mut matchmaker = Self::from_state(state, event_publisher);
        matchmaker.metrics_collector = Some(metrics_collector);
        Ok(matchmaker)
    }

    /// Wrap a prepared engine state, e.g. one with a custom team former
    pub fn from_state(state: EngineState, event_publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            event_publisher,
            metrics_collector: None,
        }
    }

    pub fn metrics(&self) -> Option<&Arc<MetricsCollector>> {
        self.metrics_collector.as_ref()
    }

    pub async fn execute(&self, command: Command) -> Result<CommandResponse> {
        self.execute_at(command, current_timestamp()).await
    }

    /// Run a command as if the current time were `now`
    pub async fn execute_at(
        &self,
        command: Command,
        now: DateTime<Utc>,
    ) -> Result<CommandResponse> {
        let name = command.name();
        let started = Instant::now();

        let (result, events) = {
            let mut state = self.state.lock().await;
            let result = Self::dispatch(&mut state, command, now);
            (result, state.take_events())
        };

        if !events.is_empty() {
            self.event_publisher.publish_all(events).await;
        }

        let error_kind = match &result {
            Ok(_) => None,
            Err(e) => {
                let kind = MatchmakingError::from_anyhow(e)
                    .map(MatchmakingError::kind)
                    .unwrap_or("internal");
                debug!("Command {} rejected ({}): {}", name, kind, e);
                Some(kind)
            }
        };
        if let Some(metrics) = &self.metrics_collector {
            metrics.record_command(name, error_kind, started.elapsed());
        }
        result
    }

    fn dispatch(
        state: &mut EngineState,
        command: Command,
        now: DateTime<Utc>,
    ) -> Result<CommandResponse> {
        match command {
            Command::Register {
                player_id,
                display_name,
                player_type,
            } => state
                .register(&player_id, &display_name, player_type, now)
                .map(CommandResponse::Registered),
            Command::JoinQueue { player_id, mode } => {
                state.join(&player_id, &mode, now).map(CommandResponse::Joined)
            }
            Command::LeaveQueue { player_id } => {
                state.leave(&player_id, now).map(CommandResponse::Left)
            }
            Command::CreateParty { player_id } => state
                .create_party(&player_id, now)
                .map(CommandResponse::PartyUpdated),
            Command::RenameParty { player_id, name } => state
                .rename_party(&player_id, &name, now)
                .map(CommandResponse::PartyUpdated),
            Command::InviteToParty { host_id, player_id } => state
                .invite_to_party(&host_id, &player_id, now)
                .map(CommandResponse::PartyUpdated),
            Command::AcceptPartyInvite { player_id, host_id } => state
                .accept_party_invite(&player_id, &host_id, now)
                .map(CommandResponse::PartyUpdated),
            Command::DeclinePartyInvite { player_id, host_id } => state
                .decline_party_invite(&player_id, &host_id, now)
                .map(CommandResponse::PartyUpdated),
            Command::LeaveParty { player_id } => state
                .leave_party(&player_id, now)
                .map(CommandResponse::PartyLeft),
            Command::KickFromParty { host_id, player_id } => state
                .kick_from_party(&host_id, &player_id, now)
                .map(CommandResponse::PartyUpdated),
            Command::JoinQueueAsParty { host_id, mode } => state
                .join_as_party(&host_id, &mode, now)
                .map(CommandResponse::PartyQueued),
            Command::PartyStatus { player_id } => state
                .party_status(&player_id)
                .map(CommandResponse::PartyStatus),
            Command::ConfirmReady {
                session_id,
                player_id,
            } => state
                .confirm(session_id, &player_id, now)
                .map(CommandResponse::Confirmed),
            Command::ReportResult {
                session_id,
                outcome,
            } => state
                .report_result(session_id, outcome, now)
                .map(CommandResponse::ResultRecorded),
            Command::ClaimResult {
                session_id,
                player_id,
                won,
            } => state
                .claim_result(session_id, &player_id, won, now)
                .map(CommandResponse::Claimed),
            Command::AbortSession {
                session_id,
                reason,
                requested_by,
            } => state
                .abort(session_id, &reason, requested_by.as_deref(), now)
                .map(CommandResponse::Aborted),
            Command::Heartbeat { player_id } => state
                .heartbeat(&player_id, now)
                .map(|_| CommandResponse::HeartbeatAccepted),
            Command::ClearGhost { player_id } => state
                .clear_ghost(&player_id, now)
                .map(|_| CommandResponse::GhostCleared),
            Command::SetPoints {
                mode,
                player_id,
                points,
            } => state
                .set_points(&mode, &player_id, points)
                .map(CommandResponse::PointsSet),
            Command::SetWins {
                mode,
                player_id,
                wins,
            } => state
                .set_wins(&mode, &player_id, wins)
                .map(CommandResponse::WinsSet),
            Command::SetLosses {
                mode,
                player_id,
                losses,
            } => state
                .set_losses(&mode, &player_id, losses)
                .map(CommandResponse::LossesSet),
            Command::QueueStatus { player_id } => Ok(CommandResponse::QueueStatus(
                state.queue_status(player_id.as_deref(), now),
            )),
            Command::Leaderboard { mode, limit } => state
                .leaderboard(&mode, limit)
                .map(CommandResponse::Leaderboard),
        }
    }

    pub async fn run_maintenance(&self) -> MaintenanceReport {
        self.maintenance_at(current_timestamp()).await
    }

    /// Expire confirmations, sweep ghosts and re-draft pools as of `now`
    pub async fn maintenance_at(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let (report, events, stats) = {
            let mut state = self.state.lock().await;
            let report = state.maintenance(now);
            (report, state.take_events(), state.stats())
        };

        if !events.is_empty() {
            self.event_publisher.publish_all(events).await;
        }
        if let Some(metrics) = &self.metrics_collector {
            metrics.update_from_engine_stats(&stats);
        }
        report
    }

    /// Consistent copy of the state for a backup
    pub async fn export_snapshot(&self) -> EngineSnapshot {
        self.state.lock().await.export_snapshot()
    }

    /// Copy the state and draw its version number in one critical section,
    /// so version order always matches state order
    pub async fn export_numbered<F>(&self, next_version: F) -> (u64, EngineSnapshot)
    where
        F: FnOnce() -> u64,
    {
        let state = self.state.lock().await;
        (next_version(), state.export_snapshot())
    }

    pub async fn import_snapshot(&self, snapshot: EngineSnapshot) -> RestoreReport {
        self.import_snapshot_at(snapshot, current_timestamp()).await
    }

    pub async fn import_snapshot_at(
        &self,
        snapshot: EngineSnapshot,
        now: DateTime<Utc>,
    ) -> RestoreReport {
        let mut state = self.state.lock().await;
        let report = state.import_snapshot(snapshot, now);
        if let Err(e) = state.check_invariants() {
            warn!("Restored state failed invariant check: {}", e);
        }
        report
    }

    /// Publish events produced outside a command, such as restore failures
    pub async fn publish(&self, events: Vec<EngineEvent>) {
        self.event_publisher.publish_all(events).await;
    }

    pub async fn stats(&self) -> EngineStats {
        self.state.lock().await.stats()
    }

    pub async fn session(&self, session_id: SessionId) -> Result<Session> {
        self.state.lock().await.session(session_id)
    }

    pub async fn session_summary(
        &self,
        session_id: SessionId,
        glyphs: &GlyphTable,
    ) -> Result<SessionSummary> {
        self.state.lock().await.session_summary(session_id, glyphs)
    }

    pub async fn player(&self, player_id: &str) -> Result<Player> {
        self.state.lock().await.player(player_id)
    }

    pub async fn check_invariants(&self) -> Result<()> {
        self.state.lock().await.check_invariants()
    }
}
