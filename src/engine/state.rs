//! Engine state
//!
//! Registry, parties, queues, sessions and the points ledger live together in one
//! struct so a single lock serializes every mutation. Operations take the
//! current time as a parameter and queue their events in an outbox that the
//! caller drains after releasing the lock.

use crate::config::{AppConfig, ModeCatalog};
use crate::display::{GlyphTable, SessionSummary};
use crate::error::{MatchmakingError, Result};
use crate::formation::{Candidate, SnakeDraftFormer, Team, TeamFormer};
use crate::ghost::{GhostSweeper, SweepReport};
use crate::metrics::MetricsCollector;
use crate::party::{Party, PartyDeparture, PartyRegistry};
use crate::queue::{QueueEntry, QueueManager};
use crate::rating::{
    ExtendedWengLinConfig, NoOpRatingCalculator, RatingCalculator, RatingChange, TeamRatings,
    WengLinRatingCalculator,
};
use crate::registry::PlayerRegistry;
use crate::session::{
    AbortOutcome, ClaimOutcome, ConfirmOutcome, ResultClaim, Session, SessionCounts,
    SessionManager,
};
use crate::stats::{LeaderboardEntry, PointsChange, PointsLedger};
use crate::types::{
    CancelReason, EngineEvent, GameMode, Outcome, Player, PlayerId, PlayerRating, PlayerStatus,
    PlayerType, SessionId, SessionState,
};
use crate::utils::seconds;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Everything a snapshot needs to rebuild the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub players: Vec<Player>,
    pub queues: BTreeMap<GameMode, Vec<QueueEntry>>,
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub ledger: PointsLedger,
    #[serde(default)]
    pub parties: Vec<Party>,
}

/// What an import kept and what it had to fix
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub players: usize,
    pub queued: usize,
    pub sessions: usize,
    pub dropped_entries: usize,
    pub dropped_sessions: usize,
    #[serde(default)]
    pub dropped_parties: usize,
    /// Players whose status disagreed with their membership
    pub repaired_statuses: usize,
}

/// Point-in-time counts for metrics and the stats endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub registered_players: usize,
    pub idle_players: usize,
    pub queued_players: usize,
    pub in_match_players: usize,
    pub ghost_players: usize,
    pub waiting_by_mode: BTreeMap<GameMode, usize>,
    pub sessions: SessionCounts,
}

/// Result of a join
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub entry: QueueEntry,
    /// Position in the pool, or None if the join filled it and the player
    /// was drafted straight away
    pub position: Option<usize>,
    pub formed: Vec<SessionId>,
}

/// Result of queueing a whole party
#[derive(Debug, Clone, PartialEq)]
pub struct PartyJoinOutcome {
    /// One entry per member, host first
    pub entries: Vec<QueueEntry>,
    pub formed: Vec<SessionId>,
}

/// Points and rating changes applied when a session completes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSummary {
    pub points: Vec<PointsChange>,
    pub ratings: Vec<RatingChange>,
}

/// Outcome of a claim, with the settlement when the claims agreed
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimReport {
    pub outcome: ClaimOutcome,
    pub settled: Option<ResultSummary>,
}

/// Where a player stands in the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuePosition {
    pub mode: GameMode,
    pub position: usize,
    pub waited_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pools: BTreeMap<GameMode, usize>,
    pub player: Option<QueuePosition>,
    pub session: Option<SessionId>,
}

/// What one maintenance tick changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceReport {
    pub expired: Vec<SessionId>,
    pub sweep: SweepReport,
    pub formed: Vec<SessionId>,
}

pub struct EngineState {
    registry: PlayerRegistry,
    parties: PartyRegistry,
    queue: QueueManager,
    sessions: SessionManager,
    ledger: PointsLedger,
    catalog: ModeCatalog,
    former: Box<dyn TeamFormer>,
    rating: Box<dyn RatingCalculator>,
    sweeper: GhostSweeper,
    confirmation_window: Duration,
    substitution_grace: Duration,
    outbox: Vec<EngineEvent>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl EngineState {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let catalog = config.mode_catalog()?;
        let rating: Box<dyn RatingCalculator> = if config.rating.update_on_result {
            Box::new(WengLinRatingCalculator::new(ExtendedWengLinConfig::from(
                &config.rating,
            ))?)
        } else {
            Box::new(NoOpRatingCalculator::new(PlayerRating::new(
                config.rating.initial_rating,
                config.rating.initial_uncertainty,
            )))
        };
        let confirmation_window = seconds(config.matchmaking.confirmation_window_seconds);

        Ok(Self {
            registry: PlayerRegistry::new(rating.initial_rating()),
            parties: PartyRegistry::new(config.matchmaking.max_party_size),
            queue: QueueManager::new(&catalog),
            sessions: SessionManager::new(confirmation_window),
            ledger: PointsLedger::new(),
            catalog,
            former: Box::new(SnakeDraftFormer::new()),
            rating,
            sweeper: GhostSweeper::from_settings(&config.matchmaking),
            confirmation_window,
            substitution_grace: seconds(config.matchmaking.substitution_grace_seconds),
            outbox: Vec::new(),
            metrics: None,
        })
    }

    pub fn with_former(mut self, former: Box<dyn TeamFormer>) -> Self {
        self.former = former;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn catalog(&self) -> &ModeCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    pub fn parties(&self) -> &PartyRegistry {
        &self.parties
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn ledger(&self) -> &PointsLedger {
        &self.ledger
    }

    /// Drain the events produced since the last call
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.outbox)
    }

    fn emit(&mut self, event: EngineEvent) {
        debug!("Queued {} event", event.name());
        self.outbox.push(event);
    }

    pub fn register(
        &mut self,
        player_id: &str,
        display_name: &str,
        player_type: PlayerType,
        now: DateTime<Utc>,
    ) -> Result<Player> {
        self.registry
            .register(player_id, display_name, player_type, now)
            .cloned()
    }

    pub fn set_rating(&mut self, player_id: &str, rating: PlayerRating) -> Result<()> {
        self.registry.set_rating(player_id, rating)
    }

    pub fn heartbeat(&mut self, player_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.registry.touch_activity(player_id, now)
    }

    pub fn clear_ghost(&mut self, player_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.registry.clear_ghost(player_id, now)
    }

    /// Queue a player and immediately draft the pool if it is full
    pub fn join(&mut self, player_id: &str, mode: &str, now: DateTime<Utc>) -> Result<JoinOutcome> {
        self.registry.touch_activity(player_id, now)?;
        let entry = self.queue.join(&mut self.registry, player_id, mode, now)?;
        if let Some(metrics) = &self.metrics {
            metrics.record_join(mode);
        }

        let formed = self.form_ready(mode, now);
        Ok(JoinOutcome {
            position: self.queue.position(player_id),
            entry,
            formed,
        })
    }

    /// Leave the queue. A party member takes the whole party out with them.
    pub fn leave(&mut self, player_id: &str, now: DateTime<Utc>) -> Result<Option<QueueEntry>> {
        self.registry.touch_activity(player_id, now)?;
        let party = self
            .queue
            .entry_for(player_id)
            .and_then(|entry| entry.party.clone());
        let left = match party {
            Some(host) => self
                .dequeue_party(&host)?
                .into_iter()
                .find(|entry| entry.player_id == player_id),
            None => {
                let left = self.queue.leave(&mut self.registry, player_id)?;
                if let (Some(entry), Some(metrics)) = (&left, &self.metrics) {
                    metrics.record_leave(&entry.mode);
                }
                left
            }
        };
        Ok(left)
    }

    fn dequeue_party(&mut self, host: &str) -> Result<Vec<QueueEntry>> {
        let left = self.queue.leave_party(&mut self.registry, host)?;
        if !left.is_empty() {
            info!("Party of {} left the queue ({} players)", host, left.len());
        }
        if let Some(metrics) = &self.metrics {
            for entry in &left {
                metrics.record_leave(&entry.mode);
            }
        }
        Ok(left)
    }

    pub fn create_party(&mut self, player_id: &str, now: DateTime<Utc>) -> Result<Party> {
        self.registry.touch_activity(player_id, now)?;
        let name = self.registry.get(player_id)?.display_name.clone();
        self.parties.create(player_id, &name, now).cloned()
    }

    pub fn rename_party(&mut self, player_id: &str, name: &str, now: DateTime<Utc>) -> Result<Party> {
        self.registry.touch_activity(player_id, now)?;
        self.parties.rename(player_id, name).cloned()
    }

    pub fn invite_to_party(
        &mut self,
        host: &str,
        target: &str,
        now: DateTime<Utc>,
    ) -> Result<Party> {
        self.registry.touch_activity(host, now)?;
        self.registry.get(target)?;
        self.parties.invite(host, target, now).cloned()
    }

    /// Join a party. A party waiting in a queue is taken out first so the
    /// new roster queues again as a whole.
    pub fn accept_party_invite(
        &mut self,
        player_id: &str,
        host: &str,
        now: DateTime<Utc>,
    ) -> Result<Party> {
        self.registry.touch_activity(player_id, now)?;
        let party = self.parties.accept(player_id, host)?.clone();
        self.dequeue_party(host)?;
        Ok(party)
    }

    pub fn decline_party_invite(
        &mut self,
        player_id: &str,
        host: &str,
        now: DateTime<Utc>,
    ) -> Result<Party> {
        self.registry.touch_activity(player_id, now)?;
        self.parties.decline(player_id, host).cloned()
    }

    pub fn leave_party(&mut self, player_id: &str, now: DateTime<Utc>) -> Result<PartyDeparture> {
        self.registry.touch_activity(player_id, now)?;
        let departure = self.parties.leave(player_id)?;
        let host = match &departure {
            PartyDeparture::Left { host } => host.clone(),
            PartyDeparture::Disbanded { .. } => player_id.to_string(),
        };
        self.dequeue_party(&host)?;
        Ok(departure)
    }

    pub fn kick_from_party(
        &mut self,
        host: &str,
        target: &str,
        now: DateTime<Utc>,
    ) -> Result<Party> {
        self.registry.touch_activity(host, now)?;
        let party = self.parties.kick(host, target)?.clone();
        self.dequeue_party(host)?;
        Ok(party)
    }

    /// Queue the host's whole party, then draft the pool if it filled
    pub fn join_as_party(
        &mut self,
        host: &str,
        mode: &str,
        now: DateTime<Utc>,
    ) -> Result<PartyJoinOutcome> {
        self.registry.touch_activity(host, now)?;
        let members = self.parties.hosted(host)?.members.clone();
        let entries = self
            .queue
            .join_party(&mut self.registry, host, &members, mode, now)?;
        if let Some(metrics) = &self.metrics {
            for _ in &entries {
                metrics.record_join(mode);
            }
        }

        let formed = self.form_ready(mode, now);
        Ok(PartyJoinOutcome { entries, formed })
    }

    pub fn party_status(&self, player_id: &str) -> Result<Option<Party>> {
        self.registry.get(player_id)?;
        Ok(self.parties.party_of(player_id).cloned())
    }

    /// Drain and form every full matchup in a mode. Entries go back to the
    /// queue if formation fails.
    fn form_ready(&mut self, mode: &str, now: DateTime<Utc>) -> Vec<SessionId> {
        let mut formed = Vec::new();
        let config = match self.catalog.get(mode) {
            Ok(config) => config.clone(),
            Err(e) => {
                warn!("Skipping formation: {}", e);
                return formed;
            }
        };

        loop {
            let entries = match self.queue.drain_ready_pool(mode) {
                Ok(Some(entries)) => entries,
                Ok(None) => break,
                Err(e) => {
                    warn!("Could not drain {}: {}", mode, e);
                    break;
                }
            };

            let candidates: Vec<Candidate> = entries
                .iter()
                .map(|e| {
                    let rating = self
                        .registry
                        .rating(&e.player_id)
                        .map(|r| r.rating)
                        .unwrap_or_else(|_| self.rating.initial_rating().rating);
                    Candidate::new(e.player_id.clone(), rating).with_party(e.party.clone())
                })
                .collect();

            let timer = Instant::now();
            let matchups = match self.former.form(mode, &config, &candidates) {
                Ok(matchups) => matchups,
                Err(e) => {
                    error!("Formation for {} aborted, returning players to queue: {}", mode, e);
                    self.queue.reinstate(entries);
                    break;
                }
            };
            if let Some(metrics) = &self.metrics {
                metrics.record_formation(timer.elapsed());
            }

            let mut by_player: HashMap<PlayerId, QueueEntry> = entries
                .into_iter()
                .map(|e| (e.player_id.clone(), e))
                .collect();
            let mut failed = false;

            for matchup in matchups {
                let spread = matchup.spread();
                let member_ids: Vec<PlayerId> =
                    matchup.teams.iter().flat_map(Team::player_ids).collect();
                let drafted: Vec<QueueEntry> = member_ids
                    .iter()
                    .filter_map(|id| by_player.remove(id))
                    .collect();

                match self.sessions.create(&mut self.registry, mode, matchup.teams, now) {
                    Ok(session) => {
                        let session_id = session.id;
                        let teams = session.teams.iter().map(Team::player_ids).collect();
                        formed.push(session_id);
                        self.outbox.push(EngineEvent::MatchFormed {
                            session_id,
                            mode: mode.to_string(),
                            teams,
                            timestamp: now,
                        });
                        if let Some(metrics) = &self.metrics {
                            let waits: Vec<std::time::Duration> = drafted
                                .iter()
                                .map(|e| e.waited(now).to_std().unwrap_or_default())
                                .collect();
                            metrics.record_match_formed(mode, spread, &waits);
                        }
                    }
                    Err(e) => {
                        error!("Could not open session for {}: {}", mode, e);
                        self.queue.reinstate(drafted);
                        failed = true;
                    }
                }
            }

            // formation never leaves anyone behind, but never lose an entry
            if !by_player.is_empty() {
                warn!("{} drafted players were not placed", by_player.len());
                self.queue.reinstate(by_player.into_values().collect());
                failed = true;
            }
            if failed {
                break;
            }
        }

        formed
    }

    pub fn confirm(
        &mut self,
        session_id: SessionId,
        player_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome> {
        self.registry.touch_activity(player_id, now)?;
        let outcome = self.sessions.confirm(session_id, player_id, now)?;
        if outcome == ConfirmOutcome::Activated {
            self.emit(EngineEvent::SessionActivated {
                session_id,
                timestamp: now,
            });
        }
        Ok(outcome)
    }

    pub fn report_result(
        &mut self,
        session_id: SessionId,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<ResultSummary> {
        self.sessions
            .report_result(&mut self.registry, session_id, outcome, now)?;
        self.settle(session_id, outcome, now)
    }

    pub fn claim_result(
        &mut self,
        session_id: SessionId,
        player_id: &str,
        won: bool,
        now: DateTime<Utc>,
    ) -> Result<ClaimReport> {
        self.registry.touch_activity(player_id, now)?;
        let claim = if won {
            ResultClaim::Won
        } else {
            ResultClaim::Lost
        };
        let outcome =
            self.sessions
                .claim_result(&mut self.registry, session_id, player_id, claim, now)?;

        let settled = match outcome {
            ClaimOutcome::Agreed(result) => Some(self.settle(session_id, result, now)?),
            ClaimOutcome::Disputed => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_dispute();
                }
                self.emit(EngineEvent::ResultDisputed {
                    session_id,
                    timestamp: now,
                });
                None
            }
            ClaimOutcome::Waiting { .. } => None,
        };
        Ok(ClaimReport { outcome, settled })
    }

    /// Apply points and ratings for a session that just completed
    fn settle(
        &mut self,
        session_id: SessionId,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<ResultSummary> {
        let session = self.sessions.get(session_id)?;
        let mode = session.mode.clone();
        let teams: Vec<Vec<PlayerId>> = session.teams.iter().map(Team::player_ids).collect();
        let config = self.catalog.get(&mode)?.clone();

        let points = self.ledger.apply_result(&mode, &config, &teams, outcome);

        let team_ratings: Vec<TeamRatings> = teams
            .iter()
            .map(|team| {
                team.iter()
                    .filter_map(|id| {
                        self.registry
                            .rating(id)
                            .ok()
                            .map(|rating| (id.clone(), rating.clone()))
                    })
                    .collect()
            })
            .collect();

        let timer = Instant::now();
        let ratings = match self.rating.calculate_rating_changes(&team_ratings, outcome) {
            Ok(result) => {
                for change in &result.rating_changes {
                    if let Err(e) = self
                        .registry
                        .set_rating(&change.player_id, change.new_rating.clone())
                    {
                        warn!("Could not update rating for {}: {}", change.player_id, e);
                    }
                }
                result.rating_changes
            }
            Err(e) => {
                warn!("Skipping rating update for session {}: {}", session_id, e);
                Vec::new()
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_rating_calculation(timer.elapsed());
            metrics.record_session_completed(&mode);
        }
        self.emit(EngineEvent::SessionCompleted {
            session_id,
            mode,
            outcome,
            timestamp: now,
        });

        Ok(ResultSummary { points, ratings })
    }

    /// Abort a session. An abort by a member of an Active session costs that
    /// member the mode's cancellation penalty.
    pub fn abort(
        &mut self,
        session_id: SessionId,
        reason: &str,
        requested_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AbortOutcome> {
        if let Some(player_id) = requested_by {
            self.registry.touch_activity(player_id, now)?;
        }

        let session = self.sessions.get(session_id)?;
        let mode = session.mode.clone();
        let penalized = requested_by
            .filter(|id| session.state == SessionState::Active && session.is_member(id))
            .map(str::to_string);

        let outcome =
            self.sessions
                .abort(&mut self.registry, session_id, reason, requested_by, now)?;

        if let AbortOutcome::Cancelled { .. } = outcome {
            if let Some(player_id) = penalized {
                let config = self.catalog.get(&mode)?.clone();
                let change = self.ledger.apply_cancel_penalty(&mode, &config, &player_id);
                info!(
                    "Player {} penalized {} points for aborting {}",
                    player_id, change.applied, session_id
                );
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_session_cancelled("aborted");
            }
            let reason = CancelReason::Aborted {
                reason: reason.to_string(),
                requested_by: requested_by.map(str::to_string),
            };
            self.emit(EngineEvent::SessionCancelled {
                session_id,
                mode,
                reason,
                requeued: Vec::new(),
                timestamp: now,
            });
        }
        Ok(outcome)
    }

    pub fn set_points(&mut self, mode: &str, player_id: &str, points: i64) -> Result<i64> {
        self.catalog.get(mode)?;
        self.registry.get(player_id)?;
        Ok(self.ledger.set_points(mode, player_id, points))
    }

    pub fn set_wins(&mut self, mode: &str, player_id: &str, wins: u32) -> Result<u32> {
        self.catalog.get(mode)?;
        self.registry.get(player_id)?;
        Ok(self.ledger.set_wins(mode, player_id, wins))
    }

    pub fn set_losses(&mut self, mode: &str, player_id: &str, losses: u32) -> Result<u32> {
        self.catalog.get(mode)?;
        self.registry.get(player_id)?;
        Ok(self.ledger.set_losses(mode, player_id, losses))
    }

    pub fn leaderboard(&self, mode: &str, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        self.catalog.get(mode)?;
        Ok(self.ledger.leaderboard(mode, limit))
    }

    pub fn queue_status(&self, player_id: Option<&str>, now: DateTime<Utc>) -> QueueStatus {
        let pools = self
            .queue
            .snapshot()
            .into_iter()
            .map(|(mode, entries)| (mode, entries.len()))
            .collect();

        let player = player_id.and_then(|id| {
            let entry = self.queue.entry_for(id)?;
            Some(QueuePosition {
                mode: entry.mode.clone(),
                position: self.queue.position(id)?,
                waited_seconds: entry.waited(now).num_seconds(),
            })
        });
        let session = player_id
            .and_then(|id| self.sessions.session_for(id))
            .map(|s| s.id);

        QueueStatus {
            pools,
            player,
            session,
        }
    }

    /// Expire unconfirmed sessions, sweep for ghosts, then draft any pool
    /// that filled up again
    pub fn maintenance(&mut self, now: DateTime<Utc>) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        for (session_id, _) in self.sessions.expire_confirmations(&mut self.registry, now) {
            let mode = self
                .sessions
                .get(session_id)
                .map(|s| s.mode.clone())
                .unwrap_or_default();
            if let Some(metrics) = &self.metrics {
                metrics.record_session_cancelled(CancelReason::ConfirmationTimeout.label());
            }
            self.emit(EngineEvent::SessionCancelled {
                session_id,
                mode,
                reason: CancelReason::ConfirmationTimeout,
                requeued: Vec::new(),
                timestamp: now,
            });
            report.expired.push(session_id);
        }

        let timer = Instant::now();
        let sweep = self
            .sweeper
            .sweep(&mut self.registry, &mut self.queue, &mut self.sessions, now);
        if let Some(metrics) = &self.metrics {
            metrics.record_sweep(
                sweep.newly_ghosted.len(),
                sweep.substitutions.len(),
                sweep.cancellations.len(),
                timer.elapsed(),
            );
        }
        self.emit_sweep_events(&sweep, now);
        report.sweep = sweep;

        let modes: Vec<GameMode> = self.catalog.names().cloned().collect();
        for mode in modes {
            report.formed.extend(self.form_ready(&mode, now));
        }
        report
    }

    fn emit_sweep_events(&mut self, sweep: &SweepReport, now: DateTime<Utc>) {
        for (player_id, session_id) in &sweep.newly_ghosted {
            self.emit(EngineEvent::PlayerGhosted {
                player_id: player_id.clone(),
                session_id: *session_id,
                timestamp: now,
            });
        }
        for (session_id, substitution) in &sweep.substitutions {
            self.emit(EngineEvent::PlayerSubstituted {
                session_id: *session_id,
                ghost_id: substitution.ghost_id.clone(),
                substitute_id: substitution.substitute_id.clone(),
                team_index: substitution.team_index,
                timestamp: now,
            });
        }
        for cancellation in &sweep.cancellations {
            let reason = CancelReason::GhostNotReplaced {
                ghosts: cancellation.ghosts.clone(),
            };
            if let Some(metrics) = &self.metrics {
                metrics.record_session_cancelled(reason.label());
            }
            self.emit(EngineEvent::SessionCancelled {
                session_id: cancellation.session_id,
                mode: cancellation.mode.clone(),
                reason,
                requeued: cancellation.requeued.clone(),
                timestamp: now,
            });
        }
    }

    pub fn session(&self, session_id: SessionId) -> Result<Session> {
        self.sessions.get(session_id).cloned()
    }

    pub fn session_summary(
        &self,
        session_id: SessionId,
        glyphs: &GlyphTable,
    ) -> Result<SessionSummary> {
        let session = self.sessions.get(session_id)?;
        Ok(SessionSummary::build(session, &self.registry, glyphs))
    }

    pub fn player(&self, player_id: &str) -> Result<Player> {
        self.registry.get(player_id).cloned()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            registered_players: self.registry.len(),
            idle_players: self.registry.count_with_status(PlayerStatus::Idle),
            queued_players: self.registry.count_with_status(PlayerStatus::Queued),
            in_match_players: self.registry.count_with_status(PlayerStatus::InMatch),
            ghost_players: self.registry.count_with_status(PlayerStatus::Ghost),
            waiting_by_mode: self
                .queue
                .snapshot()
                .into_iter()
                .map(|(mode, entries)| (mode, entries.len()))
                .collect(),
            sessions: self.sessions.counts(),
        }
    }

    /// Copy of the state for a snapshot: every player, party, queue entry
    /// and live session, plus the ledger
    pub fn export_snapshot(&self) -> EngineSnapshot {
        let mut players: Vec<Player> = self.registry.players().cloned().collect();
        players.sort_by(|a, b| a.id.cmp(&b.id));

        EngineSnapshot {
            players,
            queues: self.queue.snapshot(),
            sessions: self.sessions.snapshot(),
            ledger: self.ledger.clone(),
            parties: self.parties.snapshot(),
        }
    }

    /// Replace the state with a snapshot, dropping anything that breaks the
    /// single-membership rules and fixing statuses to match membership
    pub fn import_snapshot(
        &mut self,
        snapshot: EngineSnapshot,
        now: DateTime<Utc>,
    ) -> RestoreReport {
        let mut report = RestoreReport::default();
        let known: HashSet<PlayerId> = snapshot.players.iter().map(|p| p.id.clone()).collect();

        let (sessions, unknown_sessions): (Vec<Session>, Vec<Session>) =
            snapshot.sessions.into_iter().partition(|s| {
                self.catalog.contains(&s.mode) && s.members().iter().all(|m| known.contains(m))
            });
        let (sessions, rejected) = SessionManager::from_sessions(sessions, self.confirmation_window);
        report.dropped_sessions = unknown_sessions.len() + rejected.len();

        let ghosts: HashSet<&PlayerId> = snapshot
            .players
            .iter()
            .filter(|p| p.status == PlayerStatus::Ghost)
            .map(|p| &p.id)
            .collect();
        let (entries, unusable): (Vec<QueueEntry>, Vec<QueueEntry>) = snapshot
            .queues
            .into_values()
            .flatten()
            .partition(|e| {
                known.contains(&e.player_id)
                    && !ghosts.contains(&e.player_id)
                    && !sessions.is_in_live_session(&e.player_id)
            });
        let (queue, rejected) = QueueManager::from_entries(&self.catalog, entries);
        report.dropped_entries = unusable.len() + rejected.len();

        let (parties, strangers): (Vec<Party>, Vec<Party>) = snapshot
            .parties
            .into_iter()
            .partition(|p| p.members.iter().all(|m| known.contains(m)));
        let (parties, rejected) = PartyRegistry::from_parties(parties, self.parties.max_size());
        report.dropped_parties = strangers.len() + rejected.len();

        let mut players = snapshot.players;
        for player in &mut players {
            let expected = if sessions.is_in_live_session(&player.id) {
                if player.status == PlayerStatus::Ghost {
                    PlayerStatus::Ghost
                } else {
                    PlayerStatus::InMatch
                }
            } else if queue.is_queued(&player.id) {
                PlayerStatus::Queued
            } else if player.status == PlayerStatus::Ghost {
                PlayerStatus::Ghost
            } else {
                PlayerStatus::Idle
            };
            if player.status != expected {
                debug!(
                    "Restored player {} was {}, now {}",
                    player.id, player.status, expected
                );
                player.status = expected;
                report.repaired_statuses += 1;
            }
        }

        let default_rating = self.rating.initial_rating();
        self.registry = PlayerRegistry::from_players(players, default_rating);
        self.parties = parties;
        self.queue = queue;
        self.sessions = sessions;
        self.ledger = snapshot.ledger;

        // ghosts in live sessions must be waiting for a substitute
        let unflagged: Vec<(SessionId, PlayerId)> = self
            .sessions
            .live_sessions()
            .into_iter()
            .flat_map(|s| {
                s.members()
                    .into_iter()
                    .filter(|m| {
                        self.registry.status(m).ok() == Some(PlayerStatus::Ghost)
                            && !s.pending_substitutions.iter().any(|p| &p.ghost_id == m)
                    })
                    .map(|m| (s.id, m))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (session_id, ghost_id) in unflagged {
            if let Err(e) =
                self.sessions
                    .flag_ghost(session_id, &ghost_id, now, self.substitution_grace)
            {
                warn!("Could not flag restored ghost {}: {}", ghost_id, e);
            }
        }

        report.players = self.registry.len();
        report.queued = self.queue.total_waiting();
        report.sessions = self.sessions.live_sessions().len();
        info!(
            "Imported state: {} players, {} queued, {} live sessions ({} statuses repaired)",
            report.players, report.queued, report.sessions, report.repaired_statuses
        );
        report
    }

    /// Verify that every player's status agrees with queue and session
    /// membership
    pub fn check_invariants(&self) -> Result<()> {
        for player in self.registry.players() {
            let queued = self.queue.is_queued(&player.id);
            let in_session = self.sessions.is_in_live_session(&player.id);

            let consistent = match player.status {
                PlayerStatus::Idle => !queued && !in_session,
                PlayerStatus::Queued => queued && !in_session,
                PlayerStatus::InMatch => in_session && !queued,
                PlayerStatus::Ghost => !queued,
            };
            if !consistent {
                return Err(MatchmakingError::InternalError {
                    message: format!(
                        "player {} is {} but queued={} in_session={}",
                        player.id, player.status, queued, in_session
                    ),
                }
                .into());
            }
        }

        for session in self.sessions.live_sessions() {
            let config = self.catalog.get(&session.mode)?;
            if session.teams.iter().any(|t| t.size() > config.team_size()) {
                return Err(MatchmakingError::InternalError {
                    message: format!("session {} has an oversized team", session.id),
                }
                .into());
            }
        }
        Ok(())
    }
}
