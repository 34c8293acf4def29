//! Ghost detection and substitution
//!
//! A sweep marks stale queued or matched humans as ghosts. Queued ghosts
//! are dropped from their pool. Ghosts inside a live session get a grace
//! period during which a waiting player of the same mode, within the rating
//! band, may take their slot; once the grace runs out the session is
//! cancelled and its remaining members go back to the front of the queue.

use crate::config::MatchmakingSettings;
use crate::queue::{QueueManager, QueuePriority};
use crate::registry::PlayerRegistry;
use crate::session::{SessionManager, SubstitutionEvent};
use crate::types::{CancelReason, GameMode, PlayerId, PlayerStatus, SessionId};
use crate::utils::seconds;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

/// A session cancelled because its ghosts were not replaced in time
#[derive(Debug, Clone, PartialEq)]
pub struct GhostCancellation {
    pub session_id: SessionId,
    pub mode: GameMode,
    pub ghosts: Vec<PlayerId>,
    /// Members returned to the queue with priority
    pub requeued: Vec<PlayerId>,
}

/// What one sweep changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Players marked Ghost by this sweep, with their session if any
    pub newly_ghosted: Vec<(PlayerId, Option<SessionId>)>,
    pub dropped_from_queue: Vec<PlayerId>,
    pub substitutions: Vec<(SessionId, SubstitutionEvent)>,
    pub cancellations: Vec<GhostCancellation>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.newly_ghosted.is_empty()
            && self.substitutions.is_empty()
            && self.cancellations.is_empty()
    }

    /// Modes whose pools gained requeued players
    pub fn requeued_modes(&self) -> Vec<GameMode> {
        let mut modes: Vec<GameMode> = self
            .cancellations
            .iter()
            .filter(|c| !c.requeued.is_empty())
            .map(|c| c.mode.clone())
            .collect();
        modes.sort();
        modes.dedup();
        modes
    }
}

#[derive(Debug, Clone)]
pub struct GhostSweeper {
    staleness: Duration,
    grace: Duration,
    rating_band: f64,
}

impl GhostSweeper {
    pub fn new(staleness: Duration, grace: Duration, rating_band: f64) -> Self {
        Self {
            staleness,
            grace,
            rating_band,
        }
    }

    pub fn from_settings(settings: &MatchmakingSettings) -> Self {
        Self::new(
            seconds(settings.ghost_staleness_seconds),
            seconds(settings.substitution_grace_seconds),
            settings.substitution_rating_band,
        )
    }

    /// Run one sweep. Running it again with no activity in between flags
    /// nobody new.
    pub fn sweep(
        &self,
        registry: &mut PlayerRegistry,
        queue: &mut QueueManager,
        sessions: &mut SessionManager,
        now: DateTime<Utc>,
    ) -> SweepReport {
        let mut report = SweepReport::default();

        self.flag_stale(registry, queue, sessions, now, &mut report);
        self.substitute_ghosts(registry, queue, sessions, now, &mut report);
        self.cancel_overdue(registry, queue, sessions, now, &mut report);

        if !report.is_empty() {
            info!(
                "Ghost sweep: {} ghosted, {} substituted, {} sessions cancelled",
                report.newly_ghosted.len(),
                report.substitutions.len(),
                report.cancellations.len()
            );
        }
        report
    }

    fn flag_stale(
        &self,
        registry: &mut PlayerRegistry,
        queue: &mut QueueManager,
        sessions: &mut SessionManager,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        let cutoff = now - self.staleness;

        for player_id in registry.stale_players(cutoff) {
            if let Err(e) = registry.set_status(&player_id, PlayerStatus::Ghost) {
                warn!("Could not mark {} as ghost: {}", player_id, e);
                continue;
            }

            if queue.remove(&player_id).is_some() {
                debug!("Dropped ghost {} from the queue", player_id);
                report.dropped_from_queue.push(player_id.clone());
                report.newly_ghosted.push((player_id, None));
                continue;
            }

            let session_id = sessions.session_for(&player_id).map(|s| s.id);
            if let Some(session_id) = session_id {
                if let Err(e) = sessions.flag_ghost(session_id, &player_id, now, self.grace) {
                    warn!("Could not flag ghost {} in {}: {}", player_id, session_id, e);
                }
            }
            report.newly_ghosted.push((player_id, session_id));
        }
    }

    fn substitute_ghosts(
        &self,
        registry: &mut PlayerRegistry,
        queue: &mut QueueManager,
        sessions: &mut SessionManager,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        for session_id in sessions.sessions_awaiting_substitutes() {
            let Ok(session) = sessions.get(session_id) else {
                continue;
            };
            let mode = session.mode.clone();
            let ghosts: Vec<PlayerId> = session
                .pending_substitutions
                .iter()
                .map(|p| p.ghost_id.clone())
                .collect();

            for ghost_id in ghosts {
                let target = match registry.rating(&ghost_id) {
                    Ok(rating) => rating.rating,
                    Err(e) => {
                        warn!("Ghost {} has no rating: {}", ghost_id, e);
                        continue;
                    }
                };
                let Some(substitute_id) =
                    queue.find_substitute(registry, &mode, target, self.rating_band)
                else {
                    continue;
                };
                let Some(entry) = queue.remove(&substitute_id) else {
                    continue;
                };

                match sessions.substitute(registry, session_id, &ghost_id, &substitute_id, now) {
                    Ok(event) => report.substitutions.push((session_id, event)),
                    Err(e) => {
                        warn!(
                            "Substitution of {} for {} failed: {}",
                            substitute_id, ghost_id, e
                        );
                        queue.reinstate(vec![entry]);
                    }
                }
            }
        }
    }

    fn cancel_overdue(
        &self,
        registry: &mut PlayerRegistry,
        queue: &mut QueueManager,
        sessions: &mut SessionManager,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        for session_id in sessions.sessions_awaiting_substitutes() {
            let Ok(session) = sessions.get(session_id) else {
                continue;
            };
            if session.overdue_ghosts(now).is_empty() {
                continue;
            }
            let mode = session.mode.clone();
            let ghosts: Vec<PlayerId> = session
                .pending_substitutions
                .iter()
                .map(|p| p.ghost_id.clone())
                .collect();

            let released = match sessions.cancel(
                registry,
                session_id,
                CancelReason::GhostNotReplaced {
                    ghosts: ghosts.clone(),
                },
                now,
            ) {
                Ok(released) => released,
                Err(e) => {
                    warn!("Could not cancel session {}: {}", session_id, e);
                    continue;
                }
            };

            let mut requeued = Vec::new();
            for player_id in released {
                match queue.enqueue(registry, &player_id, &mode, now, QueuePriority::Requeued) {
                    Ok(_) => requeued.push(player_id),
                    Err(e) => warn!("Could not requeue {}: {}", player_id, e),
                }
            }

            report.cancellations.push(GhostCancellation {
                session_id,
                mode,
                ghosts,
                requeued,
            });
        }
    }
}
