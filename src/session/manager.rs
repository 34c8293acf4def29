//! Session lifecycle manager
//!
//! Owns every session and keeps member status in the registry in step with
//! session state: members are InMatch while their session is live and go
//! back to Idle on any terminal transition. Ghosts are left as they are.

use crate::error::{MatchmakingError, Result};
use crate::formation::{Team, TeamMember};
use crate::registry::PlayerRegistry;
use crate::session::state::{ClaimOutcome, ConfirmOutcome, ResultClaim, Session, SubstitutionEvent};
use crate::types::{CancelReason, Outcome, PlayerId, PlayerStatus, SessionId, SessionState};
use crate::utils::generate_session_id;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{info, warn};

/// Finished sessions kept around so late commands get a proper state error
const DEFAULT_HISTORY_LIMIT: usize = 1024;

/// Result of an abort request
#[derive(Debug, Clone, PartialEq)]
pub enum AbortOutcome {
    /// The session was cancelled; these members were released
    Cancelled { released: Vec<PlayerId> },
    /// The session had already been cancelled
    AlreadyCancelled,
}

/// Counts of sessions by state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    pub forming: usize,
    pub confirming: usize,
    pub active: usize,
    pub completed: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone)]
pub struct SessionManager {
    sessions: HashMap<SessionId, Session>,
    /// Live membership: player to their non-terminal session
    membership: HashMap<PlayerId, SessionId>,
    /// Terminal sessions, oldest first
    history: VecDeque<SessionId>,
    history_limit: usize,
    confirmation_window: Duration,
}

impl SessionManager {
    pub fn new(confirmation_window: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            membership: HashMap::new(),
            history: VecDeque::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            confirmation_window,
        }
    }

    /// Rebuild from restored live sessions. Terminal or overlapping sessions
    /// are rejected and returned.
    pub fn from_sessions(
        sessions: impl IntoIterator<Item = Session>,
        confirmation_window: Duration,
    ) -> (Self, Vec<Session>) {
        let mut manager = Self::new(confirmation_window);
        let mut rejected = Vec::new();

        for session in sessions {
            let overlaps = session
                .members()
                .iter()
                .any(|m| manager.membership.contains_key(m));
            if session.is_terminal() || overlaps || manager.sessions.contains_key(&session.id) {
                warn!("Dropping restored session {} ({})", session.id, session.state);
                rejected.push(session);
                continue;
            }
            for member in session.members() {
                manager.membership.insert(member, session.id);
            }
            manager.sessions.insert(session.id, session);
        }

        (manager, rejected)
    }

    pub fn confirmation_window(&self) -> Duration {
        self.confirmation_window
    }

    pub fn get(&self, session_id: SessionId) -> Result<&Session> {
        self.sessions.get(&session_id).ok_or_else(|| {
            MatchmakingError::SessionNotFound {
                session_id: session_id.to_string(),
            }
            .into()
        })
    }

    fn get_mut(&mut self, session_id: SessionId) -> Result<&mut Session> {
        self.sessions.get_mut(&session_id).ok_or_else(|| {
            MatchmakingError::SessionNotFound {
                session_id: session_id.to_string(),
            }
            .into()
        })
    }

    /// The live session a player belongs to
    pub fn session_for(&self, player_id: &str) -> Option<&Session> {
        self.membership
            .get(player_id)
            .and_then(|id| self.sessions.get(id))
    }

    /// Create a Forming session and mark every member InMatch
    pub fn create(
        &mut self,
        registry: &mut PlayerRegistry,
        mode: &str,
        teams: Vec<Team>,
        now: DateTime<Utc>,
    ) -> Result<&Session> {
        let session = Session::new(
            generate_session_id(),
            mode,
            teams,
            now,
            self.confirmation_window,
        );
        let members = session.members();

        if let Some(taken) = members.iter().find(|m| self.membership.contains_key(*m)) {
            return Err(MatchmakingError::invalid_state(format!(
                "player {} already belongs to a live session",
                taken
            ))
            .into());
        }

        let mut moved: Vec<(PlayerId, PlayerStatus)> = Vec::new();
        for member in &members {
            match registry.set_status(member, PlayerStatus::InMatch) {
                Ok(previous) => moved.push((member.clone(), previous)),
                Err(e) => {
                    Self::roll_back(registry, moved);
                    return Err(e);
                }
            }
        }

        for member in members {
            self.membership.insert(member, session.id);
        }
        let id = session.id;
        info!(
            "Session {} formed for {} with {} teams",
            id,
            mode,
            session.teams.len()
        );
        self.sessions.insert(id, session);
        self.get(id)
    }

    /// Put members moved by a failed `create` back where they were
    fn roll_back(registry: &mut PlayerRegistry, moved: Vec<(PlayerId, PlayerStatus)>) {
        for (player, previous) in moved {
            if let Err(e) = registry.set_status(&player, PlayerStatus::Idle) {
                warn!("Rollback could not release {}: {}", player, e);
                continue;
            }
            if previous != PlayerStatus::Idle {
                if let Err(e) = registry.set_status(&player, previous) {
                    warn!("Rollback could not return {} to {}: {}", player, previous, e);
                }
            }
        }
    }

    /// Release every member of a session that just became terminal
    fn finalize(&mut self, registry: &mut PlayerRegistry, session_id: SessionId) -> Vec<PlayerId> {
        let Some(session) = self.sessions.get(&session_id) else {
            return Vec::new();
        };
        let mut released = Vec::new();

        for member in session.members() {
            self.membership.remove(&member);
            match registry.status(&member) {
                Ok(PlayerStatus::Ghost) => {}
                Ok(_) => {
                    if registry.set_status(&member, PlayerStatus::Idle).is_ok() {
                        released.push(member);
                    }
                }
                Err(e) => warn!("Member {} of session {}: {}", member, session_id, e),
            }
        }

        self.history.push_back(session_id);
        while self.history.len() > self.history_limit {
            if let Some(oldest) = self.history.pop_front() {
                self.sessions.remove(&oldest);
            }
        }
        released
    }

    pub fn confirm(
        &mut self,
        session_id: SessionId,
        player_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome> {
        self.get_mut(session_id)?.confirm(player_id, now)
    }

    pub fn report_result(
        &mut self,
        registry: &mut PlayerRegistry,
        session_id: SessionId,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<Vec<PlayerId>> {
        self.get_mut(session_id)?.complete(outcome, now)?;
        Ok(self.finalize(registry, session_id))
    }

    pub fn claim_result(
        &mut self,
        registry: &mut PlayerRegistry,
        session_id: SessionId,
        player_id: &str,
        claim: ResultClaim,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let outcome = self.get_mut(session_id)?.claim(player_id, claim, now)?;
        if let ClaimOutcome::Agreed(_) = outcome {
            self.finalize(registry, session_id);
        }
        Ok(outcome)
    }

    /// Abort a session. Aborting an already cancelled session is a no-op;
    /// aborting a completed one is an error.
    pub fn abort(
        &mut self,
        registry: &mut PlayerRegistry,
        session_id: SessionId,
        reason: &str,
        requested_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AbortOutcome> {
        let session = self.get_mut(session_id)?;
        match session.state {
            SessionState::Cancelled => return Ok(AbortOutcome::AlreadyCancelled),
            SessionState::Completed => {
                return Err(MatchmakingError::invalid_state(format!(
                    "session {} already completed",
                    session_id
                ))
                .into())
            }
            _ => {}
        }

        let reason = CancelReason::Aborted {
            reason: reason.to_string(),
            requested_by: requested_by.map(str::to_string),
        };
        session.cancel(reason, now);
        let released = self.finalize(registry, session_id);
        Ok(AbortOutcome::Cancelled { released })
    }

    /// Cancel for an internal reason, returning the released members
    pub fn cancel(
        &mut self,
        registry: &mut PlayerRegistry,
        session_id: SessionId,
        reason: CancelReason,
        now: DateTime<Utc>,
    ) -> Result<Vec<PlayerId>> {
        if !self.get_mut(session_id)?.cancel(reason, now) {
            return Ok(Vec::new());
        }
        Ok(self.finalize(registry, session_id))
    }

    /// Cancel every session whose confirmation window has elapsed
    pub fn expire_confirmations(
        &mut self,
        registry: &mut PlayerRegistry,
        now: DateTime<Utc>,
    ) -> Vec<(SessionId, Vec<PlayerId>)> {
        let mut expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.confirmation_expired(now))
            .map(|s| s.id)
            .collect();
        expired.sort();

        let mut cancelled = Vec::new();
        for id in expired {
            match self.cancel(registry, id, CancelReason::ConfirmationTimeout, now) {
                Ok(released) => cancelled.push((id, released)),
                Err(e) => warn!("Failed to expire session {}: {}", id, e),
            }
        }
        cancelled
    }

    /// Note that a member went ghost and needs replacing by `now + grace`
    pub fn flag_ghost(
        &mut self,
        session_id: SessionId,
        ghost_id: &str,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> Result<()> {
        self.get_mut(session_id)?.flag_ghost(ghost_id, now, grace);
        Ok(())
    }

    /// Swap a ghost for a queued player, who becomes InMatch
    pub fn substitute(
        &mut self,
        registry: &mut PlayerRegistry,
        session_id: SessionId,
        ghost_id: &str,
        substitute_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SubstitutionEvent> {
        if self.membership.contains_key(substitute_id) {
            return Err(MatchmakingError::invalid_state(format!(
                "player {} already belongs to a live session",
                substitute_id
            ))
            .into());
        }
        let candidate = registry.get(substitute_id)?;
        if candidate.status != PlayerStatus::Queued {
            return Err(MatchmakingError::invalid_state(format!(
                "substitute {} is {}, not queued",
                substitute_id, candidate.status
            ))
            .into());
        }
        let rating = candidate.rating.rating;
        let window = self.confirmation_window;

        let session = self.get_mut(session_id)?;
        let event = session.substitute(
            ghost_id,
            TeamMember {
                player_id: substitute_id.to_string(),
                rating,
            },
            now,
        )?;
        // Queued -> InMatch is always allowed
        registry.set_status(substitute_id, PlayerStatus::InMatch)?;
        session.extend_confirmation(now + window);

        self.membership.remove(ghost_id);
        self.membership.insert(substitute_id.to_string(), session_id);
        info!(
            "Substituted {} for ghost {} in session {}",
            substitute_id, ghost_id, session_id
        );
        Ok(event)
    }

    /// Live sessions with ghosts still waiting for a substitute, oldest first
    pub fn sessions_awaiting_substitutes(&self) -> Vec<SessionId> {
        let mut pending: Vec<&Session> = self
            .sessions
            .values()
            .filter(|s| !s.is_terminal() && !s.pending_substitutions.is_empty())
            .collect();
        pending.sort_by_key(|s| (s.created_at, s.id));
        pending.into_iter().map(|s| s.id).collect()
    }

    /// Live sessions, oldest first
    pub fn live_sessions(&self) -> Vec<&Session> {
        let mut live: Vec<&Session> = self.sessions.values().filter(|s| !s.is_terminal()).collect();
        live.sort_by_key(|s| (s.created_at, s.id));
        live
    }

    /// Clones of every live session for a snapshot
    pub fn snapshot(&self) -> Vec<Session> {
        self.live_sessions().into_iter().cloned().collect()
    }

    pub fn is_in_live_session(&self, player_id: &str) -> bool {
        self.membership.contains_key(player_id)
    }

    pub fn counts(&self) -> SessionCounts {
        let mut counts = SessionCounts::default();
        for session in self.sessions.values() {
            match session.state {
                SessionState::Forming => counts.forming += 1,
                SessionState::Confirming => counts.confirming += 1,
                SessionState::Active => counts.active += 1,
                SessionState::Completed => counts.completed += 1,
                SessionState::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}
