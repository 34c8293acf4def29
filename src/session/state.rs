//! Per-session state machine
//!
//! Forming -> Confirming -> Active -> Completed, with Cancelled reachable
//! from every non-terminal state. Nothing leaves Completed or Cancelled.

use crate::error::{MatchmakingError, Result};
use crate::formation::{team_label, Team, TeamMember};
use crate::types::{CancelReason, GameMode, Outcome, PlayerId, SessionId, SessionState};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// A ghost replaced by a waiting player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstitutionEvent {
    pub ghost_id: PlayerId,
    pub substitute_id: PlayerId,
    pub team_index: usize,
    pub at: DateTime<Utc>,
}

/// A ghosted member still waiting for a substitute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubstitution {
    pub ghost_id: PlayerId,
    pub flagged_at: DateTime<Utc>,
    /// The session is cancelled if no substitute is found by then
    pub deadline: DateTime<Utc>,
}

/// A captain's report of their own team's result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultClaim {
    Won,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Still waiting on other members
    Pending { confirmed: usize, required: usize },
    /// Every member confirmed; the session is now Active
    Activated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Other captains have not reported yet
    Waiting { claimed: usize, required: usize },
    /// All captains agree
    Agreed(Outcome),
    /// Claims contradicted each other and were cleared
    Disputed,
}

/// One formed match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub mode: GameMode,
    pub teams: Vec<Team>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirm_deadline: DateTime<Utc>,
    pub confirmed: BTreeSet<PlayerId>,
    pub substitutions: Vec<SubstitutionEvent>,
    pub pending_substitutions: Vec<PendingSubstitution>,
    pub claims: BTreeMap<usize, ResultClaim>,
    pub outcome: Option<Outcome>,
    pub cancel_reason: Option<CancelReason>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        id: SessionId,
        mode: &str,
        teams: Vec<Team>,
        now: DateTime<Utc>,
        confirmation_window: Duration,
    ) -> Self {
        Self {
            id,
            mode: mode.to_string(),
            teams,
            state: SessionState::Forming,
            created_at: now,
            updated_at: now,
            confirm_deadline: now + confirmation_window,
            confirmed: BTreeSet::new(),
            substitutions: Vec::new(),
            pending_substitutions: Vec::new(),
            claims: BTreeMap::new(),
            outcome: None,
            cancel_reason: None,
            ended_at: None,
        }
    }

    /// Every member across all teams, team by team
    pub fn members(&self) -> Vec<PlayerId> {
        self.teams.iter().flat_map(Team::player_ids).collect()
    }

    pub fn is_member(&self, player_id: &str) -> bool {
        self.teams.iter().any(|t| t.contains(player_id))
    }

    pub fn team_of(&self, player_id: &str) -> Option<usize> {
        self.teams.iter().position(|t| t.contains(player_id))
    }

    pub fn member_count(&self) -> usize {
        self.teams.iter().map(Team::size).sum()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Forming/Confirming session whose window has elapsed
    pub fn confirmation_expired(&self, now: DateTime<Utc>) -> bool {
        self.state.awaiting_confirmation() && now >= self.confirm_deadline
    }

    fn transition(&mut self, next: SessionState, now: DateTime<Utc>) -> Result<()> {
        let allowed = match (self.state, next) {
            (SessionState::Forming, SessionState::Confirming) => true,
            (SessionState::Confirming, SessionState::Active) => true,
            (SessionState::Active, SessionState::Completed) => true,
            (from, SessionState::Cancelled) => !from.is_terminal(),
            _ => false,
        };

        if !allowed {
            return Err(MatchmakingError::invalid_state(format!(
                "session {} cannot move from {} to {}",
                self.id, self.state, next
            ))
            .into());
        }

        debug!("Session {} {} -> {}", self.id, self.state, next);
        self.state = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        Ok(())
    }

    fn require_member(&self, player_id: &str) -> Result<usize> {
        self.team_of(player_id).ok_or_else(|| {
            MatchmakingError::invalid_state(format!(
                "player {} is not a member of session {}",
                player_id, self.id
            ))
            .into()
        })
    }

    /// Record a ready-up signal
    pub fn confirm(&mut self, player_id: &str, now: DateTime<Utc>) -> Result<ConfirmOutcome> {
        if !self.state.awaiting_confirmation() {
            return Err(MatchmakingError::invalid_state(format!(
                "session {} is {} and no longer accepts confirmations",
                self.id, self.state
            ))
            .into());
        }
        self.require_member(player_id)?;

        self.confirmed.insert(player_id.to_string());
        if self.state == SessionState::Forming {
            self.transition(SessionState::Confirming, now)?;
        }

        let required = self.member_count();
        let confirmed = self
            .members()
            .iter()
            .filter(|m| self.confirmed.contains(*m))
            .count();

        if confirmed == required {
            self.transition(SessionState::Active, now)?;
            info!("Session {} is active", self.id);
            Ok(ConfirmOutcome::Activated)
        } else {
            self.updated_at = now;
            Ok(ConfirmOutcome::Pending {
                confirmed,
                required,
            })
        }
    }

    fn check_outcome(&self, outcome: Outcome) -> Result<()> {
        if let Outcome::Win { team } = outcome {
            if team >= self.teams.len() {
                return Err(MatchmakingError::invalid_state(format!(
                    "session {} has no team {}",
                    self.id, team
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Finish an active session
    pub fn complete(&mut self, outcome: Outcome, now: DateTime<Utc>) -> Result<()> {
        if self.state != SessionState::Active {
            return Err(MatchmakingError::invalid_state(format!(
                "session {} is {}, results are only accepted while Active",
                self.id, self.state
            ))
            .into());
        }
        self.check_outcome(outcome)?;

        self.transition(SessionState::Completed, now)?;
        self.outcome = Some(outcome);
        info!("Session {} completed with {:?}", self.id, outcome);
        Ok(())
    }

    /// Cancel the session. Returns false when it was already terminal.
    pub fn cancel(&mut self, reason: CancelReason, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        if self.transition(SessionState::Cancelled, now).is_err() {
            return false;
        }
        info!("Session {} cancelled: {}", self.id, reason);
        self.cancel_reason = Some(reason);
        self.pending_substitutions.clear();
        true
    }

    /// Record a captain's claim. Only the first member of a team may claim,
    /// and each team claims once until a dispute clears the board.
    pub fn claim(
        &mut self,
        player_id: &str,
        claim: ResultClaim,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        if self.state != SessionState::Active {
            return Err(MatchmakingError::invalid_state(format!(
                "session {} is {}, results are only accepted while Active",
                self.id, self.state
            ))
            .into());
        }
        let team = self.require_member(player_id)?;
        if self.teams[team].captain().map(String::as_str) != Some(player_id) {
            return Err(MatchmakingError::invalid_state(format!(
                "only the captain of team {} can report results",
                team_label(team)
            ))
            .into());
        }
        if self.claims.contains_key(&team) {
            return Err(MatchmakingError::invalid_state(format!(
                "team {} already reported",
                team_label(team)
            ))
            .into());
        }

        self.claims.insert(team, claim);
        self.updated_at = now;

        let required = self.teams.len();
        if self.claims.len() < required {
            return Ok(ClaimOutcome::Waiting {
                claimed: self.claims.len(),
                required,
            });
        }

        let winners: Vec<usize> = self
            .claims
            .iter()
            .filter(|(_, c)| **c == ResultClaim::Won)
            .map(|(team, _)| *team)
            .collect();

        if winners.len() == 1 {
            let outcome = Outcome::Win { team: winners[0] };
            self.complete(outcome, now)?;
            Ok(ClaimOutcome::Agreed(outcome))
        } else {
            info!("Conflicting result claims in session {}, resetting", self.id);
            self.claims.clear();
            Ok(ClaimOutcome::Disputed)
        }
    }

    /// Mark a member as a ghost waiting for replacement
    pub fn flag_ghost(&mut self, ghost_id: &str, now: DateTime<Utc>, grace: Duration) {
        if self
            .pending_substitutions
            .iter()
            .any(|p| p.ghost_id == ghost_id)
        {
            return;
        }
        self.pending_substitutions.push(PendingSubstitution {
            ghost_id: ghost_id.to_string(),
            flagged_at: now,
            deadline: now + grace,
        });
        self.updated_at = now;
    }

    /// Put a substitute into the ghost's slot. The state is unchanged; in a
    /// session still collecting confirmations the substitute must confirm too.
    pub fn substitute(
        &mut self,
        ghost_id: &str,
        substitute: TeamMember,
        now: DateTime<Utc>,
    ) -> Result<SubstitutionEvent> {
        if self.is_terminal() {
            return Err(MatchmakingError::invalid_state(format!(
                "session {} is {} and cannot take substitutes",
                self.id, self.state
            ))
            .into());
        }
        let team_index = self.require_member(ghost_id)?;
        if self.is_member(&substitute.player_id) {
            return Err(MatchmakingError::invalid_state(format!(
                "player {} already plays in session {}",
                substitute.player_id, self.id
            ))
            .into());
        }

        let substitute_id = substitute.player_id.clone();
        self.teams[team_index].replace(ghost_id, substitute);
        self.confirmed.remove(ghost_id);
        self.pending_substitutions.retain(|p| p.ghost_id != ghost_id);

        let event = SubstitutionEvent {
            ghost_id: ghost_id.to_string(),
            substitute_id,
            team_index,
            at: now,
        };
        self.substitutions.push(event.clone());
        self.updated_at = now;
        Ok(event)
    }

    /// Give late joiners a full confirmation window. Only pushes the deadline
    /// later, and only while confirmations are still being collected.
    pub fn extend_confirmation(&mut self, until: DateTime<Utc>) -> bool {
        if !self.state.awaiting_confirmation() || until <= self.confirm_deadline {
            return false;
        }
        debug!(
            "Session {} confirmation deadline moved to {}",
            self.id, until
        );
        self.confirm_deadline = until;
        true
    }

    /// Pending substitutions whose grace period has run out
    pub fn overdue_ghosts(&self, now: DateTime<Utc>) -> Vec<PlayerId> {
        self.pending_substitutions
            .iter()
            .filter(|p| now >= p.deadline)
            .map(|p| p.ghost_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{current_timestamp, generate_session_id};

    fn member(id: &str, rating: f64) -> TeamMember {
        TeamMember {
            player_id: id.to_string(),
            rating,
        }
    }

    fn duo_session(now: DateTime<Utc>) -> Session {
        let teams = vec![
            Team {
                members: vec![member("a", 100.0), member("d", 40.0)],
            },
            Team {
                members: vec![member("b", 80.0), member("c", 60.0)],
            },
        ];
        Session::new(
            generate_session_id(),
            "duo",
            teams,
            now,
            Duration::seconds(60),
        )
    }

    fn activate(session: &mut Session, now: DateTime<Utc>) {
        for id in ["a", "b", "c", "d"] {
            session.confirm(id, now).unwrap();
        }
    }

    #[test]
    fn test_confirmation_flow() {
        let now = current_timestamp();
        let mut session = duo_session(now);

        assert_eq!(
            session.confirm("a", now).unwrap(),
            ConfirmOutcome::Pending {
                confirmed: 1,
                required: 4
            }
        );
        assert_eq!(session.state, SessionState::Confirming);

        // duplicate confirmations are harmless
        session.confirm("a", now).unwrap();
        session.confirm("b", now).unwrap();
        session.confirm("c", now).unwrap();
        assert_eq!(session.confirm("d", now).unwrap(), ConfirmOutcome::Activated);
        assert_eq!(session.state, SessionState::Active);
    }

    #[test]
    fn test_confirm_by_outsider_rejected() {
        let now = current_timestamp();
        let mut session = duo_session(now);
        assert!(session.confirm("zed", now).is_err());
        assert_eq!(session.state, SessionState::Forming);
    }

    #[test]
    fn test_result_requires_active() {
        let now = current_timestamp();
        let mut session = duo_session(now);
        assert!(session.complete(Outcome::Win { team: 0 }, now).is_err());

        activate(&mut session, now);
        assert!(session.complete(Outcome::Win { team: 5 }, now).is_err());
        session.complete(Outcome::Win { team: 1 }, now).unwrap();
        assert_eq!(session.state, SessionState::Completed);
        assert_eq!(session.ended_at, Some(now));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let now = current_timestamp();
        let mut session = duo_session(now);
        assert!(session.cancel(CancelReason::ConfirmationTimeout, now));

        assert!(!session.cancel(CancelReason::ConfirmationTimeout, now));
        assert!(session.confirm("a", now).is_err());
        assert!(session.complete(Outcome::Draw, now).is_err());
        assert_eq!(session.state, SessionState::Cancelled);
        assert_eq!(session.cancel_reason, Some(CancelReason::ConfirmationTimeout));
    }

    #[test]
    fn test_confirmation_expiry() {
        let now = current_timestamp();
        let session = duo_session(now);
        assert!(!session.confirmation_expired(now + Duration::seconds(59)));
        assert!(session.confirmation_expired(now + Duration::seconds(60)));
    }

    #[test]
    fn test_claims_agree() {
        let now = current_timestamp();
        let mut session = duo_session(now);
        activate(&mut session, now);

        assert!(session.claim("d", ResultClaim::Won, now).is_err());
        assert_eq!(
            session.claim("a", ResultClaim::Lost, now).unwrap(),
            ClaimOutcome::Waiting {
                claimed: 1,
                required: 2
            }
        );
        assert!(session.claim("a", ResultClaim::Won, now).is_err());
        assert_eq!(
            session.claim("b", ResultClaim::Won, now).unwrap(),
            ClaimOutcome::Agreed(Outcome::Win { team: 1 })
        );
        assert_eq!(session.state, SessionState::Completed);
    }

    #[test]
    fn test_conflicting_claims_reset() {
        let now = current_timestamp();
        let mut session = duo_session(now);
        activate(&mut session, now);

        session.claim("a", ResultClaim::Won, now).unwrap();
        assert_eq!(
            session.claim("b", ResultClaim::Won, now).unwrap(),
            ClaimOutcome::Disputed
        );
        assert!(session.claims.is_empty());
        assert_eq!(session.state, SessionState::Active);
    }

    #[test]
    fn test_substitution_keeps_state() {
        let now = current_timestamp();
        let mut session = duo_session(now);
        activate(&mut session, now);
        session.flag_ghost("c", now, Duration::seconds(30));
        session.flag_ghost("c", now, Duration::seconds(30));
        assert_eq!(session.pending_substitutions.len(), 1);

        let event = session.substitute("c", member("e", 65.0), now).unwrap();
        assert_eq!(event.team_index, 1);
        assert_eq!(session.state, SessionState::Active);
        assert!(session.is_member("e"));
        assert!(!session.is_member("c"));
        assert!(session.pending_substitutions.is_empty());
        assert_eq!(session.substitutions.len(), 1);
    }

    #[test]
    fn test_overdue_ghosts() {
        let now = current_timestamp();
        let mut session = duo_session(now);
        session.flag_ghost("b", now, Duration::seconds(30));
        assert!(session.overdue_ghosts(now).is_empty());
        assert_eq!(session.overdue_ghosts(now + Duration::seconds(30)), vec!["b"]);
    }

    #[test]
    fn test_extend_confirmation_only_moves_forward() {
        let now = current_timestamp();
        let mut session = duo_session(now);
        let original = session.confirm_deadline;

        assert!(!session.extend_confirmation(now + Duration::seconds(30)));
        assert_eq!(session.confirm_deadline, original);
        assert!(session.extend_confirmation(now + Duration::seconds(90)));
        assert_eq!(session.confirm_deadline, now + Duration::seconds(90));
        assert!(!session.confirmation_expired(now + Duration::seconds(61)));

        activate(&mut session, now);
        assert!(!session.extend_confirmation(now + Duration::seconds(500)));
    }
}
