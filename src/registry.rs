//! Player registry
//!
//! The registry is the only place player status changes. Queue and session
//! code ask it to move a player between statuses, and it refuses any move
//! that would put one player in two places at once.

use crate::error::{MatchmakingError, Result};
use crate::types::{Player, PlayerId, PlayerRating, PlayerStatus, PlayerType};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

/// In-memory registry of every player the engine has seen
#[derive(Debug, Clone, Default)]
pub struct PlayerRegistry {
    players: HashMap<PlayerId, Player>,
    default_rating: PlayerRating,
}

/// Check a status move against the single-membership rules
fn check_transition(player_id: &str, from: PlayerStatus, to: PlayerStatus) -> Result<()> {
    let allowed = match to {
        PlayerStatus::Idle => true,
        PlayerStatus::Queued => from == PlayerStatus::Idle,
        PlayerStatus::InMatch => matches!(from, PlayerStatus::Idle | PlayerStatus::Queued),
        PlayerStatus::Ghost => matches!(from, PlayerStatus::Queued | PlayerStatus::InMatch),
    };

    if allowed {
        Ok(())
    } else {
        Err(MatchmakingError::invalid_state(format!(
            "player {} cannot move from {} to {}",
            player_id, from, to
        ))
        .into())
    }
}

impl PlayerRegistry {
    /// Create an empty registry; new players start at `default_rating`
    pub fn new(default_rating: PlayerRating) -> Self {
        Self {
            players: HashMap::new(),
            default_rating,
        }
    }

    /// Rebuild a registry from restored players
    pub fn from_players(players: Vec<Player>, default_rating: PlayerRating) -> Self {
        Self {
            players: players.into_iter().map(|p| (p.id.clone(), p)).collect(),
            default_rating,
        }
    }

    /// Register a player, or refresh the display name of a known one.
    ///
    /// Re-registering the same identifier with a different player type is an
    /// identity collision and fails with `Conflict`.
    pub fn register(
        &mut self,
        player_id: &str,
        display_name: &str,
        player_type: PlayerType,
        now: DateTime<Utc>,
    ) -> Result<&Player> {
        if player_id.trim().is_empty() {
            return Err(MatchmakingError::invalid_state("player id cannot be empty").into());
        }

        if let Some(existing) = self.players.get(player_id) {
            if existing.player_type != player_type {
                return Err(MatchmakingError::Conflict {
                    player_id: player_id.to_string(),
                    reason: format!(
                        "already registered as {:?}, not {:?}",
                        existing.player_type, player_type
                    ),
                }
                .into());
            }
        }

        let default_rating = self.default_rating.clone();
        let player = self
            .players
            .entry(player_id.to_string())
            .and_modify(|p| {
                p.display_name = display_name.to_string();
                p.last_activity = now;
            })
            .or_insert_with(|| {
                info!("Registered new player {} ({:?})", player_id, player_type);
                Player {
                    id: player_id.to_string(),
                    display_name: display_name.to_string(),
                    player_type,
                    rating: default_rating,
                    status: PlayerStatus::Idle,
                    last_activity: now,
                    registered_at: now,
                }
            });

        Ok(&*player)
    }

    pub fn get(&self, player_id: &str) -> Result<&Player> {
        self.players.get(player_id).ok_or_else(|| {
            MatchmakingError::PlayerNotFound {
                player_id: player_id.to_string(),
            }
            .into()
        })
    }

    fn get_mut(&mut self, player_id: &str) -> Result<&mut Player> {
        self.players.get_mut(player_id).ok_or_else(|| {
            MatchmakingError::PlayerNotFound {
                player_id: player_id.to_string(),
            }
            .into()
        })
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.players.contains_key(player_id)
    }

    pub fn status(&self, player_id: &str) -> Result<PlayerStatus> {
        Ok(self.get(player_id)?.status)
    }

    pub fn rating(&self, player_id: &str) -> Result<&PlayerRating> {
        Ok(&self.get(player_id)?.rating)
    }

    pub fn set_rating(&mut self, player_id: &str, rating: PlayerRating) -> Result<()> {
        self.get_mut(player_id)?.rating = rating;
        Ok(())
    }

    /// Move a player to a new status, returning the previous one
    pub fn set_status(&mut self, player_id: &str, new_status: PlayerStatus) -> Result<PlayerStatus> {
        let player = self.get_mut(player_id)?;
        let previous = player.status;
        check_transition(player_id, previous, new_status)?;
        player.status = new_status;

        if previous != new_status {
            debug!("Player {} status {} -> {}", player_id, previous, new_status);
        }
        Ok(previous)
    }

    /// Record that the player did something
    pub fn touch_activity(&mut self, player_id: &str, now: DateTime<Utc>) -> Result<()> {
        let player = self.get_mut(player_id)?;
        if now > player.last_activity {
            player.last_activity = now;
        }
        Ok(())
    }

    /// Return a ghosted player to Idle
    pub fn clear_ghost(&mut self, player_id: &str, now: DateTime<Utc>) -> Result<()> {
        let player = self.get_mut(player_id)?;
        if player.status != PlayerStatus::Ghost {
            return Err(MatchmakingError::invalid_state(format!(
                "player {} is {}, not a ghost",
                player_id, player.status
            ))
            .into());
        }

        player.status = PlayerStatus::Idle;
        player.last_activity = now;
        info!("Cleared ghost flag for player {}", player_id);
        Ok(())
    }

    /// Queued or matched humans whose last activity is older than `cutoff`,
    /// sorted by id so sweeps are deterministic
    pub fn stale_players(&self, cutoff: DateTime<Utc>) -> Vec<PlayerId> {
        let mut stale: Vec<PlayerId> = self
            .players
            .values()
            .filter(|p| p.player_type == PlayerType::Human)
            .filter(|p| matches!(p.status, PlayerStatus::Queued | PlayerStatus::InMatch))
            .filter(|p| p.last_activity < cutoff)
            .map(|p| p.id.clone())
            .collect();
        stale.sort();
        stale
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn count_with_status(&self, status: PlayerStatus) -> usize {
        self.players.values().filter(|p| p.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::current_timestamp;
    use chrono::Duration;

    fn registry_with(ids: &[&str]) -> PlayerRegistry {
        let mut registry = PlayerRegistry::default();
        for id in ids {
            registry
                .register(id, id, PlayerType::Human, current_timestamp())
                .unwrap();
        }
        registry
    }

    fn error_kind(err: &anyhow::Error) -> &'static str {
        MatchmakingError::from_anyhow(err).map(|e| e.kind()).unwrap_or("untyped")
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = registry_with(&["alice"]);
        registry.set_status("alice", PlayerStatus::Queued).unwrap();

        let player = registry
            .register("alice", "Alice v2", PlayerType::Human, current_timestamp())
            .unwrap();
        assert_eq!(player.display_name, "Alice v2");
        assert_eq!(player.status, PlayerStatus::Queued);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_conflicting_identity() {
        let mut registry = registry_with(&["alice"]);
        let err = registry
            .register("alice", "Alice", PlayerType::Bot, current_timestamp())
            .unwrap_err();
        assert_eq!(error_kind(&err), "conflict");
    }

    #[test]
    fn test_unknown_player() {
        let mut registry = PlayerRegistry::default();
        let err = registry.set_status("ghost", PlayerStatus::Queued).unwrap_err();
        assert_eq!(error_kind(&err), "player_not_found");
        let err = registry
            .touch_activity("ghost", current_timestamp())
            .unwrap_err();
        assert_eq!(error_kind(&err), "player_not_found");
    }

    #[test]
    fn test_double_queue_refused() {
        let mut registry = registry_with(&["alice"]);
        registry.set_status("alice", PlayerStatus::Queued).unwrap();
        let err = registry.set_status("alice", PlayerStatus::Queued).unwrap_err();
        assert_eq!(error_kind(&err), "invalid_state");
    }

    #[test]
    fn test_double_match_refused() {
        let mut registry = registry_with(&["alice"]);
        registry.set_status("alice", PlayerStatus::InMatch).unwrap();
        assert!(registry.set_status("alice", PlayerStatus::InMatch).is_err());
        assert!(registry.set_status("alice", PlayerStatus::Queued).is_err());
    }

    #[test]
    fn test_ghost_requires_clearing() {
        let mut registry = registry_with(&["alice"]);
        registry.set_status("alice", PlayerStatus::Queued).unwrap();
        registry.set_status("alice", PlayerStatus::Ghost).unwrap();

        assert!(registry.set_status("alice", PlayerStatus::Queued).is_err());
        registry.clear_ghost("alice", current_timestamp()).unwrap();
        assert_eq!(registry.status("alice").unwrap(), PlayerStatus::Idle);
        assert!(registry.clear_ghost("alice", current_timestamp()).is_err());
    }

    #[test]
    fn test_idle_player_cannot_be_ghosted() {
        let mut registry = registry_with(&["alice"]);
        assert!(registry.set_status("alice", PlayerStatus::Ghost).is_err());
    }

    #[test]
    fn test_stale_players_excludes_idle_and_bots() {
        let now = current_timestamp();
        let past = now - Duration::seconds(600);
        let mut registry = PlayerRegistry::default();
        for id in ["a", "b", "c"] {
            registry.register(id, id, PlayerType::Human, past).unwrap();
        }
        registry.register("bot", "bot", PlayerType::Bot, past).unwrap();

        registry.set_status("a", PlayerStatus::Queued).unwrap();
        registry.set_status("b", PlayerStatus::InMatch).unwrap();
        registry.set_status("bot", PlayerStatus::Queued).unwrap();

        let cutoff = now - Duration::seconds(60);
        assert_eq!(registry.stale_players(cutoff), vec!["a", "b"]);

        registry.touch_activity("a", now).unwrap();
        assert_eq!(registry.stale_players(cutoff), vec!["b"]);
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let now = current_timestamp();
        let mut registry = PlayerRegistry::default();
        registry.register("a", "a", PlayerType::Human, now).unwrap();
        registry
            .touch_activity("a", now - Duration::seconds(30))
            .unwrap();
        assert_eq!(registry.get("a").unwrap().last_activity, now);
    }
}
