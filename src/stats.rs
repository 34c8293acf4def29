//! Points ledger and leaderboards
//!
//! Per mode, per player win/loss/cancellation counts and a points total that
//! never drops below zero.

use crate::config::ModeConfig;
use crate::types::{GameMode, Outcome, PlayerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStanding {
    pub points: i64,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub cancellations: u32,
}

impl PlayerStanding {
    fn add_points(&mut self, delta: i64) -> i64 {
        let before = self.points;
        self.points = before.saturating_add(delta).max(0);
        self.points - before
    }

    pub fn games_played(&self) -> u32 {
        self.wins + self.losses + self.draws
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub player_id: PlayerId,
    pub standing: PlayerStanding,
}

/// Points change actually applied to one player, after the zero floor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsChange {
    pub player_id: PlayerId,
    pub applied: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointsLedger {
    modes: BTreeMap<GameMode, BTreeMap<PlayerId, PlayerStanding>>,
}

impl PointsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, mode: &str, player_id: &str) -> &mut PlayerStanding {
        self.modes
            .entry(mode.to_string())
            .or_default()
            .entry(player_id.to_string())
            .or_default()
    }

    pub fn standing(&self, mode: &str, player_id: &str) -> Option<&PlayerStanding> {
        self.modes.get(mode).and_then(|m| m.get(player_id))
    }

    pub fn points(&self, mode: &str, player_id: &str) -> i64 {
        self.standing(mode, player_id).map_or(0, |s| s.points)
    }

    /// Credit a completed session. Draws count but move no points.
    pub fn apply_result(
        &mut self,
        mode: &str,
        config: &ModeConfig,
        teams: &[Vec<PlayerId>],
        outcome: Outcome,
    ) -> Vec<PointsChange> {
        let mut changes = Vec::new();
        for (index, team) in teams.iter().enumerate() {
            for player_id in team {
                let standing = self.entry(mode, player_id);
                let applied = match outcome {
                    Outcome::Draw => {
                        standing.draws += 1;
                        0
                    }
                    Outcome::Win { team } if team == index => {
                        standing.wins += 1;
                        standing.add_points(config.win_points)
                    }
                    Outcome::Win { .. } => {
                        standing.losses += 1;
                        standing.add_points(config.loss_points)
                    }
                };
                changes.push(PointsChange {
                    player_id: player_id.clone(),
                    applied,
                });
            }
        }
        debug!("Applied {:?} to {} players in {}", outcome, changes.len(), mode);
        changes
    }

    /// Charge the mode's cancellation penalty to the player who aborted
    pub fn apply_cancel_penalty(
        &mut self,
        mode: &str,
        config: &ModeConfig,
        player_id: &str,
    ) -> PointsChange {
        let standing = self.entry(mode, player_id);
        standing.cancellations += 1;
        let applied = standing.add_points(config.cancel_penalty);
        PointsChange {
            player_id: player_id.to_string(),
            applied,
        }
    }

    /// Operator override; negative values are floored at zero
    pub fn set_points(&mut self, mode: &str, player_id: &str, points: i64) -> i64 {
        let standing = self.entry(mode, player_id);
        standing.points = points.max(0);
        info!("Points for {} in {} set to {}", player_id, mode, standing.points);
        standing.points
    }

    /// Operator override of the win count
    pub fn set_wins(&mut self, mode: &str, player_id: &str, wins: u32) -> u32 {
        let standing = self.entry(mode, player_id);
        standing.wins = wins;
        info!("Wins for {} in {} set to {}", player_id, mode, wins);
        wins
    }

    /// Operator override of the loss count
    pub fn set_losses(&mut self, mode: &str, player_id: &str, losses: u32) -> u32 {
        let standing = self.entry(mode, player_id);
        standing.losses = losses;
        info!("Losses for {} in {} set to {}", player_id, mode, losses);
        losses
    }

    /// Top players by points, then wins, then id
    pub fn leaderboard(&self, mode: &str, limit: usize) -> Vec<LeaderboardEntry> {
        let Some(players) = self.modes.get(mode) else {
            return Vec::new();
        };

        let mut ranked: Vec<(&PlayerId, &PlayerStanding)> = players.iter().collect();
        ranked.sort_by(|(a_id, a), (b_id, b)| {
            b.points
                .cmp(&a.points)
                .then_with(|| b.wins.cmp(&a.wins))
                .then_with(|| a_id.cmp(b_id))
        });

        ranked
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, (player_id, standing))| LeaderboardEntry {
                rank: i + 1,
                player_id: player_id.clone(),
                standing: standing.clone(),
            })
            .collect()
    }

    pub fn modes(&self) -> impl Iterator<Item = &GameMode> {
        self.modes.keys()
    }
}
