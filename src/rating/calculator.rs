//! Rating calculator trait and the no-op fallback
//!
//! Calculators take the rosters of a completed session plus its outcome and
//! produce one rating change per player.

use crate::error::{MatchmakingError, Result};
use crate::types::{Outcome, PlayerId, PlayerRating};
use serde::{Deserialize, Serialize};

/// Rating change for one player after a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingChange {
    pub player_id: PlayerId,
    pub team_index: usize,
    pub old_rating: PlayerRating,
    pub new_rating: PlayerRating,
}

impl RatingChange {
    pub fn delta(&self) -> f64 {
        self.new_rating.rating - self.old_rating.rating
    }
}

/// Result of a rating calculation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingCalculationResult {
    pub rating_changes: Vec<RatingChange>,
    /// Quality score of the match (0.0 to 1.0, higher is better)
    pub match_quality: f64,
}

/// One team's roster with current ratings
pub type TeamRatings = Vec<(PlayerId, PlayerRating)>;

/// Finishing rank per team: winners share rank 1, everyone else rank 2,
/// and a draw puts all teams on rank 1
pub fn team_ranks(team_count: usize, outcome: Outcome) -> Result<Vec<usize>> {
    match outcome {
        Outcome::Draw => Ok(vec![1; team_count]),
        Outcome::Win { team } if team < team_count => Ok((0..team_count)
            .map(|i| if i == team { 1 } else { 2 })
            .collect()),
        Outcome::Win { team } => Err(MatchmakingError::InvalidState {
            reason: format!("winning team {} out of range for {} teams", team, team_count),
        }
        .into()),
    }
}

/// Trait for calculating rating changes after games
pub trait RatingCalculator: Send + Sync {
    /// Rating changes for every player of a finished session
    fn calculate_rating_changes(
        &self,
        teams: &[TeamRatings],
        outcome: Outcome,
    ) -> Result<RatingCalculationResult>;

    /// Rating given to new players
    fn initial_rating(&self) -> PlayerRating;
}

pub(crate) fn check_teams(teams: &[TeamRatings]) -> Result<()> {
    if teams.len() < 2 || teams.iter().any(Vec::is_empty) {
        return Err(MatchmakingError::InvalidState {
            reason: "rating updates need at least two non-empty teams".to_string(),
        }
        .into());
    }
    Ok(())
}

/// Leaves ratings unchanged; used when rating updates are switched off
#[derive(Debug, Clone)]
pub struct NoOpRatingCalculator {
    initial_rating: PlayerRating,
}

impl NoOpRatingCalculator {
    pub fn new(initial_rating: PlayerRating) -> Self {
        Self { initial_rating }
    }
}

impl Default for NoOpRatingCalculator {
    fn default() -> Self {
        Self::new(PlayerRating::default())
    }
}

impl RatingCalculator for NoOpRatingCalculator {
    fn calculate_rating_changes(
        &self,
        teams: &[TeamRatings],
        outcome: Outcome,
    ) -> Result<RatingCalculationResult> {
        check_teams(teams)?;
        team_ranks(teams.len(), outcome)?;

        let rating_changes = teams
            .iter()
            .enumerate()
            .flat_map(|(team_index, team)| {
                team.iter().map(move |(player_id, rating)| RatingChange {
                    player_id: player_id.clone(),
                    team_index,
                    old_rating: rating.clone(),
                    new_rating: rating.clone(),
                })
            })
            .collect();

        Ok(RatingCalculationResult {
            rating_changes,
            match_quality: 1.0,
        })
    }

    fn initial_rating(&self) -> PlayerRating {
        self.initial_rating.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(ids: &[&str]) -> TeamRatings {
        ids.iter()
            .map(|id| (id.to_string(), PlayerRating::default()))
            .collect()
    }

    #[test]
    fn test_team_ranks() {
        assert_eq!(team_ranks(2, Outcome::Win { team: 1 }).unwrap(), vec![2, 1]);
        assert_eq!(team_ranks(3, Outcome::Draw).unwrap(), vec![1, 1, 1]);
        assert!(team_ranks(2, Outcome::Win { team: 2 }).is_err());
    }

    #[test]
    fn test_no_op_keeps_ratings() {
        let calculator = NoOpRatingCalculator::default();
        let result = calculator
            .calculate_rating_changes(&[roster(&["a", "b"]), roster(&["c", "d"])], Outcome::Draw)
            .unwrap();

        assert_eq!(result.rating_changes.len(), 4);
        assert!(result.rating_changes.iter().all(|c| c.delta() == 0.0));
        assert_eq!(result.rating_changes[2].team_index, 1);
    }

    #[test]
    fn test_rejects_single_team() {
        let calculator = NoOpRatingCalculator::default();
        assert!(calculator
            .calculate_rating_changes(&[roster(&["a"])], Outcome::Draw)
            .is_err());
    }
}
