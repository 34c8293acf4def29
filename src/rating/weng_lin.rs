//! Weng-Lin (OpenSkill) rating system implementation
//!
//! Each session team is one Weng-Lin team. Winners share first place and
//! every other team shares second; a draw ranks every team first.

use crate::config::RatingSettings;
use crate::error::{MatchmakingError, Result};
use crate::rating::calculator::{
    check_teams, team_ranks, RatingCalculationResult, RatingCalculator, RatingChange, TeamRatings,
};
use crate::types::{Outcome, PlayerRating};
use serde::{Deserialize, Serialize};
use skillratings::weng_lin::{weng_lin_multi_team, WengLinConfig, WengLinRating};
use skillratings::MultiTeamOutcome;
use tracing::{debug, warn};

/// Extended configuration for the Weng-Lin rating system
/// This wraps the skillratings WengLinConfig with additional parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedWengLinConfig {
    /// Core Weng-Lin parameters
    pub weng_lin_config: WengLinConfig,
    /// Initial rating for new players
    pub initial_rating: f64,
    /// Initial uncertainty for new players
    pub initial_uncertainty: f64,
}

impl Default for ExtendedWengLinConfig {
    fn default() -> Self {
        Self {
            weng_lin_config: WengLinConfig {
                beta: 200.0,
                uncertainty_tolerance: 0.0001,
            },
            initial_rating: 1500.0,
            initial_uncertainty: 200.0,
        }
    }
}

impl From<&RatingSettings> for ExtendedWengLinConfig {
    fn from(settings: &RatingSettings) -> Self {
        Self {
            weng_lin_config: WengLinConfig {
                beta: settings.beta,
                uncertainty_tolerance: 0.0001,
            },
            initial_rating: settings.initial_rating,
            initial_uncertainty: settings.initial_uncertainty,
        }
    }
}

impl ExtendedWengLinConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.weng_lin_config.beta <= 0.0 {
            return Err(MatchmakingError::ConfigurationError {
                message: "Beta must be positive".to_string(),
            }
            .into());
        }

        if self.weng_lin_config.uncertainty_tolerance < 0.0 {
            return Err(MatchmakingError::ConfigurationError {
                message: "Uncertainty tolerance must be non-negative".to_string(),
            }
            .into());
        }

        if self.initial_uncertainty <= 0.0 {
            return Err(MatchmakingError::ConfigurationError {
                message: "Initial uncertainty must be positive".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

/// Weng-Lin rating calculator implementation
#[derive(Debug)]
pub struct WengLinRatingCalculator {
    config: ExtendedWengLinConfig,
}

impl WengLinRatingCalculator {
    pub fn new(config: ExtendedWengLinConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Quality of a pairing of teams (0.0 to 1.0): 1.0 when team rating
    /// averages are equal, falling off as they spread by more than beta
    pub fn calculate_match_quality(&self, teams: &[TeamRatings]) -> f64 {
        let averages: Vec<f64> = teams
            .iter()
            .filter(|t| !t.is_empty())
            .map(|t| t.iter().map(|(_, r)| r.rating).sum::<f64>() / t.len() as f64)
            .collect();
        if averages.len() < 2 {
            return 0.0;
        }

        let spread = crate::utils::max_spread(&averages);
        let quality = 1.0 - (spread / self.config.weng_lin_config.beta).min(1.0);
        quality.max(0.0)
    }
}

impl RatingCalculator for WengLinRatingCalculator {
    fn calculate_rating_changes(
        &self,
        teams: &[TeamRatings],
        outcome: Outcome,
    ) -> Result<RatingCalculationResult> {
        check_teams(teams)?;
        let ranks = team_ranks(teams.len(), outcome)?;

        let rosters: Vec<Vec<WengLinRating>> = teams
            .iter()
            .map(|team| team.iter().map(|(_, r)| r.clone().into()).collect())
            .collect();

        let teams_refs: Vec<(&[WengLinRating], MultiTeamOutcome)> = rosters
            .iter()
            .zip(&ranks)
            .map(|(roster, rank)| (roster.as_slice(), MultiTeamOutcome::new(*rank)))
            .collect();

        let new_ratings = weng_lin_multi_team(&teams_refs, &self.config.weng_lin_config);

        let mut rating_changes = Vec::new();
        for (team_index, team) in teams.iter().enumerate() {
            for (slot, (player_id, old_rating)) in team.iter().enumerate() {
                let Some(updated) = new_ratings.get(team_index).and_then(|t| t.get(slot)) else {
                    warn!("Missing rating result for player {}", player_id);
                    continue;
                };
                let new_rating: PlayerRating = (*updated).into();
                debug!(
                    "Rating {} {:.1} -> {:.1}",
                    player_id, old_rating.rating, new_rating.rating
                );
                rating_changes.push(RatingChange {
                    player_id: player_id.clone(),
                    team_index,
                    old_rating: old_rating.clone(),
                    new_rating,
                });
            }
        }

        Ok(RatingCalculationResult {
            rating_changes,
            match_quality: self.calculate_match_quality(teams),
        })
    }

    fn initial_rating(&self) -> PlayerRating {
        PlayerRating::new(self.config.initial_rating, self.config.initial_uncertainty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn team(entries: &[(&str, f64)]) -> TeamRatings {
        entries
            .iter()
            .map(|(id, rating)| (id.to_string(), PlayerRating::new(*rating, 200.0)))
            .collect()
    }

    fn calculator() -> WengLinRatingCalculator {
        WengLinRatingCalculator::new(ExtendedWengLinConfig::default()).unwrap()
    }

    #[test]
    fn test_config_validation() {
        let mut config = ExtendedWengLinConfig::default();
        assert!(config.validate().is_ok());

        config.weng_lin_config.beta = -1.0;
        assert!(config.validate().is_err());

        config = ExtendedWengLinConfig::default();
        config.initial_uncertainty = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_settings() {
        let settings = RatingSettings {
            beta: 120.0,
            initial_rating: 1200.0,
            ..RatingSettings::default()
        };
        let config = ExtendedWengLinConfig::from(&settings);
        assert_eq!(config.weng_lin_config.beta, 120.0);

        let calculator = WengLinRatingCalculator::new(config).unwrap();
        assert_eq!(calculator.initial_rating().rating, 1200.0);
    }

    #[test]
    fn test_head_to_head_win() {
        let result = calculator()
            .calculate_rating_changes(
                &[team(&[("p1", 1500.0)]), team(&[("p2", 1500.0)])],
                Outcome::Win { team: 0 },
            )
            .unwrap();

        assert_eq!(result.rating_changes.len(), 2);
        assert!(result.rating_changes[0].delta() > 0.0);
        assert!(result.rating_changes[1].delta() < 0.0);
        assert!(result.match_quality > 0.99);
    }

    #[test]
    fn test_team_win_moves_whole_team() {
        let result = calculator()
            .calculate_rating_changes(
                &[
                    team(&[("a", 1600.0), ("d", 1400.0)]),
                    team(&[("b", 1550.0), ("c", 1450.0)]),
                ],
                Outcome::Win { team: 1 },
            )
            .unwrap();

        let changes: HashMap<&str, &RatingChange> = result
            .rating_changes
            .iter()
            .map(|c| (c.player_id.as_str(), c))
            .collect();
        assert!(changes["b"].delta() > 0.0);
        assert!(changes["c"].delta() > 0.0);
        assert!(changes["a"].delta() < 0.0);
        assert!(changes["d"].delta() < 0.0);
        assert_eq!(changes["c"].team_index, 1);
    }

    #[test]
    fn test_draw_between_equals_is_neutral() {
        let result = calculator()
            .calculate_rating_changes(
                &[team(&[("a", 1500.0)]), team(&[("b", 1500.0)])],
                Outcome::Draw,
            )
            .unwrap();
        for change in &result.rating_changes {
            assert!(change.delta().abs() < 1e-6);
            assert!(change.new_rating.uncertainty <= change.old_rating.uncertainty);
        }
    }

    #[test]
    fn test_match_quality_drops_with_spread() {
        let calc = calculator();
        let even = calc.calculate_match_quality(&[team(&[("a", 1500.0)]), team(&[("b", 1500.0)])]);
        let uneven = calc.calculate_match_quality(&[team(&[("a", 1800.0)]), team(&[("b", 1500.0)])]);
        assert!(even > uneven);
        assert_eq!(uneven, 0.0);
    }
}
