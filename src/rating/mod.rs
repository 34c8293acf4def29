//! Rating updates using the Weng-Lin (OpenSkill) algorithm
//!
//! Completed sessions feed their team rosters and outcome into a
//! calculator; the engine writes the new ratings back to the registry.

pub mod calculator;
pub mod weng_lin;

pub use calculator::{
    team_ranks, NoOpRatingCalculator, RatingCalculationResult, RatingCalculator, RatingChange,
    TeamRatings,
};
pub use weng_lin::{ExtendedWengLinConfig, WengLinRatingCalculator};
