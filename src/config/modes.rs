//! Game mode configuration
//!
//! A mode fixes how many players a match takes and how they split into
//! teams. The catalog is validated once at startup; later lookups only need
//! to reject unknown names.

use crate::error::{MatchmakingError, Result};
use crate::types::GameMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Largest match the engine will form
pub const MAX_CAPACITY: usize = 16;

/// Configuration for a single game mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
    /// Total players drained from the queue per match
    pub capacity: usize,
    /// Number of teams the drained players are split into
    pub num_teams: usize,
    /// Points awarded to each member of the winning team
    #[serde(default)]
    pub win_points: i64,
    /// Points applied to each member of a losing team (usually negative)
    #[serde(default)]
    pub loss_points: i64,
    /// Points applied to a member who aborts an active session
    #[serde(default)]
    pub cancel_penalty: i64,
}

impl ModeConfig {
    pub fn new(capacity: usize, num_teams: usize) -> Self {
        Self {
            capacity,
            num_teams,
            win_points: 0,
            loss_points: 0,
            cancel_penalty: 0,
        }
    }

    pub fn with_points(mut self, win: i64, loss: i64, cancel_penalty: i64) -> Self {
        self.win_points = win;
        self.loss_points = loss;
        self.cancel_penalty = cancel_penalty;
        self
    }

    /// Players per team; zero when the split is malformed
    pub fn team_size(&self) -> usize {
        if self.num_teams == 0 {
            0
        } else {
            self.capacity / self.num_teams
        }
    }

    /// Modes with single-player teams are paired by adjacent rank
    pub fn is_head_to_head(&self) -> bool {
        self.team_size() == 1
    }

    /// Validate a mode definition
    pub fn validate(&self, mode: &str) -> Result<()> {
        let fail = |message: String| -> anyhow::Error {
            MatchmakingError::ConfigurationError { message }.into()
        };

        if self.capacity < 2 {
            return Err(fail(format!("Mode {} needs a capacity of at least 2", mode)));
        }
        if self.capacity > MAX_CAPACITY {
            return Err(fail(format!(
                "Mode {} capacity cannot exceed {} players",
                mode, MAX_CAPACITY
            )));
        }
        if self.num_teams < 2 {
            return Err(fail(format!("Mode {} needs at least 2 teams", mode)));
        }
        if self.capacity % self.num_teams != 0 {
            return Err(fail(format!(
                "Mode {} capacity {} does not divide into {} teams",
                mode, self.capacity, self.num_teams
            )));
        }
        if self.is_head_to_head() && self.capacity % 2 != 0 {
            return Err(fail(format!(
                "Mode {} pairs players head to head and needs an even capacity",
                mode
            )));
        }
        if self.win_points < 0 {
            return Err(fail(format!("Mode {} win points cannot be negative", mode)));
        }
        if self.loss_points > 0 || self.cancel_penalty > 0 {
            return Err(fail(format!(
                "Mode {} loss points and cancel penalty cannot be positive",
                mode
            )));
        }

        Ok(())
    }
}

/// Default mode table: 1v1 through 4v4
pub fn default_modes() -> BTreeMap<GameMode, ModeConfig> {
    let mut modes = BTreeMap::new();
    modes.insert("1v1".to_string(), ModeConfig::new(2, 2).with_points(15, -15, -8));
    modes.insert("2v2".to_string(), ModeConfig::new(4, 2).with_points(8, -7, 0));
    modes.insert("3v3".to_string(), ModeConfig::new(6, 2).with_points(7, -7, 0));
    modes.insert("4v4".to_string(), ModeConfig::new(8, 2).with_points(6, -6, 0));
    modes
}

/// Validated set of modes the engine accepts
#[derive(Debug, Clone, PartialEq)]
pub struct ModeCatalog {
    modes: BTreeMap<GameMode, ModeConfig>,
}

impl ModeCatalog {
    /// Build a catalog, validating every mode
    pub fn new(modes: BTreeMap<GameMode, ModeConfig>) -> Result<Self> {
        if modes.is_empty() {
            return Err(MatchmakingError::ConfigurationError {
                message: "At least one game mode must be configured".to_string(),
            }
            .into());
        }

        for (name, config) in &modes {
            config.validate(name)?;
        }

        Ok(Self { modes })
    }

    /// Look up a mode, failing with `InvalidMode` when it is not configured
    pub fn get(&self, mode: &str) -> Result<&ModeConfig> {
        self.modes.get(mode).ok_or_else(|| {
            MatchmakingError::InvalidMode {
                mode: mode.to_string(),
            }
            .into()
        })
    }

    pub fn contains(&self, mode: &str) -> bool {
        self.modes.contains_key(mode)
    }

    pub fn names(&self) -> impl Iterator<Item = &GameMode> {
        self.modes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GameMode, &ModeConfig)> {
        self.modes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_modes_are_valid() {
        let catalog = ModeCatalog::new(default_modes()).unwrap();
        assert_eq!(catalog.get("2v2").unwrap().team_size(), 2);
        assert!(catalog.get("1v1").unwrap().is_head_to_head());
        assert_eq!(catalog.names().count(), 4);
    }

    #[test]
    fn test_uneven_split_rejected() {
        let err = ModeConfig::new(5, 2).validate("odd").unwrap_err();
        assert!(err.to_string().contains("does not divide"));
    }

    #[test]
    fn test_head_to_head_needs_even_capacity() {
        assert!(ModeConfig::new(3, 3).validate("ffa").is_err());
        assert!(ModeConfig::new(4, 4).validate("ladder").is_ok());
    }

    #[test]
    fn test_positive_penalty_rejected() {
        let config = ModeConfig::new(4, 2).with_points(8, -7, 3);
        assert!(config.validate("2v2").is_err());
    }

    #[test]
    fn test_unknown_mode_is_invalid_mode() {
        let catalog = ModeCatalog::new(default_modes()).unwrap();
        let err = catalog.get("9v9").unwrap_err();
        assert!(matches!(
            MatchmakingError::from_anyhow(&err),
            Some(MatchmakingError::InvalidMode { .. })
        ));
    }

    #[test]
    fn test_empty_catalog_rejected() {
        assert!(ModeCatalog::new(BTreeMap::new()).is_err());
    }
}
