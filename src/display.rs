//! Display helpers for whatever renders sessions to players
//!
//! The glyph table is read-only after construction; the engine never
//! changes it.

use crate::formation::{team_label, Team};
use crate::registry::PlayerRegistry;
use crate::session::Session;
use crate::types::{GameMode, PlayerId, SessionId, SessionState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

const BUILTIN_GLYPHS: &[(&str, &str)] = &[("Slasher", "<:firejason:1468043640139022632>")];

/// Identifier to display glyph mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlyphTable {
    glyphs: BTreeMap<String, String>,
}

impl GlyphTable {
    pub fn new(glyphs: BTreeMap<String, String>) -> Self {
        Self { glyphs }
    }

    /// Table shipped with the crate
    pub fn builtin() -> &'static GlyphTable {
        static TABLE: OnceLock<GlyphTable> = OnceLock::new();
        TABLE.get_or_init(|| {
            GlyphTable::new(
                BUILTIN_GLYPHS
                    .iter()
                    .map(|(name, glyph)| (name.to_string(), glyph.to_string()))
                    .collect(),
            )
        })
    }

    pub fn glyph_for(&self, name: &str) -> Option<&str> {
        self.glyphs.get(name).map(String::as_str)
    }

    /// `name glyph`, or just `name` when there is no glyph
    pub fn decorate(&self, name: &str) -> String {
        match self.glyph_for(name) {
            Some(glyph) => format!("{} {}", name, glyph),
            None => name.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSummary {
    pub player_id: PlayerId,
    pub display_name: String,
    pub rating: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSummary {
    pub label: String,
    pub rating_sum: f64,
    pub members: Vec<MemberSummary>,
}

/// Render-ready view of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub mode: GameMode,
    pub state: SessionState,
    pub teams: Vec<TeamSummary>,
}

impl SessionSummary {
    /// Build from a session, decorating each member's display name. Members
    /// the registry no longer knows are shown by id.
    pub fn build(session: &Session, registry: &PlayerRegistry, glyphs: &GlyphTable) -> Self {
        let teams = session
            .teams
            .iter()
            .enumerate()
            .map(|(index, team)| summarize_team(index, team, registry, glyphs))
            .collect();

        Self {
            session_id: session.id,
            mode: session.mode.clone(),
            state: session.state,
            teams,
        }
    }
}

fn summarize_team(
    index: usize,
    team: &Team,
    registry: &PlayerRegistry,
    glyphs: &GlyphTable,
) -> TeamSummary {
    let members = team
        .members
        .iter()
        .map(|member| {
            let name = registry
                .get(&member.player_id)
                .map(|p| p.display_name.clone())
                .unwrap_or_else(|_| member.player_id.clone());
            MemberSummary {
                player_id: member.player_id.clone(),
                display_name: glyphs.decorate(&name),
                rating: member.rating,
            }
        })
        .collect();

    TeamSummary {
        label: team_label(index),
        rating_sum: team.rating_sum(),
        members,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formation::TeamMember;
    use crate::types::{PlayerRating, PlayerType};
    use crate::utils::{current_timestamp, generate_session_id, seconds};

    #[test]
    fn test_decorate() {
        let table = GlyphTable::builtin();
        assert_eq!(
            table.decorate("Slasher"),
            "Slasher <:firejason:1468043640139022632>"
        );
        assert_eq!(table.decorate("Nobody"), "Nobody");
        assert_eq!(table.glyph_for("Nobody"), None);
    }

    #[test]
    fn test_session_summary() {
        let now = current_timestamp();
        let mut registry = PlayerRegistry::new(PlayerRating::default());
        registry
            .register("p1", "Slasher", PlayerType::Human, now)
            .unwrap();

        let member = |id: &str, rating: f64| TeamMember {
            player_id: id.to_string(),
            rating,
        };
        let teams = vec![
            Team {
                members: vec![member("p1", 1600.0), member("p4", 1400.0)],
            },
            Team {
                members: vec![member("p2", 1550.0), member("p3", 1450.0)],
            },
        ];
        let session = Session::new(generate_session_id(), "2v2", teams, now, seconds(60));

        let summary = SessionSummary::build(&session, &registry, GlyphTable::builtin());
        assert_eq!(summary.teams.len(), 2);
        assert_eq!(summary.teams[0].rating_sum, 3000.0);
        assert_eq!(
            summary.teams[0].members[0].display_name,
            "Slasher <:firejason:1468043640139022632>"
        );
        assert_eq!(summary.teams[0].members[1].display_name, "p4");
        assert_eq!(summary.state, SessionState::Forming);
    }
}
