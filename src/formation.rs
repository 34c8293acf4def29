//! Team formation
//!
//! Drained queue entries are ranked by rating and dealt into teams in snake
//! order (0, 1, .., N-1, N-1, .., 1, 0, ..). A bounded swap pass then trades
//! single players between teams while that strictly narrows the gap between
//! the strongest and weakest team, so the result is stable under any one
//! swap. Modes with single-player teams skip both and pair adjacent ranks.
//!
//! Parties drafted together are placed first, each whole on one team; the
//! remaining players are snake-drafted into the open slots and only they
//! take part in swaps.

use crate::config::ModeConfig;
use crate::error::{MatchmakingError, Result};
use crate::types::PlayerId;
use crate::utils::max_spread;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Improvements smaller than this are treated as rounding noise
const SWAP_EPSILON: f64 = 1e-9;

/// A drained player with the rating used for balancing, in queue order
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub player_id: PlayerId,
    pub rating: f64,
    /// Host of the party this player queued with; party members share a team
    pub party: Option<PlayerId>,
}

impl Candidate {
    pub fn new(player_id: impl Into<PlayerId>, rating: f64) -> Self {
        Self {
            player_id: player_id.into(),
            rating,
            party: None,
        }
    }

    pub fn with_party(mut self, party: Option<PlayerId>) -> Self {
        self.party = party;
        self
    }

    fn locked(&self) -> bool {
        self.party.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub player_id: PlayerId,
    /// Rating at the time the player joined the team
    pub rating: f64,
}

/// Ordered set of players; the first member is the team captain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub members: Vec<TeamMember>,
}

impl Team {
    fn from_candidates(candidates: Vec<Candidate>) -> Self {
        Self {
            members: candidates
                .into_iter()
                .map(|c| TeamMember {
                    player_id: c.player_id,
                    rating: c.rating,
                })
                .collect(),
        }
    }

    /// Aggregate skill of the team
    pub fn rating_sum(&self) -> f64 {
        self.members.iter().map(|m| m.rating).sum()
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.members.iter().any(|m| m.player_id == player_id)
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.members.iter().map(|m| m.player_id.clone()).collect()
    }

    pub fn captain(&self) -> Option<&PlayerId> {
        self.members.first().map(|m| &m.player_id)
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Swap `outgoing` for a new member in the same slot
    pub fn replace(&mut self, outgoing: &str, incoming: TeamMember) -> bool {
        match self.members.iter_mut().find(|m| m.player_id == outgoing) {
            Some(slot) => {
                *slot = incoming;
                true
            }
            None => false,
        }
    }
}

/// Letter label for a team index: A, B, C, ...
pub fn team_label(index: usize) -> String {
    let letter = (b'A' + (index % 26) as u8) as char;
    if index < 26 {
        letter.to_string()
    } else {
        format!("{}{}", letter, index / 26)
    }
}

/// The teams of one match
#[derive(Debug, Clone, PartialEq)]
pub struct Matchup {
    pub teams: Vec<Team>,
}

impl Matchup {
    /// Difference between the strongest and weakest team total
    pub fn spread(&self) -> f64 {
        let sums: Vec<f64> = self.teams.iter().map(Team::rating_sum).collect();
        max_spread(&sums)
    }
}

/// Turns a drained pool into one or more matchups
pub trait TeamFormer: Send + Sync {
    fn form(&self, mode: &str, config: &ModeConfig, candidates: &[Candidate])
        -> Result<Vec<Matchup>>;
}

/// Snake draft with single-swap refinement
#[derive(Debug, Clone)]
pub struct SnakeDraftFormer {
    refine: bool,
}

impl Default for SnakeDraftFormer {
    fn default() -> Self {
        Self { refine: true }
    }
}

impl SnakeDraftFormer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain snake order without the swap pass
    pub fn without_refinement() -> Self {
        Self { refine: false }
    }
}

fn insufficient(mode: &str, reason: String) -> anyhow::Error {
    error!("Aborting team formation for {}: {}", mode, reason);
    MatchmakingError::InsufficientPlayers {
        mode: mode.to_string(),
        reason,
    }
    .into()
}

/// Sort by rating, highest first. The sort is stable, so equal ratings keep
/// their queue order.
pub fn rank_candidates(candidates: &[Candidate]) -> Vec<Candidate> {
    let mut ranked = candidates.to_vec();
    ranked.sort_by(|a, b| b.rating.total_cmp(&a.rating));
    ranked
}

/// Deal ranked players into `num_teams` teams in snake order
pub fn snake_assign(ranked: Vec<Candidate>, num_teams: usize) -> Vec<Vec<Candidate>> {
    let mut teams: Vec<Vec<Candidate>> = vec![Vec::new(); num_teams];
    let team_size = ranked.len().div_ceil(num_teams.max(1));
    snake_fill(&mut teams, ranked, team_size);
    teams
}

/// Team index at a position of the snake order 0, 1, .., N-1, N-1, .., 0, ..
fn snake_slot(position: usize, num_teams: usize) -> usize {
    let round = position / num_teams;
    let slot = position % num_teams;
    if round % 2 == 0 {
        slot
    } else {
        num_teams - 1 - slot
    }
}

/// Deal ranked players into the open slots of partly filled teams, walking
/// the snake order and skipping teams that are already full
pub fn snake_fill(teams: &mut [Vec<Candidate>], ranked: Vec<Candidate>, team_size: usize) {
    let num_teams = teams.len();
    if num_teams == 0 {
        return;
    }
    let mut position = 0;
    for candidate in ranked {
        // bounded: every pass over 2N positions visits each team twice
        let mut attempts = 0;
        while teams[snake_slot(position, num_teams)].len() >= team_size && attempts < 2 * num_teams
        {
            position += 1;
            attempts += 1;
        }
        teams[snake_slot(position, num_teams)].push(candidate);
        position += 1;
    }
}

/// Assign whole groups to teams without overfilling any. Groups are given
/// as (size, rating sum). Larger groups go first, each to the weakest team
/// that still has room; a later group that no longer fits makes the
/// placement backtrack. None when no placement exists.
pub fn place_groups(groups: &[(usize, f64)], num_teams: usize, team_size: usize) -> Option<Vec<usize>> {
    fn place(
        order: &[usize],
        groups: &[(usize, f64)],
        free: &mut [usize],
        sums: &mut [f64],
        assignment: &mut [usize],
    ) -> bool {
        let Some((&group, rest)) = order.split_first() else {
            return true;
        };
        let (size, rating) = groups[group];
        let mut teams: Vec<usize> = (0..free.len()).filter(|t| free[*t] >= size).collect();
        teams.sort_by(|a, b| sums[*a].total_cmp(&sums[*b]).then(a.cmp(b)));

        for team in teams {
            free[team] -= size;
            sums[team] += rating;
            assignment[group] = team;
            if place(rest, groups, free, sums, assignment) {
                return true;
            }
            free[team] += size;
            sums[team] -= rating;
        }
        false
    }

    let mut order: Vec<usize> = (0..groups.len()).collect();
    order.sort_by(|a, b| {
        groups[*b]
            .0
            .cmp(&groups[*a].0)
            .then(groups[*b].1.total_cmp(&groups[*a].1))
    });
    let mut free = vec![team_size; num_teams];
    let mut sums = vec![0.0; num_teams];
    let mut assignment = vec![0; groups.len()];

    place(&order, groups, &mut free, &mut sums, &mut assignment).then_some(assignment)
}

/// Split candidates into multi-player parties and everyone else, both in
/// queue order. A party of one is drafted like any other player.
fn split_parties(candidates: &[Candidate]) -> (Vec<Vec<Candidate>>, Vec<Candidate>) {
    let mut sizes: BTreeMap<&PlayerId, usize> = BTreeMap::new();
    for party in candidates.iter().filter_map(|c| c.party.as_ref()) {
        *sizes.entry(party).or_default() += 1;
    }

    let mut groups: Vec<Vec<Candidate>> = Vec::new();
    let mut group_of: BTreeMap<&PlayerId, usize> = BTreeMap::new();
    let mut singles = Vec::new();
    for candidate in candidates {
        match &candidate.party {
            Some(party) if sizes.get(party).copied().unwrap_or(0) > 1 => {
                let index = *group_of.entry(party).or_insert_with(|| {
                    groups.push(Vec::new());
                    groups.len() - 1
                });
                groups[index].push(candidate.clone());
            }
            _ => singles.push(candidate.clone().with_party(None)),
        }
    }
    (groups, singles)
}

/// Best single swap between two teams, as (team a, member a, team b, member b, new spread)
fn best_swap(teams: &[Vec<Candidate>]) -> Option<(usize, usize, usize, usize, f64)> {
    let sums: Vec<f64> = teams
        .iter()
        .map(|t| t.iter().map(|c| c.rating).sum())
        .collect();
    let current = max_spread(&sums);
    let mut best: Option<(usize, usize, usize, usize, f64)> = None;

    for a in 0..teams.len() {
        for b in (a + 1)..teams.len() {
            for (i, left) in teams[a].iter().enumerate().filter(|(_, c)| !c.locked()) {
                for (j, right) in teams[b].iter().enumerate().filter(|(_, c)| !c.locked()) {
                    let delta = right.rating - left.rating;
                    let mut trial = sums.clone();
                    trial[a] += delta;
                    trial[b] -= delta;
                    let spread = max_spread(&trial);

                    let threshold = best.map_or(current, |(.., s)| s);
                    if spread + SWAP_EPSILON < threshold {
                        best = Some((a, i, b, j, spread));
                    }
                }
            }
        }
    }

    best
}

/// Apply improving swaps until none is left. Party members never move.
pub fn refine_by_swaps(teams: &mut [Vec<Candidate>]) -> usize {
    let players: usize = teams.iter().map(Vec::len).sum();
    let limit = (players * players).max(256);
    let mut swaps = 0;

    while swaps < limit {
        let Some((a, i, b, j, spread)) = best_swap(teams) else {
            break;
        };
        let left = teams[a][i].clone();
        let right = std::mem::replace(&mut teams[b][j], left);
        teams[a][i] = right;
        swaps += 1;
        debug!("Swap {} narrowed team spread to {:.2}", swaps, spread);
    }

    swaps
}

impl TeamFormer for SnakeDraftFormer {
    fn form(
        &self,
        mode: &str,
        config: &ModeConfig,
        candidates: &[Candidate],
    ) -> Result<Vec<Matchup>> {
        if config.num_teams == 0 || config.capacity % config.num_teams != 0 {
            return Err(insufficient(
                mode,
                format!(
                    "capacity {} does not divide into {} teams",
                    config.capacity, config.num_teams
                ),
            ));
        }
        if candidates.len() != config.capacity {
            return Err(insufficient(
                mode,
                format!(
                    "expected {} players, got {}",
                    config.capacity,
                    candidates.len()
                ),
            ));
        }

        let (groups, singles) = split_parties(candidates);
        if !groups.is_empty() {
            return self.form_with_parties(mode, config, groups, singles);
        }

        let ranked = rank_candidates(&singles);

        if config.is_head_to_head() {
            if ranked.len() % 2 != 0 {
                return Err(insufficient(
                    mode,
                    format!("cannot pair an odd pool of {}", ranked.len()),
                ));
            }
            let matchups = ranked
                .chunks(2)
                .map(|pair| Matchup {
                    teams: pair
                        .iter()
                        .map(|c| Team::from_candidates(vec![c.clone()]))
                        .collect(),
                })
                .collect();
            return Ok(matchups);
        }

        let mut teams = snake_assign(ranked, config.num_teams);
        if self.refine {
            refine_by_swaps(&mut teams);
        }

        finish(mode, config, teams)
    }
}

impl SnakeDraftFormer {
    fn form_with_parties(
        &self,
        mode: &str,
        config: &ModeConfig,
        groups: Vec<Vec<Candidate>>,
        singles: Vec<Candidate>,
    ) -> Result<Vec<Matchup>> {
        let team_size = config.team_size();
        let shape: Vec<(usize, f64)> = groups
            .iter()
            .map(|g| (g.len(), g.iter().map(|c| c.rating).sum()))
            .collect();
        let Some(assignment) = place_groups(&shape, config.num_teams, team_size) else {
            return Err(insufficient(
                mode,
                format!(
                    "parties of sizes {:?} do not fit {} teams of {}",
                    shape.iter().map(|(size, _)| *size).collect::<Vec<_>>(),
                    config.num_teams,
                    team_size
                ),
            ));
        };

        let mut teams: Vec<Vec<Candidate>> = vec![Vec::new(); config.num_teams];
        for (group, team) in groups.into_iter().zip(assignment) {
            debug!(
                "Party of {} placed on team {}",
                group.len(),
                team_label(team)
            );
            teams[team].extend(group);
        }

        snake_fill(&mut teams, rank_candidates(&singles), team_size);
        if self.refine {
            refine_by_swaps(&mut teams);
        }
        finish(mode, config, teams)
    }
}

fn finish(mode: &str, config: &ModeConfig, teams: Vec<Vec<Candidate>>) -> Result<Vec<Matchup>> {
    let team_size = config.team_size();
    if teams.iter().any(|t| t.len() != team_size) {
        return Err(insufficient(mode, "uneven team sizes".to_string()));
    }

    Ok(vec![Matchup {
        teams: teams.into_iter().map(Team::from_candidates).collect(),
    }])
}
