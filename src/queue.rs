//! Queue manager
//!
//! One waiting pool per configured mode. Pools are kept in service order:
//! requeued players (compensated for a cancelled match) first, then by join
//! time, with a sequence number breaking timestamp ties.
//!
//! A party queues as one unit: its entries share a tag, join and leave
//! together, and a drain takes either all of them or none.

use crate::config::ModeCatalog;
use crate::error::{MatchmakingError, Result};
use crate::formation::place_groups;
use crate::registry::PlayerRegistry;
use crate::types::{GameMode, PlayerId, PlayerStatus};
use crate::utils::{rating_difference, ratings_within_tolerance};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Service priority of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QueuePriority {
    /// Returned to the queue after a disrupted match; served first
    Requeued,
    Normal,
}

/// A player waiting for a match in one mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub player_id: PlayerId,
    pub mode: GameMode,
    pub joined_at: DateTime<Utc>,
    pub priority: QueuePriority,
    /// Monotonic join counter, breaks ties between identical timestamps
    pub sequence: u64,
    /// Host of the party this entry was queued with
    #[serde(default)]
    pub party: Option<PlayerId>,
}

impl QueueEntry {
    /// How long this entry has been waiting
    pub fn waited(&self, now: DateTime<Utc>) -> Duration {
        now - self.joined_at
    }

    fn service_key(&self) -> (QueuePriority, DateTime<Utc>, u64) {
        (self.priority, self.joined_at, self.sequence)
    }
}

#[derive(Debug, Clone)]
struct Pool {
    capacity: usize,
    num_teams: usize,
    team_size: usize,
    entries: Vec<QueueEntry>,
}

impl Pool {
    /// Indices of the entries the next drain takes: whole units in service
    /// order, skipping any party that no longer fits, until exactly
    /// `capacity` players are chosen
    fn ready_selection(&self) -> Option<Vec<usize>> {
        if self.entries.len() < self.capacity {
            return None;
        }

        let mut units: Vec<Vec<usize>> = Vec::new();
        let mut unit_of: HashMap<&PlayerId, usize> = HashMap::new();
        for (index, entry) in self.entries.iter().enumerate() {
            match &entry.party {
                Some(party) => {
                    let unit = *unit_of.entry(party).or_insert_with(|| {
                        units.push(Vec::new());
                        units.len() - 1
                    });
                    units[unit].push(index);
                }
                None => units.push(vec![index]),
            }
        }

        let mut chosen = Vec::new();
        let mut groups: Vec<(usize, f64)> = Vec::new();
        for unit in units {
            if chosen.len() + unit.len() > self.capacity {
                continue;
            }
            if unit.len() > 1 {
                groups.push((unit.len(), 0.0));
                if place_groups(&groups, self.num_teams, self.team_size).is_none() {
                    groups.pop();
                    continue;
                }
            }
            chosen.extend(unit);
            if chosen.len() == self.capacity {
                chosen.sort_unstable();
                return Some(chosen);
            }
        }
        None
    }

    fn insert(&mut self, entry: QueueEntry) {
        let key = entry.service_key();
        let position = self
            .entries
            .partition_point(|existing| existing.service_key() <= key);
        self.entries.insert(position, entry);
    }
}

/// Waiting pools for every configured mode
#[derive(Debug, Clone)]
pub struct QueueManager {
    pools: BTreeMap<GameMode, Pool>,
    /// Player to the mode they are queued in
    index: HashMap<PlayerId, GameMode>,
    next_sequence: u64,
}

impl QueueManager {
    /// Create empty pools for every mode in the catalog
    pub fn new(catalog: &ModeCatalog) -> Self {
        let pools = catalog
            .iter()
            .map(|(name, config)| {
                (
                    name.clone(),
                    Pool {
                        capacity: config.capacity,
                        num_teams: config.num_teams,
                        team_size: config.team_size(),
                        entries: Vec::new(),
                    },
                )
            })
            .collect();

        Self {
            pools,
            index: HashMap::new(),
            next_sequence: 0,
        }
    }

    /// Rebuild pools from restored entries. Entries for modes that are no
    /// longer configured, or duplicates of an already queued player, are dropped
    /// and returned so the caller can fix the players' status.
    pub fn from_entries(
        catalog: &ModeCatalog,
        entries: impl IntoIterator<Item = QueueEntry>,
    ) -> (Self, Vec<QueueEntry>) {
        let mut manager = Self::new(catalog);
        let mut rejected = Vec::new();

        for entry in entries {
            if manager.index.contains_key(&entry.player_id) || !manager.pools.contains_key(&entry.mode)
            {
                warn!(
                    "Dropping restored queue entry for {} in {}",
                    entry.player_id, entry.mode
                );
                rejected.push(entry);
                continue;
            }
            manager.next_sequence = manager.next_sequence.max(entry.sequence + 1);
            manager.insert_entry(entry);
        }

        (manager, rejected)
    }

    fn pool(&self, mode: &str) -> Result<&Pool> {
        self.pools.get(mode).ok_or_else(|| {
            MatchmakingError::InvalidMode {
                mode: mode.to_string(),
            }
            .into()
        })
    }

    fn insert_entry(&mut self, entry: QueueEntry) {
        self.index.insert(entry.player_id.clone(), entry.mode.clone());
        if let Some(pool) = self.pools.get_mut(&entry.mode) {
            pool.insert(entry);
        }
    }

    /// Add a player to a mode's pool and mark them Queued
    pub fn join(
        &mut self,
        registry: &mut PlayerRegistry,
        player_id: &str,
        mode: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        self.enqueue(registry, player_id, mode, now, QueuePriority::Normal)
    }

    /// Like `join`, but with an explicit priority
    pub fn enqueue(
        &mut self,
        registry: &mut PlayerRegistry,
        player_id: &str,
        mode: &str,
        now: DateTime<Utc>,
        priority: QueuePriority,
    ) -> Result<QueueEntry> {
        registry.get(player_id)?;

        if let Some(existing) = self.index.get(player_id) {
            return Err(MatchmakingError::AlreadyQueued {
                player_id: player_id.to_string(),
                mode: existing.clone(),
            }
            .into());
        }
        self.pool(mode)?;

        registry.set_status(player_id, PlayerStatus::Queued)?;

        let entry = QueueEntry {
            player_id: player_id.to_string(),
            mode: mode.to_string(),
            joined_at: now,
            priority,
            sequence: self.next_sequence,
            party: None,
        };
        self.next_sequence += 1;
        self.insert_entry(entry.clone());

        debug!(
            "Player {} queued for {} ({:?}), pool size {}",
            player_id,
            mode,
            priority,
            self.pool_size(mode).unwrap_or_default()
        );
        Ok(entry)
    }

    /// Queue a whole party as one unit. Every member must be registered,
    /// Idle and not already queued, and the party must fit on one team;
    /// otherwise nobody is queued.
    pub fn join_party(
        &mut self,
        registry: &mut PlayerRegistry,
        party: &str,
        members: &[PlayerId],
        mode: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>> {
        let team_size = self.pool(mode)?.team_size;
        if members.len() > team_size {
            return Err(MatchmakingError::invalid_state(format!(
                "a party of {} does not fit a {} team of {}",
                members.len(),
                mode,
                team_size
            ))
            .into());
        }

        for member in members {
            let status = registry.status(member)?;
            if let Some(existing) = self.index.get(member) {
                return Err(MatchmakingError::AlreadyQueued {
                    player_id: member.clone(),
                    mode: existing.clone(),
                }
                .into());
            }
            if status != PlayerStatus::Idle {
                return Err(MatchmakingError::invalid_state(format!(
                    "party member {} is {}",
                    member, status
                ))
                .into());
            }
        }

        let mut queued: Vec<&PlayerId> = Vec::new();
        for member in members {
            if let Err(e) = registry.set_status(member, PlayerStatus::Queued) {
                for player in queued {
                    if let Err(e) = registry.set_status(player, PlayerStatus::Idle) {
                        warn!("Could not release party member {}: {}", player, e);
                    }
                }
                return Err(e);
            }
            queued.push(member);
        }

        let entries: Vec<QueueEntry> = members
            .iter()
            .map(|member| {
                let entry = QueueEntry {
                    player_id: member.clone(),
                    mode: mode.to_string(),
                    joined_at: now,
                    priority: QueuePriority::Normal,
                    sequence: self.next_sequence,
                    party: Some(party.to_string()),
                };
                self.next_sequence += 1;
                entry
            })
            .collect();
        for entry in &entries {
            self.insert_entry(entry.clone());
        }

        info!(
            "Party of {} queued {} players for {}",
            party,
            entries.len(),
            mode
        );
        Ok(entries)
    }

    /// Take every entry of a party out of the queue and mark its players Idle
    pub fn leave_party(
        &mut self,
        registry: &mut PlayerRegistry,
        party: &str,
    ) -> Result<Vec<QueueEntry>> {
        let members: Vec<PlayerId> = self
            .pools
            .values()
            .flat_map(|pool| pool.entries.iter())
            .filter(|e| e.party.as_deref() == Some(party))
            .map(|e| e.player_id.clone())
            .collect();

        let mut left = Vec::new();
        for member in members {
            if let Some(entry) = self.leave(registry, &member)? {
                left.push(entry);
            }
        }
        Ok(left)
    }

    /// Mode a party is queued in, if any of its entries are waiting
    pub fn party_mode(&self, party: &str) -> Option<&GameMode> {
        self.pools
            .iter()
            .find(|(_, pool)| pool.entries.iter().any(|e| e.party.as_deref() == Some(party)))
            .map(|(mode, _)| mode)
    }

    /// Remove a player's entry and mark them Idle. Leaving without an entry is
    /// a no-op so duplicate leave commands are harmless.
    pub fn leave(
        &mut self,
        registry: &mut PlayerRegistry,
        player_id: &str,
    ) -> Result<Option<QueueEntry>> {
        let Some(entry) = self.remove(player_id) else {
            return Ok(None);
        };

        if registry.status(player_id)? == PlayerStatus::Queued {
            registry.set_status(player_id, PlayerStatus::Idle)?;
        }
        info!("Player {} left the {} queue", player_id, entry.mode);
        Ok(Some(entry))
    }

    /// Drop a player's entry without touching their status
    pub fn remove(&mut self, player_id: &str) -> Option<QueueEntry> {
        let mode = self.index.remove(player_id)?;
        let pool = self.pools.get_mut(&mode)?;
        let position = pool.entries.iter().position(|e| e.player_id == player_id)?;
        Some(pool.entries.remove(position))
    }

    pub fn pool_size(&self, mode: &str) -> Result<usize> {
        Ok(self.pool(mode)?.entries.len())
    }

    /// Entries of a pool in service order
    pub fn entries(&self, mode: &str) -> Result<&[QueueEntry]> {
        Ok(&self.pool(mode)?.entries)
    }

    pub fn entry_for(&self, player_id: &str) -> Option<&QueueEntry> {
        let mode = self.index.get(player_id)?;
        self.pools
            .get(mode)?
            .entries
            .iter()
            .find(|e| e.player_id == player_id)
    }

    /// One-based position of a player in their pool
    pub fn position(&self, player_id: &str) -> Option<usize> {
        let mode = self.index.get(player_id)?;
        self.pools
            .get(mode)?
            .entries
            .iter()
            .position(|e| e.player_id == player_id)
            .map(|p| p + 1)
    }

    pub fn is_queued(&self, player_id: &str) -> bool {
        self.index.contains_key(player_id)
    }

    /// When the pool holds at least `capacity` entries, remove exactly that
    /// many, oldest first with parties kept whole, and return them for team
    /// formation
    pub fn drain_ready_pool(&mut self, mode: &str) -> Result<Option<Vec<QueueEntry>>> {
        let pool = self.pools.get_mut(mode).ok_or_else(|| MatchmakingError::InvalidMode {
            mode: mode.to_string(),
        })?;

        let Some(selection) = pool.ready_selection() else {
            return Ok(None);
        };

        let mut drained = Vec::with_capacity(selection.len());
        for index in selection.into_iter().rev() {
            drained.push(pool.entries.remove(index));
        }
        drained.reverse();
        for entry in &drained {
            self.index.remove(&entry.player_id);
        }

        info!("Drained {} players from the {} queue", drained.len(), mode);
        Ok(Some(drained))
    }

    /// Put entries back after a formation attempt was aborted
    pub fn reinstate(&mut self, entries: Vec<QueueEntry>) {
        for entry in entries {
            self.insert_entry(entry);
        }
    }

    /// Closest-rated waiting player within `band` of `target_rating`.
    /// Ties go to whoever is earlier in service order. Party members are
    /// never pulled away from their party.
    pub fn find_substitute(
        &self,
        registry: &PlayerRegistry,
        mode: &str,
        target_rating: f64,
        band: f64,
    ) -> Option<PlayerId> {
        let pool = self.pools.get(mode)?;
        let mut best: Option<(f64, &QueueEntry)> = None;

        for entry in pool.entries.iter().filter(|e| e.party.is_none()) {
            let Ok(rating) = registry.rating(&entry.player_id) else {
                continue;
            };
            if !ratings_within_tolerance(rating.rating, target_rating, band) {
                continue;
            }
            let distance = rating_difference(rating.rating, target_rating);
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, entry));
            }
        }

        best.map(|(_, entry)| entry.player_id.clone())
    }

    pub fn modes(&self) -> impl Iterator<Item = &GameMode> {
        self.pools.keys()
    }

    /// Every entry grouped by mode, in service order
    pub fn snapshot(&self) -> BTreeMap<GameMode, Vec<QueueEntry>> {
        self.pools
            .iter()
            .map(|(mode, pool)| (mode.clone(), pool.entries.clone()))
            .collect()
    }

    pub fn total_waiting(&self) -> usize {
        self.index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModeCatalog, ModeConfig};
    use crate::types::{PlayerRating, PlayerType};
    use crate::utils::current_timestamp;

    fn setup(ids: &[(&str, f64)]) -> (PlayerRegistry, QueueManager) {
        let mut modes = BTreeMap::new();
        modes.insert("duo".to_string(), ModeConfig::new(4, 2));
        modes.insert("solo".to_string(), ModeConfig::new(2, 2));
        let catalog = ModeCatalog::new(modes).unwrap();

        let mut registry = PlayerRegistry::default();
        for (id, rating) in ids {
            registry
                .register(id, id, PlayerType::Human, current_timestamp())
                .unwrap();
            registry
                .set_rating(id, PlayerRating::new(*rating, 100.0))
                .unwrap();
        }
        (registry, QueueManager::new(&catalog))
    }

    fn kind(err: &anyhow::Error) -> &'static str {
        MatchmakingError::from_anyhow(err).map(|e| e.kind()).unwrap_or("untyped")
    }

    #[test]
    fn test_join_marks_player_queued() {
        let (mut registry, mut queue) = setup(&[("a", 100.0)]);
        queue.join(&mut registry, "a", "duo", current_timestamp()).unwrap();

        assert_eq!(registry.status("a").unwrap(), PlayerStatus::Queued);
        assert_eq!(queue.pool_size("duo").unwrap(), 1);
        assert_eq!(queue.position("a"), Some(1));
    }

    #[test]
    fn test_join_twice_is_already_queued() {
        let (mut registry, mut queue) = setup(&[("a", 100.0)]);
        let now = current_timestamp();
        queue.join(&mut registry, "a", "duo", now).unwrap();

        let err = queue.join(&mut registry, "a", "solo", now).unwrap_err();
        assert_eq!(kind(&err), "already_queued");
        assert_eq!(queue.pool_size("solo").unwrap(), 0);
    }

    #[test]
    fn test_join_unknown_mode() {
        let (mut registry, mut queue) = setup(&[("a", 100.0)]);
        let err = queue
            .join(&mut registry, "a", "9v9", current_timestamp())
            .unwrap_err();
        assert_eq!(kind(&err), "invalid_mode");
        assert_eq!(registry.status("a").unwrap(), PlayerStatus::Idle);
    }

    #[test]
    fn test_join_while_in_match_rejected() {
        let (mut registry, mut queue) = setup(&[("a", 100.0)]);
        registry.set_status("a", PlayerStatus::InMatch).unwrap();
        let err = queue
            .join(&mut registry, "a", "duo", current_timestamp())
            .unwrap_err();
        assert_eq!(kind(&err), "invalid_state");
        assert!(!queue.is_queued("a"));
    }

    #[test]
    fn test_leave_is_idempotent() {
        let (mut registry, mut queue) = setup(&[("a", 100.0)]);
        queue.join(&mut registry, "a", "duo", current_timestamp()).unwrap();

        assert!(queue.leave(&mut registry, "a").unwrap().is_some());
        assert!(queue.leave(&mut registry, "a").unwrap().is_none());
        assert_eq!(registry.status("a").unwrap(), PlayerStatus::Idle);
    }

    #[test]
    fn test_drain_waits_for_capacity() {
        let (mut registry, mut queue) = setup(&[("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0), ("e", 5.0)]);
        let now = current_timestamp();
        for id in ["a", "b", "c"] {
            queue.join(&mut registry, id, "duo", now).unwrap();
        }
        assert!(queue.drain_ready_pool("duo").unwrap().is_none());

        queue.join(&mut registry, "d", "duo", now).unwrap();
        queue.join(&mut registry, "e", "duo", now).unwrap();
        let drained = queue.drain_ready_pool("duo").unwrap().unwrap();
        let ids: Vec<_> = drained.iter().map(|e| e.player_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(queue.pool_size("duo").unwrap(), 1);
        assert!(!queue.is_queued("a"));
        assert!(queue.is_queued("e"));
    }

    #[test]
    fn test_requeued_players_served_first() {
        let (mut registry, mut queue) = setup(&[("a", 1.0), ("b", 2.0)]);
        let now = current_timestamp();
        queue.join(&mut registry, "a", "solo", now).unwrap();
        queue
            .enqueue(
                &mut registry,
                "b",
                "solo",
                now + Duration::seconds(5),
                QueuePriority::Requeued,
            )
            .unwrap();

        let order: Vec<_> = queue
            .entries("solo")
            .unwrap()
            .iter()
            .map(|e| e.player_id.clone())
            .collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn test_reinstate_restores_order() {
        let (mut registry, mut queue) = setup(&[("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)]);
        let now = current_timestamp();
        for id in ["a", "b", "c", "d"] {
            queue.join(&mut registry, id, "duo", now).unwrap();
        }
        let drained = queue.drain_ready_pool("duo").unwrap().unwrap();
        queue.reinstate(drained);

        let order: Vec<_> = queue
            .entries("duo")
            .unwrap()
            .iter()
            .map(|e| e.player_id.clone())
            .collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
        assert_eq!(queue.position("d"), Some(4));
    }

    #[test]
    fn test_find_substitute_prefers_closest_rating() {
        let (mut registry, mut queue) = setup(&[("far", 400.0), ("near", 120.0), ("same", 120.0)]);
        let now = current_timestamp();
        for id in ["far", "near", "same"] {
            queue.join(&mut registry, id, "duo", now).unwrap();
        }

        assert_eq!(
            queue.find_substitute(&registry, "duo", 100.0, 50.0),
            Some("near".to_string())
        );
        assert_eq!(queue.find_substitute(&registry, "duo", 1000.0, 50.0), None);
        assert_eq!(queue.find_substitute(&registry, "solo", 100.0, 500.0), None);
    }

    #[test]
    fn test_from_entries_drops_unknown_modes_and_duplicates() {
        let (_, queue) = setup(&[]);
        let now = current_timestamp();
        let entry = |id: &str, mode: &str, seq: u64| QueueEntry {
            player_id: id.to_string(),
            mode: mode.to_string(),
            joined_at: now,
            priority: QueuePriority::Normal,
            sequence: seq,
            party: None,
        };

        let mut modes = BTreeMap::new();
        modes.insert("duo".to_string(), ModeConfig::new(4, 2));
        let catalog = ModeCatalog::new(modes).unwrap();
        let (restored, rejected) = QueueManager::from_entries(
            &catalog,
            vec![entry("a", "duo", 3), entry("b", "gone", 4), entry("a", "duo", 5)],
        );

        assert_eq!(restored.total_waiting(), 1);
        assert_eq!(rejected.len(), 2);
        assert_eq!(restored.next_sequence, 4);
        assert_eq!(queue.total_waiting(), 0);
    }

    fn ids(entries: &[QueueEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.player_id.as_str()).collect()
    }

    fn members(ids: &[&str]) -> Vec<PlayerId> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_party_joins_as_one_block() {
        let (mut registry, mut queue) = setup(&[("a", 1.0), ("h", 2.0), ("m", 3.0)]);
        let now = current_timestamp();
        queue.join(&mut registry, "a", "duo", now).unwrap();
        let entries = queue
            .join_party(&mut registry, "h", &members(&["h", "m"]), "duo", now)
            .unwrap();

        assert_eq!(ids(&entries), vec!["h", "m"]);
        assert!(entries.iter().all(|e| e.party.as_deref() == Some("h")));
        assert_eq!(entries[1].sequence, entries[0].sequence + 1);
        assert_eq!(queue.position("m"), Some(3));
        assert_eq!(registry.status("m").unwrap(), PlayerStatus::Queued);
        assert_eq!(queue.party_mode("h"), Some(&"duo".to_string()));
    }

    #[test]
    fn test_party_join_is_all_or_nothing() {
        let (mut registry, mut queue) = setup(&[("h", 1.0), ("m", 2.0), ("q", 3.0)]);
        let now = current_timestamp();
        registry.set_status("m", PlayerStatus::InMatch).unwrap();

        let err = queue
            .join_party(&mut registry, "h", &members(&["h", "m"]), "duo", now)
            .unwrap_err();
        assert_eq!(kind(&err), "invalid_state");
        assert!(!queue.is_queued("h"));
        assert_eq!(registry.status("h").unwrap(), PlayerStatus::Idle);

        queue.join(&mut registry, "q", "solo", now).unwrap();
        let err = queue
            .join_party(&mut registry, "h", &members(&["h", "q"]), "duo", now)
            .unwrap_err();
        assert_eq!(kind(&err), "already_queued");
        assert_eq!(queue.pool_size("duo").unwrap(), 0);
    }

    #[test]
    fn test_party_larger_than_a_team_rejected() {
        let (mut registry, mut queue) = setup(&[("h", 1.0), ("m", 2.0)]);
        let err = queue
            .join_party(
                &mut registry,
                "h",
                &members(&["h", "m"]),
                "solo",
                current_timestamp(),
            )
            .unwrap_err();
        assert_eq!(kind(&err), "invalid_state");
        assert_eq!(queue.total_waiting(), 0);
    }

    #[test]
    fn test_drain_never_splits_a_party() {
        let (mut registry, mut queue) =
            setup(&[("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0), ("h", 5.0), ("m", 6.0)]);
        let now = current_timestamp();
        for id in ["a", "b", "c"] {
            queue.join(&mut registry, id, "duo", now).unwrap();
        }
        queue
            .join_party(&mut registry, "h", &members(&["h", "m"]), "duo", now)
            .unwrap();

        // Five waiting, but the only way to reach four would split the party
        assert!(queue.drain_ready_pool("duo").unwrap().is_none());

        queue.join(&mut registry, "d", "duo", now).unwrap();
        let drained = queue.drain_ready_pool("duo").unwrap().unwrap();
        assert_eq!(ids(&drained), vec!["a", "b", "c", "d"]);
        assert_eq!(ids(queue.entries("duo").unwrap()), vec!["h", "m"]);
    }

    #[test]
    fn test_drain_takes_party_in_service_order() {
        let (mut registry, mut queue) =
            setup(&[("h", 1.0), ("m", 2.0), ("a", 3.0), ("b", 4.0), ("c", 5.0)]);
        let now = current_timestamp();
        queue
            .join_party(&mut registry, "h", &members(&["h", "m"]), "duo", now)
            .unwrap();
        for id in ["a", "b", "c"] {
            queue.join(&mut registry, id, "duo", now).unwrap();
        }

        let drained = queue.drain_ready_pool("duo").unwrap().unwrap();
        assert_eq!(ids(&drained), vec!["h", "m", "a", "b"]);
        assert_eq!(ids(queue.entries("duo").unwrap()), vec!["c"]);
    }

    #[test]
    fn test_leave_party_dequeues_every_member() {
        let (mut registry, mut queue) = setup(&[("h", 1.0), ("m", 2.0), ("a", 3.0)]);
        let now = current_timestamp();
        queue.join(&mut registry, "a", "duo", now).unwrap();
        queue
            .join_party(&mut registry, "h", &members(&["h", "m"]), "duo", now)
            .unwrap();

        let left = queue.leave_party(&mut registry, "h").unwrap();
        assert_eq!(ids(&left), vec!["h", "m"]);
        assert_eq!(registry.status("m").unwrap(), PlayerStatus::Idle);
        assert_eq!(queue.party_mode("h"), None);
        assert!(queue.is_queued("a"));
        assert!(queue.leave_party(&mut registry, "h").unwrap().is_empty());
    }

    #[test]
    fn test_substitutes_never_come_from_a_party() {
        let (mut registry, mut queue) = setup(&[("h", 100.0), ("m", 100.0), ("loner", 160.0)]);
        let now = current_timestamp();
        queue
            .join_party(&mut registry, "h", &members(&["h", "m"]), "duo", now)
            .unwrap();
        assert_eq!(queue.find_substitute(&registry, "duo", 100.0, 50.0), None);

        queue.join(&mut registry, "loner", "duo", now).unwrap();
        assert_eq!(
            queue.find_substitute(&registry, "duo", 100.0, 100.0),
            Some("loner".to_string())
        );
    }
}
