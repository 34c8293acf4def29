//! Parties
//!
//! A party is a host plus the players who accepted the host's invites. A
//! player belongs to at most one party. The host is the only one who can
//! invite, kick or queue the party; when the host leaves, the party is
//! disbanded. Queue and session status are not tracked here.

use crate::error::{MatchmakingError, Result};
use crate::types::PlayerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Longest accepted party name, in characters
pub const MAX_PARTY_NAME_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub host: PlayerId,
    pub name: String,
    /// Host first, then members in the order they joined
    pub members: Vec<PlayerId>,
    /// Outstanding invites and when they were sent
    pub invites: BTreeMap<PlayerId, DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Party {
    fn new(host: &str, host_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            host: host.to_string(),
            name: format!("{}'s Party", host_name),
            members: vec![host.to_string()],
            invites: BTreeMap::new(),
            created_at: now,
        }
    }

    pub fn is_host(&self, player_id: &str) -> bool {
        self.host == player_id
    }

    pub fn is_member(&self, player_id: &str) -> bool {
        self.members.iter().any(|m| m == player_id)
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// What leaving a party did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartyDeparture {
    /// A member left; the party carries on under `host`
    Left { host: PlayerId },
    /// The host left and every member was released
    Disbanded { members: Vec<PlayerId> },
}

#[derive(Debug, Clone)]
pub struct PartyRegistry {
    /// Parties keyed by host
    parties: BTreeMap<PlayerId, Party>,
    /// Member to the host of their party
    membership: HashMap<PlayerId, PlayerId>,
    max_size: usize,
}

fn not_in_party(player_id: &str) -> anyhow::Error {
    MatchmakingError::PartyNotFound {
        player_id: player_id.to_string(),
    }
    .into()
}

impl PartyRegistry {
    pub fn new(max_size: usize) -> Self {
        Self {
            parties: BTreeMap::new(),
            membership: HashMap::new(),
            max_size: max_size.max(1),
        }
    }

    /// Rebuild from restored parties. A party whose host or member already
    /// belongs to an earlier party is dropped and returned.
    pub fn from_parties(
        parties: impl IntoIterator<Item = Party>,
        max_size: usize,
    ) -> (Self, Vec<Party>) {
        let mut registry = Self::new(max_size);
        let mut rejected = Vec::new();

        for party in parties {
            let overlaps = party
                .members
                .iter()
                .any(|m| registry.membership.contains_key(m));
            let malformed = party.members.first() != Some(&party.host);
            if overlaps || malformed || party.size() > registry.max_size {
                warn!("Dropping restored party of {}", party.host);
                rejected.push(party);
                continue;
            }
            for member in &party.members {
                registry
                    .membership
                    .insert(member.clone(), party.host.clone());
            }
            registry.parties.insert(party.host.clone(), party);
        }

        (registry, rejected)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// The party a player belongs to, as host or member
    pub fn party_of(&self, player_id: &str) -> Option<&Party> {
        self.membership
            .get(player_id)
            .and_then(|host| self.parties.get(host))
    }

    fn hosted_mut(&mut self, host: &str) -> Result<&mut Party> {
        self.hosted(host)?;
        self.parties.get_mut(host).ok_or_else(|| not_in_party(host))
    }

    /// The party hosted by `host`; fails for members and players outside any party
    pub fn hosted(&self, host: &str) -> Result<&Party> {
        match self.party_of(host) {
            Some(party) if party.is_host(host) => Ok(party),
            Some(party) => Err(MatchmakingError::invalid_state(format!(
                "{} is not the host of {}",
                host, party.name
            ))
            .into()),
            None => Err(not_in_party(host)),
        }
    }

    pub fn create(&mut self, host: &str, host_name: &str, now: DateTime<Utc>) -> Result<&Party> {
        if let Some(existing) = self.party_of(host) {
            return Err(MatchmakingError::Conflict {
                player_id: host.to_string(),
                reason: format!("already in {}", existing.name),
            }
            .into());
        }

        let party = Party::new(host, host_name, now);
        info!("Player {} created {}", host, party.name);
        self.membership.insert(host.to_string(), host.to_string());
        Ok(&*self.parties.entry(host.to_string()).or_insert(party))
    }

    /// Any member may rename the party
    pub fn rename(&mut self, player_id: &str, name: &str) -> Result<&Party> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_PARTY_NAME_CHARS {
            return Err(MatchmakingError::invalid_state(format!(
                "party names must be 1 to {} characters",
                MAX_PARTY_NAME_CHARS
            ))
            .into());
        }
        let host = self
            .membership
            .get(player_id)
            .cloned()
            .ok_or_else(|| not_in_party(player_id))?;
        let party = self
            .parties
            .get_mut(&host)
            .ok_or_else(|| not_in_party(player_id))?;
        party.name = name.to_string();
        Ok(&*party)
    }

    pub fn invite(&mut self, host: &str, target: &str, now: DateTime<Utc>) -> Result<&Party> {
        if host == target {
            return Err(MatchmakingError::invalid_state("cannot invite yourself").into());
        }
        if let Some(existing) = self.party_of(target) {
            return Err(MatchmakingError::Conflict {
                player_id: target.to_string(),
                reason: format!("already in {}", existing.name),
            }
            .into());
        }

        let max_size = self.max_size;
        let party = self.hosted_mut(host)?;
        if party.size() >= max_size {
            return Err(MatchmakingError::invalid_state(format!(
                "{} is full ({} members)",
                party.name, max_size
            ))
            .into());
        }
        if party.invites.contains_key(target) {
            return Err(MatchmakingError::invalid_state(format!(
                "{} already has a pending invite",
                target
            ))
            .into());
        }

        party.invites.insert(target.to_string(), now);
        debug!("{} invited {} to {}", host, target, party.name);
        Ok(&*party)
    }

    /// Join the party hosted by `host`. A full party drops the invite.
    pub fn accept(&mut self, player_id: &str, host: &str) -> Result<&Party> {
        if let Some(existing) = self.party_of(player_id) {
            return Err(MatchmakingError::Conflict {
                player_id: player_id.to_string(),
                reason: format!("already in {}", existing.name),
            }
            .into());
        }

        let max_size = self.max_size;
        let party = self.parties.get_mut(host).ok_or_else(|| not_in_party(host))?;
        if party.invites.remove(player_id).is_none() {
            return Err(MatchmakingError::invalid_state(format!(
                "{} has no invite from {}",
                player_id, host
            ))
            .into());
        }
        if party.size() >= max_size {
            return Err(
                MatchmakingError::invalid_state(format!("{} is full", party.name)).into(),
            );
        }

        party.members.push(player_id.to_string());
        info!(
            "Player {} joined {} ({}/{})",
            player_id,
            party.name,
            party.size(),
            max_size
        );
        self.membership
            .insert(player_id.to_string(), host.to_string());
        self.parties
            .get(host)
            .ok_or_else(|| not_in_party(host))
    }

    pub fn decline(&mut self, player_id: &str, host: &str) -> Result<&Party> {
        let party = self.parties.get_mut(host).ok_or_else(|| not_in_party(host))?;
        if party.invites.remove(player_id).is_none() {
            return Err(MatchmakingError::invalid_state(format!(
                "{} has no invite from {}",
                player_id, host
            ))
            .into());
        }
        debug!("{} declined the invite to {}", player_id, party.name);
        Ok(&*party)
    }

    pub fn leave(&mut self, player_id: &str) -> Result<PartyDeparture> {
        let host = self
            .membership
            .get(player_id)
            .cloned()
            .ok_or_else(|| not_in_party(player_id))?;

        if host == player_id {
            let party = self
                .parties
                .remove(&host)
                .ok_or_else(|| not_in_party(player_id))?;
            for member in &party.members {
                self.membership.remove(member);
            }
            info!("{} disbanded by {}", party.name, host);
            return Ok(PartyDeparture::Disbanded {
                members: party.members,
            });
        }

        self.remove_member(&host, player_id)?;
        Ok(PartyDeparture::Left { host })
    }

    /// Remove a member on the host's behalf
    pub fn kick(&mut self, host: &str, target: &str) -> Result<&Party> {
        if host == target {
            return Err(MatchmakingError::invalid_state(
                "the host cannot kick themselves; leave to disband",
            )
            .into());
        }
        let party = self.hosted_mut(host)?;
        if !party.is_member(target) {
            return Err(MatchmakingError::invalid_state(format!(
                "{} is not in {}",
                target, party.name
            ))
            .into());
        }
        self.remove_member(host, target)?;
        info!("{} kicked {} from their party", host, target);
        self.parties.get(host).ok_or_else(|| not_in_party(host))
    }

    fn remove_member(&mut self, host: &str, member: &str) -> Result<()> {
        let party = self.parties.get_mut(host).ok_or_else(|| not_in_party(host))?;
        party.members.retain(|m| m != member);
        self.membership.remove(member);
        Ok(())
    }

    /// Every party, ordered by host
    pub fn snapshot(&self) -> Vec<Party> {
        self.parties.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }
}
