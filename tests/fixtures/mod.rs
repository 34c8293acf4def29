//! Shared setup for the integration suites
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use draft_room::config::{AppConfig, BackupBackend, ModeConfig};
use draft_room::engine::{Command, CommandResponse, EngineState, Matchmaker};
use draft_room::events::MockEventPublisher;
use draft_room::types::{EngineEvent, PlayerRating, PlayerType, SessionId};
use std::sync::Arc;

/// Default modes plus a 4-player, 2-team "duo" mode with points
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config
        .matchmaking
        .modes
        .insert("duo".to_string(), ModeConfig::new(4, 2).with_points(8, -7, -3));
    config.matchmaking.confirmation_window_seconds = 60;
    config.matchmaking.ghost_staleness_seconds = 300;
    config.matchmaking.substitution_grace_seconds = 60;
    config.service.health_port = 0;
    config.backup.backend = BackupBackend::Memory;
    config
}

/// A matchmaker whose players are registered with the given ratings
pub fn matchmaker_with(
    players: &[(&str, f64)],
    now: DateTime<Utc>,
) -> (Matchmaker, Arc<MockEventPublisher>) {
    let mut state = EngineState::new(&test_config()).unwrap();
    for (id, rating) in players {
        state.register(id, id, PlayerType::Human, now).unwrap();
        state
            .set_rating(id, PlayerRating::new(*rating, 200.0))
            .unwrap();
    }
    let publisher = Arc::new(MockEventPublisher::new());
    (Matchmaker::from_state(state, publisher.clone()), publisher)
}

pub async fn register(matchmaker: &Matchmaker, player_id: &str, now: DateTime<Utc>) {
    matchmaker
        .execute_at(
            Command::Register {
                player_id: player_id.to_string(),
                display_name: player_id.to_string(),
                player_type: PlayerType::Human,
            },
            now,
        )
        .await
        .unwrap();
}

pub async fn join(
    matchmaker: &Matchmaker,
    player_id: &str,
    mode: &str,
    now: DateTime<Utc>,
) -> Vec<SessionId> {
    match matchmaker
        .execute_at(
            Command::JoinQueue {
                player_id: player_id.to_string(),
                mode: mode.to_string(),
            },
            now,
        )
        .await
        .unwrap()
    {
        CommandResponse::Joined(outcome) => outcome.formed,
        other => panic!("unexpected response {:?}", other),
    }
}

pub async fn confirm_all(
    matchmaker: &Matchmaker,
    session_id: SessionId,
    players: &[&str],
    now: DateTime<Utc>,
) {
    for player in players {
        matchmaker
            .execute_at(
                Command::ConfirmReady {
                    session_id,
                    player_id: player.to_string(),
                },
                now,
            )
            .await
            .unwrap();
    }
}

/// Session ids of every MatchFormed event, in publish order
pub fn formed_sessions(publisher: &MockEventPublisher) -> Vec<SessionId> {
    publisher
        .events()
        .iter()
        .filter_map(|event| match event {
            EngineEvent::MatchFormed { session_id, .. } => Some(*session_id),
            _ => None,
        })
        .collect()
}

pub const DUO: [(&str, f64); 4] = [("p100", 100.0), ("p80", 80.0), ("p60", 60.0), ("p40", 40.0)];
