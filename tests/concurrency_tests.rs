//! Concurrency tests for the matchmaker handle
//!
//! Many tasks share clones of one matchmaker; every command runs under the
//! engine lock, so memberships must stay exclusive no matter the
//! interleaving.

mod fixtures;

use draft_room::backup::{BackupController, InMemorySnapshotStore, RestoreOutcome, SnapshotStore};
use draft_room::config::BackupSettings;
use draft_room::engine::{Command, Matchmaker};
use draft_room::events::MockEventPublisher;
use draft_room::types::{EngineEvent, PlayerType};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fixtures::test_config;

fn matchmaker() -> (Matchmaker, Arc<MockEventPublisher>) {
    let publisher = Arc::new(MockEventPublisher::new());
    let matchmaker = Matchmaker::new(&test_config(), publisher.clone()).unwrap();
    (matchmaker, publisher)
}

async fn register_and_join(matchmaker: Matchmaker, player_id: String, mode: &'static str) {
    matchmaker
        .execute(Command::Register {
            player_id: player_id.clone(),
            display_name: player_id.clone(),
            player_type: PlayerType::Human,
        })
        .await
        .unwrap();
    matchmaker
        .execute(Command::JoinQueue {
            player_id,
            mode: mode.to_string(),
        })
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_form_disjoint_sessions() {
    let (matchmaker, publisher) = matchmaker();
    let players = 80;

    let start = Instant::now();
    let handles: Vec<_> = (0..players)
        .map(|i| {
            tokio::spawn(register_and_join(
                matchmaker.clone(),
                format!("load_test_player_{}", i),
                "2v2",
            ))
        })
        .collect();
    for result in join_all(handles).await {
        result.unwrap();
    }
    let elapsed = start.elapsed();
    println!("{} concurrent joins took {:?}", players, elapsed);
    assert!(elapsed < Duration::from_secs(5));

    let mut seen = HashSet::new();
    let mut formed = 0;
    for event in publisher.events() {
        if let EngineEvent::MatchFormed { teams, .. } = event {
            formed += 1;
            for player in teams.into_iter().flatten() {
                assert!(seen.insert(player.clone()), "{} drafted twice", player);
            }
        }
    }
    assert_eq!(formed, players / 4);
    assert_eq!(seen.len(), players);

    let stats = matchmaker.stats().await;
    assert_eq!(stats.in_match_players, players);
    assert_eq!(stats.queued_players, 0);
    assert_eq!(stats.sessions.forming, players / 4);
    matchmaker.check_invariants().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_join_and_leave() {
    let (matchmaker, _publisher) = matchmaker();
    for i in 0..20 {
        register_and_join(matchmaker.clone(), format!("racer_{}", i), "4v4").await;
    }

    let handles: Vec<_> = (0..20)
        .flat_map(|i| {
            let leaver = matchmaker.clone();
            let rejoiner = matchmaker.clone();
            let player_id = format!("racer_{}", i);
            let other_id = player_id.clone();
            [
                tokio::spawn(async move {
                    let _ = leaver.execute(Command::LeaveQueue { player_id }).await;
                }),
                tokio::spawn(async move {
                    let _ = rejoiner
                        .execute(Command::JoinQueue {
                            player_id: other_id,
                            mode: "2v2".to_string(),
                        })
                        .await;
                }),
            ]
        })
        .collect();
    for result in join_all(handles).await {
        result.unwrap();
    }

    let stats = matchmaker.stats().await;
    let waiting: usize = stats.waiting_by_mode.values().sum();
    assert_eq!(waiting, stats.queued_players);
    assert_eq!(
        stats.idle_players + stats.queued_players + stats.in_match_players,
        20
    );
    matchmaker.check_invariants().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshot_during_load_is_consistent() {
    let (matchmaker, _publisher) = matchmaker();
    let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
    let controller = Arc::new(BackupController::new(
        store.clone(),
        &BackupSettings::default(),
    ));

    let joins: Vec<_> = (0..60)
        .map(|i| tokio::spawn(register_and_join(matchmaker.clone(), format!("p{}", i), "duo")))
        .collect();
    let snapshots: Vec<_> = (0..5)
        .map(|_| {
            let controller = controller.clone();
            let matchmaker = matchmaker.clone();
            tokio::spawn(async move {
                controller.snapshot(&matchmaker).await.unwrap();
                matchmaker.run_maintenance().await;
            })
        })
        .collect();

    for result in join_all(joins.into_iter().chain(snapshots)).await {
        result.unwrap();
    }

    // Every snapshot taken mid-load restores into a consistent engine
    for version in 1..=5 {
        let (restored, _) = self::matchmaker();
        let report = controller
            .restore_version(&restored, version)
            .await
            .unwrap();
        assert_eq!(report.repaired_statuses, 0);
        assert_eq!(report.dropped_entries, 0);
        restored.check_invariants().await.unwrap();
    }

    let (latest, _) = self::matchmaker();
    assert!(matches!(
        controller.restore(&latest).await,
        RestoreOutcome::Restored { version: 5, .. }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshot_versions_follow_state_order() {
    let (matchmaker, _publisher) = matchmaker();
    let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
    let controller = Arc::new(BackupController::new(
        store,
        &BackupSettings {
            retention_count: 64,
            ..BackupSettings::default()
        },
    ));

    let handles: Vec<_> = (0..30)
        .map(|i| {
            let controller = controller.clone();
            let matchmaker = matchmaker.clone();
            tokio::spawn(async move {
                matchmaker
                    .execute(Command::Register {
                        player_id: format!("late_{}", i),
                        display_name: format!("late_{}", i),
                        player_type: PlayerType::Human,
                    })
                    .await
                    .unwrap();
                controller.snapshot(&matchmaker).await.unwrap();
            })
        })
        .collect();
    for result in join_all(handles).await {
        result.unwrap();
    }

    // Registrations only grow the registry, so newer versions never hold fewer players
    let mut previous = 0;
    for version in 1..=30 {
        let snapshot = controller.load_version(version).await.unwrap();
        let players = snapshot.state.players.len();
        assert!(
            players >= previous,
            "v{} holds {} players, an earlier version held {}",
            version,
            players,
            previous
        );
        previous = players;
    }
    assert_eq!(previous, 30);
}
