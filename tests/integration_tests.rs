//! Integration tests for the draft-room matchmaking engine
//!
//! These tests drive the engine through its command surface:
//! - Queueing and snake-draft formation
//! - Confirmation, results and claims
//! - Confirmation timeouts and aborts
//! - Ghost detection, substitution and cancellation
//! - Parties queueing and drafting as one unit

mod fixtures;

use chrono::Duration;
use draft_room::display::GlyphTable;
use draft_room::engine::{Command, CommandResponse, EngineState};
use draft_room::session::{AbortOutcome, ClaimOutcome};
use draft_room::types::{CancelReason, EngineEvent, Outcome, PlayerStatus, SessionState};
use draft_room::utils::current_timestamp;
use draft_room::MatchmakingError;
use proptest::prelude::*;

use fixtures::{confirm_all, formed_sessions, join, matchmaker_with, test_config, DUO};

async fn party_update(
    matchmaker: &draft_room::Matchmaker,
    command: Command,
    now: chrono::DateTime<chrono::Utc>,
) -> draft_room::party::Party {
    match matchmaker.execute_at(command, now).await.unwrap() {
        CommandResponse::PartyUpdated(party) => party,
        other => panic!("unexpected response {:?}", other),
    }
}

async fn form_party(
    matchmaker: &draft_room::Matchmaker,
    host: &str,
    members: &[&str],
    now: chrono::DateTime<chrono::Utc>,
) {
    party_update(
        matchmaker,
        Command::CreateParty {
            player_id: host.to_string(),
        },
        now,
    )
    .await;
    for member in members {
        party_update(
            matchmaker,
            Command::InviteToParty {
                host_id: host.to_string(),
                player_id: member.to_string(),
            },
            now,
        )
        .await;
        party_update(
            matchmaker,
            Command::AcceptPartyInvite {
                player_id: member.to_string(),
                host_id: host.to_string(),
            },
            now,
        )
        .await;
    }
}

fn kind(err: &anyhow::Error) -> Option<&'static str> {
    MatchmakingError::from_anyhow(err).map(|e| e.kind())
}

#[tokio::test]
async fn test_duo_snake_draft() {
    let now = current_timestamp();
    let (matchmaker, publisher) = matchmaker_with(&DUO, now);

    for (id, _) in DUO {
        join(&matchmaker, id, "duo", now).await;
    }

    let formed = formed_sessions(&publisher);
    assert_eq!(formed.len(), 1);
    let session = matchmaker.session(formed[0]).await.unwrap();
    assert_eq!(session.state, SessionState::Forming);
    assert_eq!(session.teams[0].player_ids(), vec!["p100", "p40"]);
    assert_eq!(session.teams[1].player_ids(), vec!["p80", "p60"]);
    assert_eq!(session.teams[0].rating_sum(), 140.0);
    assert_eq!(session.teams[1].rating_sum(), 140.0);

    match &publisher.events()[0] {
        EngineEvent::MatchFormed { mode, teams, .. } => {
            assert_eq!(mode, "duo");
            assert_eq!(teams[0], vec!["p100", "p40"]);
        }
        other => panic!("expected MatchFormed, got {:?}", other),
    }

    let stats = matchmaker.stats().await;
    assert_eq!(stats.in_match_players, 4);
    assert_eq!(stats.waiting_by_mode.get("duo"), Some(&0));
    matchmaker.check_invariants().await.unwrap();
}

#[tokio::test]
async fn test_session_summary_lists_teams() {
    let now = current_timestamp();
    let (matchmaker, publisher) = matchmaker_with(&DUO, now);
    for (id, _) in DUO {
        join(&matchmaker, id, "duo", now).await;
    }
    let id = formed_sessions(&publisher)[0];

    let summary = matchmaker
        .session_summary(id, GlyphTable::builtin())
        .await
        .unwrap();
    assert_eq!(summary.teams.len(), 2);
    assert_eq!(summary.teams[0].members.len(), 2);
    assert_eq!(summary.teams[1].rating_sum, 140.0);
}

#[tokio::test]
async fn test_claims_complete_session_and_update_leaderboard() {
    let now = current_timestamp();
    let (matchmaker, publisher) = matchmaker_with(&DUO, now);
    for (id, _) in DUO {
        join(&matchmaker, id, "duo", now).await;
    }
    let id = formed_sessions(&publisher)[0];
    confirm_all(&matchmaker, id, &["p100", "p80", "p60", "p40"], now).await;
    assert_eq!(
        matchmaker.session(id).await.unwrap().state,
        SessionState::Active
    );

    // Only captains may claim
    let err = matchmaker
        .execute_at(
            Command::ClaimResult {
                session_id: id,
                player_id: "p40".to_string(),
                won: true,
            },
            now,
        )
        .await
        .unwrap_err();
    assert_eq!(kind(&err), Some("invalid_state"));

    let first = matchmaker
        .execute_at(
            Command::ClaimResult {
                session_id: id,
                player_id: "p80".to_string(),
                won: true,
            },
            now,
        )
        .await
        .unwrap();
    match first {
        CommandResponse::Claimed(report) => {
            assert!(matches!(report.outcome, ClaimOutcome::Waiting { .. }));
            assert!(report.settled.is_none());
        }
        other => panic!("unexpected response {:?}", other),
    }

    let second = matchmaker
        .execute_at(
            Command::ClaimResult {
                session_id: id,
                player_id: "p100".to_string(),
                won: false,
            },
            now,
        )
        .await
        .unwrap();
    match second {
        CommandResponse::Claimed(report) => {
            assert_eq!(report.outcome, ClaimOutcome::Agreed(Outcome::Win { team: 1 }));
            assert!(report.settled.is_some());
        }
        other => panic!("unexpected response {:?}", other),
    }

    let session = matchmaker.session(id).await.unwrap();
    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.outcome, Some(Outcome::Win { team: 1 }));

    match matchmaker
        .execute_at(
            Command::Leaderboard {
                mode: "duo".to_string(),
                limit: 2,
            },
            now,
        )
        .await
        .unwrap()
    {
        CommandResponse::Leaderboard(entries) => {
            assert_eq!(entries.len(), 2);
            assert_eq!(entries[0].standing.points, 8);
            assert!(entries
                .iter()
                .all(|e| e.player_id == "p80" || e.player_id == "p60"));
        }
        other => panic!("unexpected response {:?}", other),
    }

    assert_eq!(
        publisher.event_names(),
        vec!["MatchFormed", "SessionActivated", "SessionCompleted"]
    );
    assert_eq!(matchmaker.stats().await.idle_players, 4);
}

#[tokio::test]
async fn test_session_states_only_move_forward() {
    let now = current_timestamp();
    let (matchmaker, publisher) = matchmaker_with(&DUO, now);
    for (id, _) in DUO {
        join(&matchmaker, id, "duo", now).await;
    }
    let id = formed_sessions(&publisher)[0];

    // No result before the session is active
    let err = matchmaker
        .execute_at(
            Command::ReportResult {
                session_id: id,
                outcome: Outcome::Draw,
            },
            now,
        )
        .await
        .unwrap_err();
    assert_eq!(kind(&err), Some("invalid_state"));

    confirm_all(&matchmaker, id, &["p100", "p80", "p60", "p40"], now).await;
    matchmaker
        .execute_at(
            Command::ReportResult {
                session_id: id,
                outcome: Outcome::Draw,
            },
            now,
        )
        .await
        .unwrap();

    let confirm_again = matchmaker
        .execute_at(
            Command::ConfirmReady {
                session_id: id,
                player_id: "p100".to_string(),
            },
            now,
        )
        .await
        .unwrap_err();
    assert_eq!(kind(&confirm_again), Some("invalid_state"));

    let abort_completed = matchmaker
        .execute_at(
            Command::AbortSession {
                session_id: id,
                reason: "too late".to_string(),
                requested_by: None,
            },
            now,
        )
        .await
        .unwrap_err();
    assert_eq!(kind(&abort_completed), Some("invalid_state"));
    assert_eq!(
        matchmaker.session(id).await.unwrap().state,
        SessionState::Completed
    );
}

#[tokio::test]
async fn test_confirmation_timeout_releases_members() {
    let t0 = current_timestamp();
    let (matchmaker, publisher) = matchmaker_with(&DUO, t0);
    for (id, _) in DUO {
        join(&matchmaker, id, "duo", t0).await;
    }
    let id = formed_sessions(&publisher)[0];
    confirm_all(&matchmaker, id, &["p100"], t0).await;
    assert_eq!(
        matchmaker.session(id).await.unwrap().state,
        SessionState::Confirming
    );

    let early = matchmaker.maintenance_at(t0 + Duration::seconds(59)).await;
    assert!(early.expired.is_empty());

    let report = matchmaker.maintenance_at(t0 + Duration::seconds(61)).await;
    assert_eq!(report.expired, vec![id]);

    let session = matchmaker.session(id).await.unwrap();
    assert_eq!(session.state, SessionState::Cancelled);
    assert_eq!(session.cancel_reason, Some(CancelReason::ConfirmationTimeout));
    for (player, _) in DUO {
        assert_eq!(
            matchmaker.player(player).await.unwrap().status,
            PlayerStatus::Idle
        );
    }
    assert!(publisher.events().iter().any(|e| matches!(
        e,
        EngineEvent::SessionCancelled {
            reason: CancelReason::ConfirmationTimeout,
            ..
        }
    )));
    matchmaker.check_invariants().await.unwrap();
}

#[tokio::test]
async fn test_member_abort_costs_points() {
    let now = current_timestamp();
    let (matchmaker, publisher) = matchmaker_with(&DUO, now);
    matchmaker
        .execute_at(
            Command::SetPoints {
                mode: "duo".to_string(),
                player_id: "p60".to_string(),
                points: 10,
            },
            now,
        )
        .await
        .unwrap();
    for (id, _) in DUO {
        join(&matchmaker, id, "duo", now).await;
    }
    let id = formed_sessions(&publisher)[0];
    confirm_all(&matchmaker, id, &["p100", "p80", "p60", "p40"], now).await;

    let abort = Command::AbortSession {
        session_id: id,
        reason: "rage quit".to_string(),
        requested_by: Some("p60".to_string()),
    };
    match matchmaker.execute_at(abort.clone(), now).await.unwrap() {
        CommandResponse::Aborted(AbortOutcome::Cancelled { released }) => {
            assert_eq!(released.len(), 4)
        }
        other => panic!("unexpected response {:?}", other),
    }
    // A second abort changes nothing
    match matchmaker.execute_at(abort, now).await.unwrap() {
        CommandResponse::Aborted(outcome) => assert_eq!(outcome, AbortOutcome::AlreadyCancelled),
        other => panic!("unexpected response {:?}", other),
    }

    match matchmaker
        .execute_at(
            Command::Leaderboard {
                mode: "duo".to_string(),
                limit: 10,
            },
            now,
        )
        .await
        .unwrap()
    {
        CommandResponse::Leaderboard(entries) => {
            let p60 = entries.iter().find(|e| e.player_id == "p60").unwrap();
            assert_eq!(p60.standing.points, 7);
        }
        other => panic!("unexpected response {:?}", other),
    }
}

#[tokio::test]
async fn test_ghost_is_substituted_from_queue() {
    let t0 = current_timestamp();
    let mut players = DUO.to_vec();
    players.push(("sub", 90.0));
    let (matchmaker, publisher) = matchmaker_with(&players, t0);

    for (id, _) in DUO {
        join(&matchmaker, id, "duo", t0).await;
    }
    let id = formed_sessions(&publisher)[0];
    confirm_all(&matchmaker, id, &["p100", "p80", "p60", "p40"], t0).await;

    let later = t0 + Duration::seconds(200);
    join(&matchmaker, "sub", "duo", later).await;
    for player in ["p80", "p60", "p40"] {
        matchmaker
            .execute_at(
                Command::Heartbeat {
                    player_id: player.to_string(),
                },
                later,
            )
            .await
            .unwrap();
    }

    let report = matchmaker.maintenance_at(t0 + Duration::seconds(301)).await;
    assert_eq!(report.sweep.newly_ghosted, vec![("p100".to_string(), Some(id))]);
    assert_eq!(report.sweep.substitutions.len(), 1);

    let session = matchmaker.session(id).await.unwrap();
    assert_eq!(session.state, SessionState::Active);
    assert_eq!(session.teams[0].player_ids(), vec!["sub", "p40"]);
    assert!(session.pending_substitutions.is_empty());

    assert_eq!(
        matchmaker.player("p100").await.unwrap().status,
        PlayerStatus::Ghost
    );
    assert_eq!(
        matchmaker.player("sub").await.unwrap().status,
        PlayerStatus::InMatch
    );
    let names = publisher.event_names();
    assert!(names.contains(&"PlayerGhosted"));
    assert!(names.contains(&"PlayerSubstituted"));

    // The ghost can come back once cleared
    matchmaker
        .execute_at(
            Command::ClearGhost {
                player_id: "p100".to_string(),
            },
            t0 + Duration::seconds(302),
        )
        .await
        .unwrap();
    assert_eq!(
        matchmaker.player("p100").await.unwrap().status,
        PlayerStatus::Idle
    );
    matchmaker.check_invariants().await.unwrap();
}

#[tokio::test]
async fn test_unreplaced_ghost_cancels_and_requeues() {
    let t0 = current_timestamp();
    let (matchmaker, publisher) = matchmaker_with(&DUO, t0);
    for (id, _) in DUO {
        join(&matchmaker, id, "duo", t0).await;
    }
    let id = formed_sessions(&publisher)[0];
    confirm_all(&matchmaker, id, &["p100", "p80", "p60", "p40"], t0).await;

    for player in ["p80", "p60", "p40"] {
        matchmaker
            .execute_at(
                Command::Heartbeat {
                    player_id: player.to_string(),
                },
                t0 + Duration::seconds(200),
            )
            .await
            .unwrap();
    }

    let first = matchmaker.maintenance_at(t0 + Duration::seconds(301)).await;
    assert_eq!(first.sweep.newly_ghosted.len(), 1);
    assert!(first.sweep.cancellations.is_empty());

    // Sweeping again flags nobody new
    let again = matchmaker.maintenance_at(t0 + Duration::seconds(302)).await;
    assert!(again.sweep.is_empty());

    let overdue = matchmaker.maintenance_at(t0 + Duration::seconds(362)).await;
    assert_eq!(overdue.sweep.cancellations.len(), 1);
    let cancellation = &overdue.sweep.cancellations[0];
    assert_eq!(cancellation.ghosts, vec!["p100"]);
    assert_eq!(cancellation.requeued.len(), 3);

    let session = matchmaker.session(id).await.unwrap();
    assert_eq!(session.state, SessionState::Cancelled);
    for player in ["p80", "p60", "p40"] {
        assert_eq!(
            matchmaker.player(player).await.unwrap().status,
            PlayerStatus::Queued
        );
    }
    assert_eq!(
        matchmaker.stats().await.waiting_by_mode.get("duo"),
        Some(&3)
    );
    matchmaker.check_invariants().await.unwrap();
}

#[tokio::test]
async fn test_queue_status_reports_position() {
    let now = current_timestamp();
    let (matchmaker, _publisher) = matchmaker_with(&DUO, now);
    join(&matchmaker, "p100", "duo", now).await;
    join(&matchmaker, "p80", "duo", now).await;

    match matchmaker
        .execute_at(
            Command::QueueStatus {
                player_id: Some("p80".to_string()),
            },
            now + Duration::seconds(5),
        )
        .await
        .unwrap()
    {
        CommandResponse::QueueStatus(status) => {
            assert_eq!(status.pools.get("duo"), Some(&2));
            let position = status.player.unwrap();
            assert_eq!(position.position, 2);
            assert_eq!(position.waited_seconds, 5);
            assert!(status.session.is_none());
        }
        other => panic!("unexpected response {:?}", other),
    }

    let err = matchmaker
        .execute_at(
            Command::JoinQueue {
                player_id: "p80".to_string(),
                mode: "1v1".to_string(),
            },
            now,
        )
        .await
        .unwrap_err();
    assert_eq!(kind(&err), Some("already_queued"));
}

#[tokio::test]
async fn test_party_is_drafted_onto_one_team() {
    let now = current_timestamp();
    let players = [
        ("host", 1500.0),
        ("wing", 1490.0),
        ("third", 1480.0),
        ("s1", 1400.0),
        ("s2", 1300.0),
        ("s3", 1200.0),
        ("s4", 1100.0),
        ("s5", 1000.0),
    ];
    let (matchmaker, publisher) = matchmaker_with(&players, now);
    form_party(&matchmaker, "host", &["wing", "third"], now).await;

    for id in ["s1", "s2", "s3", "s4", "s5"] {
        join(&matchmaker, id, "4v4", now).await;
    }
    let outcome = match matchmaker
        .execute_at(
            Command::JoinQueueAsParty {
                host_id: "host".to_string(),
                mode: "4v4".to_string(),
            },
            now,
        )
        .await
        .unwrap()
    {
        CommandResponse::PartyQueued(outcome) => outcome,
        other => panic!("unexpected response {:?}", other),
    };
    assert_eq!(outcome.entries.len(), 3);
    assert_eq!(outcome.formed, formed_sessions(&publisher));

    let session = matchmaker.session(outcome.formed[0]).await.unwrap();
    let party_team = session
        .teams
        .iter()
        .map(|t| t.player_ids())
        .find(|ids| ids.contains(&"host".to_string()))
        .unwrap();
    assert_eq!(party_team.len(), 4);
    for member in ["wing", "third"] {
        assert!(party_team.contains(&member.to_string()), "{} split off", member);
    }
    // the strong party is topped up with the weakest single
    assert!(party_team.contains(&"s5".to_string()));
    matchmaker.check_invariants().await.unwrap();
}

#[tokio::test]
async fn test_party_joins_and_leaves_queue_together() {
    let now = current_timestamp();
    let (matchmaker, _publisher) = matchmaker_with(&DUO, now);
    form_party(&matchmaker, "p100", &["p80"], now).await;

    let err = matchmaker
        .execute_at(
            Command::JoinQueueAsParty {
                host_id: "p80".to_string(),
                mode: "duo".to_string(),
            },
            now,
        )
        .await
        .unwrap_err();
    assert_eq!(kind(&err), Some("invalid_state"));

    matchmaker
        .execute_at(
            Command::JoinQueueAsParty {
                host_id: "p100".to_string(),
                mode: "duo".to_string(),
            },
            now,
        )
        .await
        .unwrap();
    let stats = matchmaker.stats().await;
    assert_eq!(stats.waiting_by_mode.get("duo"), Some(&2));
    assert_eq!(stats.queued_players, 2);

    match matchmaker
        .execute_at(
            Command::LeaveParty {
                player_id: "p80".to_string(),
            },
            now,
        )
        .await
        .unwrap()
    {
        CommandResponse::PartyLeft(departure) => assert_eq!(
            departure,
            draft_room::party::PartyDeparture::Left {
                host: "p100".to_string()
            }
        ),
        other => panic!("unexpected response {:?}", other),
    }
    for player in ["p100", "p80"] {
        assert_eq!(
            matchmaker.player(player).await.unwrap().status,
            PlayerStatus::Idle
        );
    }

    match matchmaker
        .execute_at(
            Command::PartyStatus {
                player_id: "p100".to_string(),
            },
            now,
        )
        .await
        .unwrap()
    {
        CommandResponse::PartyStatus(Some(party)) => {
            assert_eq!(party.members, vec!["p100".to_string()]);
            assert_eq!(party.name, "p100's Party");
        }
        other => panic!("unexpected response {:?}", other),
    }
    matchmaker.check_invariants().await.unwrap();
}

#[tokio::test]
async fn test_operator_sets_wins_and_losses() {
    let now = current_timestamp();
    let (matchmaker, _publisher) = matchmaker_with(&DUO, now);
    for command in [
        Command::SetWins {
            mode: "duo".to_string(),
            player_id: "p40".to_string(),
            wins: 11,
        },
        Command::SetLosses {
            mode: "duo".to_string(),
            player_id: "p40".to_string(),
            losses: 5,
        },
    ] {
        matchmaker.execute_at(command, now).await.unwrap();
    }

    match matchmaker
        .execute_at(
            Command::Leaderboard {
                mode: "duo".to_string(),
                limit: 1,
            },
            now,
        )
        .await
        .unwrap()
    {
        CommandResponse::Leaderboard(entries) => {
            assert_eq!(entries[0].player_id, "p40");
            assert_eq!(entries[0].standing.wins, 11);
            assert_eq!(entries[0].standing.losses, 5);
        }
        other => panic!("unexpected response {:?}", other),
    }
}

#[derive(Debug, Clone)]
enum Op {
    Join(usize, usize),
    Leave(usize),
    Confirm(usize),
    Tick(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..8usize, 0..3usize).prop_map(|(p, m)| Op::Join(p, m)),
        2 => (0..8usize).prop_map(Op::Leave),
        2 => (0..8usize).prop_map(Op::Confirm),
        1 => (1..120i64).prop_map(Op::Tick),
    ]
}

proptest! {
    #[test]
    fn prop_membership_stays_consistent(ops in prop::collection::vec(op(), 1..60)) {
        const MODES: [&str; 3] = ["1v1", "2v2", "duo"];
        let mut now = current_timestamp();
        let mut engine = EngineState::new(&test_config()).unwrap();
        let players: Vec<String> = (0..8).map(|i| format!("player_{}", i)).collect();
        for (i, id) in players.iter().enumerate() {
            engine.register(id, id, draft_room::types::PlayerType::Human, now).unwrap();
            engine
                .set_rating(id, draft_room::types::PlayerRating::new(1400.0 + (i * 25) as f64, 200.0))
                .unwrap();
        }

        for op in ops {
            match op {
                Op::Join(p, m) => {
                    let _ = engine.join(&players[p], MODES[m], now);
                }
                Op::Leave(p) => {
                    let _ = engine.leave(&players[p], now);
                }
                Op::Confirm(p) => {
                    let status = engine.queue_status(Some(&players[p]), now);
                    if let Some(session_id) = status.session {
                        let _ = engine.confirm(session_id, &players[p], now);
                    }
                }
                Op::Tick(secs) => {
                    now += Duration::seconds(secs);
                    engine.maintenance(now);
                }
            }
            prop_assert!(engine.check_invariants().is_ok());

            let stats = engine.stats();
            let waiting: usize = stats.waiting_by_mode.values().sum();
            prop_assert_eq!(waiting, stats.queued_players);
        }
    }
}
