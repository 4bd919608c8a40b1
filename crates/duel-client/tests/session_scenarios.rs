//! End-to-end session scenarios over the in-memory transport and API.

use duel_client::testing::{MockDuelApi, MockTransportFactory, MockTransportHandle};
use duel_client::{
    ClientConfig, ConnectionState, DuelApi, DuelSession, Identity, Route, TransportFactory, UiEvent,
};
use duel_proto::{Duel, SupportedLanguage};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn config(tmp: &TempDir) -> ClientConfig {
    ClientConfig {
        scratch_dir: tmp.path().to_path_buf(),
        ..ClientConfig::default()
    }
}

fn identity() -> Identity {
    Identity {
        user_id: "u1".to_string(),
        token: "tok".to_string(),
    }
}

fn python() -> SupportedLanguage {
    SupportedLanguage {
        id: "python".to_string(),
        name: "Python".to_string(),
        extension: ".py".to_string(),
        supports_classes: true,
    }
}

fn duel_json(id: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "status": status,
        "player_one_id": "u1",
        "player_two_id": "ai",
        "created_at": "2026-02-01T10:00:00Z",
        "started_at": null,
        "finished_at": null,
        "problem": null,
        "results": null
    })
}

fn duel(id: &str, status: &str) -> Duel {
    serde_json::from_value(duel_json(id, status)).unwrap()
}

fn duel_with_problem(id: &str, status: &str, started_at: Option<String>) -> Duel {
    let mut value = duel_json(id, status);
    value["started_at"] = json!(started_at);
    value["problem"] = json!({
        "id": "p1",
        "title": "Two Sum",
        "description": "Find two numbers adding to a target.",
        "difficulty": "easy",
        "starter_code": {"python": "def solve():\n    pass\n"},
        "test_cases": []
    });
    serde_json::from_value(value).unwrap()
}

struct Harness {
    _tmp: TempDir,
    session: DuelSession,
    ui_rx: mpsc::UnboundedReceiver<UiEvent>,
    api: Arc<MockDuelApi>,
    factory: Arc<MockTransportFactory>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness() -> Harness {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let api = Arc::new(MockDuelApi::new());
    api.set_languages(vec![python()]);
    let factory = Arc::new(MockTransportFactory::new());
    let (session, ui_rx) = DuelSession::with_components(
        config(&tmp),
        Some(identity()),
        Arc::clone(&api) as Arc<dyn DuelApi>,
        Arc::clone(&factory) as Arc<dyn TransportFactory>,
    );
    Harness {
        _tmp: tmp,
        session,
        ui_rx,
        api,
        factory,
    }
}

/// Lets spawned tasks run; paused-clock sleeps auto-advance.
async fn settle() {
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..5_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

fn drain(ui_rx: &mut mpsc::UnboundedReceiver<UiEvent>) -> Vec<UiEvent> {
    let mut events = Vec::new();
    while let Ok(event) = ui_rx.try_recv() {
        events.push(event);
    }
    events
}

async fn connected_harness(duel: Duel) -> (Harness, MockTransportHandle) {
    let h = harness();
    h.api.set_duel(duel.clone());
    let handle = h.factory.queue_transport();
    h.session.connect(&duel.id).await.unwrap();
    settle().await;
    (h, handle)
}

#[tokio::test(start_paused = true)]
async fn test_connect_requires_identity() {
    let tmp = TempDir::new().unwrap();
    let api: Arc<dyn DuelApi> = Arc::new(MockDuelApi::new());
    let factory: Arc<dyn TransportFactory> = Arc::new(MockTransportFactory::new());
    let (session, mut ui_rx) = DuelSession::with_components(config(&tmp), None, api, factory);

    assert!(session.connect("d1").await.is_err());
    assert_eq!(session.connection_state(), ConnectionState::Closed);
    assert!(drain(&mut ui_rx)
        .iter()
        .any(|e| matches!(e, UiEvent::Notify { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_connect_fetches_snapshot_and_derives_language() {
    let duel = duel_with_problem("d1", "in_progress", Some("2026-02-01T10:01:00Z".to_string()));
    let (h, _handle) = connected_harness(duel).await;

    assert_eq!(h.session.connection_state(), ConnectionState::Open);
    assert_eq!(h.session.duel().unwrap().id, "d1");
    assert_eq!(h.session.language().unwrap().id, "python");
    assert!(h
        .factory
        .connected_urls()
        .iter()
        .any(|url| url.contains("/api/v1/duels/ws/d1?token=tok")));
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_clock_tracks_wall_time_from_start() {
    let started = (chrono::Utc::now() - chrono::Duration::seconds(65)).to_rfc3339();
    let duel = duel_with_problem("d1", "in_progress", Some(started));
    let (h, _handle) = connected_harness(duel).await;

    // Give the one-second clock a couple of ticks.
    tokio::time::sleep(Duration::from_secs(3)).await;
    settle().await;
    assert!(h.session.elapsed_seconds() >= 65);
}

#[tokio::test(start_paused = true)]
async fn test_ping_gets_exactly_one_pong_and_none_after_close() {
    let (h, handle) = connected_harness(duel("d1", "in_progress")).await;

    handle.push_json(json!({"type": "ping", "data": {"timestamp": 4242}}));
    settle().await;

    let pongs: Vec<_> = handle
        .sent_json()
        .into_iter()
        .filter(|m| m["type"] == "pong")
        .collect();
    assert_eq!(pongs.len(), 1);
    assert_eq!(pongs[0]["data"]["timestamp"], 4242);

    h.session.disconnect();
    settle().await;
    handle.push_json(json!({"type": "ping", "data": {"timestamp": 4343}}));
    settle().await;

    let pongs_after = handle
        .sent_json()
        .into_iter()
        .filter(|m| m["type"] == "pong")
        .count();
    assert_eq!(pongs_after, 1);
}

#[tokio::test(start_paused = true)]
async fn test_opponent_code_chunks_append_and_persist() {
    let (h, handle) = connected_harness(duel("d1", "in_progress")).await;

    handle.push_json(json!({"type": "ai_progress", "data": {"code_chunk": "def f(x):"}}));
    settle().await;
    handle.push_json(json!({"type": "ai_progress", "data": {"code_chunk": "def f(x):"}}));
    settle().await;

    assert_eq!(h.session.opponent_code(), "def f(x):def f(x):");
    assert!(h.session.opponent_typing());

    // The buffer survives in scratch under this duel's key.
    let store = duel_client::ScratchStore::new(h._tmp.path());
    let keys = duel_client::ScratchKeys::new("d1", Some("u1"));
    assert_eq!(store.load_ai_code(&keys).as_deref(), Some("def f(x):def f(x):"));
}

#[tokio::test(start_paused = true)]
async fn test_over_deletion_empties_buffer_without_error() {
    let (h, handle) = connected_harness(duel("d1", "in_progress")).await;

    handle.push_json(json!({"type": "ai_progress", "data": {"code_chunk": "abc"}}));
    settle().await;
    handle.push_json(json!({"type": "ai_delete", "data": {"char_count": 50}}));
    settle().await;

    assert_eq!(h.session.opponent_code(), "");
    assert_eq!(h.session.connection_state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_own_code_update_echo_is_ignored() {
    let (h, handle) = connected_harness(duel("d1", "waiting")).await;

    handle.push_json(json!({"type": "code_update", "data": {"sender_id": "u1", "code": "mine"}}));
    settle().await;
    assert_eq!(h.session.opponent_code(), "");

    handle.push_json(json!({"type": "code_update", "data": {"sender_id": "u2", "code": "theirs"}}));
    settle().await;
    assert_eq!(h.session.opponent_code(), "theirs");
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_ai_script_does_not_reset_substantial_buffer() {
    let (h, handle) = connected_harness(duel("d1", "in_progress")).await;

    let script = json!([
        {"action": "type", "content": "x".repeat(60), "speed": 10.0},
        {"action": "pause", "duration": 0.1}
    ]);
    handle.push_json(json!({"type": "ai_coding_process", "data": {"process": script.clone()}}));
    wait_for(|| h.session.opponent_progress() >= 100.0).await;
    assert_eq!(h.session.opponent_code().len(), 60);

    // Reconnect-style re-broadcast of the same script: no reset.
    handle.push_json(json!({"type": "ai_coding_process", "data": {"process": script}}));
    settle().await;
    assert_eq!(h.session.opponent_code().len(), 60);
    assert_eq!(h.session.opponent_progress(), 100.0);
}

#[tokio::test(start_paused = true)]
async fn test_new_ai_script_over_substantial_buffer_keeps_progress() {
    let (h, handle) = connected_harness(duel("d1", "in_progress")).await;

    let first = json!([{"action": "type", "content": "a".repeat(60), "speed": 10.0}]);
    handle.push_json(json!({"type": "ai_coding_process", "data": {"process": first}}));
    wait_for(|| h.session.opponent_progress() >= 100.0).await;
    assert_eq!(h.session.opponent_code(), "a".repeat(60));

    // A different script arriving after 60 visible chars must not throw
    // the buffer away, even though it is not a duplicate.
    let second = json!([
        {"action": "type", "content": "b".repeat(10), "speed": 10.0},
        {"action": "delete", "char_count": 4}
    ]);
    handle.push_json(json!({"type": "ai_coding_process", "data": {"process": second}}));
    settle().await;
    assert_eq!(h.session.opponent_code(), "a".repeat(60));
    assert_eq!(h.session.opponent_progress(), 100.0);
}

#[tokio::test(start_paused = true)]
async fn test_new_ai_script_over_trivial_buffer_restarts_animation() {
    let (h, handle) = connected_harness(duel("d1", "in_progress")).await;

    let first = json!([{"action": "type", "content": "a".repeat(10), "speed": 10.0}]);
    handle.push_json(json!({"type": "ai_coding_process", "data": {"process": first}}));
    wait_for(|| h.session.opponent_progress() >= 100.0).await;
    assert_eq!(h.session.opponent_code(), "a".repeat(10));

    let second = json!([
        {"action": "type", "content": "b".repeat(10), "speed": 10.0},
        {"action": "delete", "char_count": 4}
    ]);
    handle.push_json(json!({"type": "ai_coding_process", "data": {"process": second}}));
    wait_for(|| {
        h.session.opponent_code() == "b".repeat(6) && h.session.opponent_progress() >= 100.0
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_duel_end_clears_scratch_and_navigates() {
    let (mut h, handle) = connected_harness(duel("d1", "in_progress")).await;

    handle.push_json(json!({"type": "ai_progress", "data": {"code_chunk": "abc", "progress": 30.0}}));
    settle().await;
    let store = duel_client::ScratchStore::new(h._tmp.path());
    let keys = duel_client::ScratchKeys::new("d1", Some("u1"));
    assert!(store.has_any(&keys));

    handle.push_json(json!({"type": "duel_end", "data": {
        "is_timeout": false,
        "results": {
            "winner_id": "u1",
            "player_one": {"player_id": "u1", "score": 100.0, "time_taken_seconds": 42.0},
            "player_two": null,
            "is_ai_duel": true
        }
    }}));
    wait_for(|| h.session.connection_state() == ConnectionState::Closed).await;

    assert!(!store.has_any(&keys));
    assert_eq!(h.session.results().unwrap().winner_id.as_deref(), Some("u1"));
    assert!(h.session.duel().unwrap().status.is_terminal());
    assert!(handle.is_closed());
    let events = drain(&mut h.ui_rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, UiEvent::Navigate(Route::Completion(id)) if id == "d1")));

    // A clean server-side end must not read as a lost connection.
    assert!(h.session.last_error().is_none());

    // Disconnect after the fact stays a no-op.
    h.session.disconnect();
    h.session.disconnect();
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_resumes_persisted_opponent_buffer() {
    let tmp = TempDir::new().unwrap();
    let store = duel_client::ScratchStore::new(tmp.path());
    let keys = duel_client::ScratchKeys::new("d1", Some("u1"));
    store.save_ai_code(&keys, "resumed buffer").unwrap();
    store.save_progress(&keys, 100.0).unwrap();

    let api = Arc::new(MockDuelApi::new());
    api.set_duel(duel("d1", "in_progress"));
    let factory = Arc::new(MockTransportFactory::new());
    let (session, _ui_rx) = DuelSession::with_components(
        config(&tmp),
        Some(identity()),
        Arc::clone(&api) as Arc<dyn DuelApi>,
        Arc::clone(&factory) as Arc<dyn TransportFactory>,
    );
    let _handle = factory.queue_transport();
    session.connect("d1").await.unwrap();
    settle().await;

    assert_eq!(session.opponent_code(), "resumed buffer");
    assert_eq!(session.opponent_progress(), 100.0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_snapshot_failure_after_disconnect_is_silent() {
    let mut h = harness();
    // No duel registered with the API, so the snapshot fetch will fail;
    // the disconnect lands before the fetch task gets to run.
    let _handle = h.factory.queue_transport();
    h.session.connect("d1").await.unwrap();
    h.session.disconnect();
    settle().await;

    assert!(!drain(&mut h.ui_rx).iter().any(
        |e| matches!(e, UiEvent::Notify { message, .. } if message.contains("Failed to load duel"))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_message_type_keeps_channel_alive() {
    let (h, handle) = connected_harness(duel("d1", "in_progress")).await;

    handle.push_json(json!({"type": "confetti_cannon", "data": {"volume": 11}}));
    handle.push_text("not even json");
    settle().await;

    assert_eq!(h.session.connection_state(), ConnectionState::Open);
    handle.push_json(json!({"type": "ping", "data": {"timestamp": 1}}));
    settle().await;
    assert!(handle.sent_json().iter().any(|m| m["type"] == "pong"));
}

#[tokio::test(start_paused = true)]
async fn test_server_error_event_tears_down_with_notice() {
    let (mut h, handle) = connected_harness(duel("d1", "in_progress")).await;

    handle.push_json(json!({"type": "error", "data": {"message": "room is full"}}));
    wait_for(|| h.session.connection_state() == ConnectionState::Closed).await;

    assert_eq!(h.session.last_error().as_deref(), Some("room is full"));
    assert!(drain(&mut h.ui_rx).iter().any(
        |e| matches!(e, UiEvent::Notify { message, .. } if message.contains("room is full"))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unclean_close_notifies_connection_lost() {
    let (mut h, handle) = connected_harness(duel("d1", "in_progress")).await;

    handle.fail("connection reset by peer");
    wait_for(|| h.session.connection_state() == ConnectionState::Closed).await;

    assert_eq!(h.session.last_error().as_deref(), Some("Connection to duel lost"));
    assert!(drain(&mut h.ui_rx)
        .iter()
        .any(|e| matches!(e, UiEvent::Notify { message, .. } if message.contains("lost"))));
}

#[tokio::test(start_paused = true)]
async fn test_match_found_reconnects_to_new_duel() {
    let h = harness();
    h.api.set_duel(duel("d1", "waiting"));
    h.api.set_duel(duel("d2", "waiting"));
    let first = h.factory.queue_transport();
    let _second = h.factory.queue_transport();

    h.session.connect("d1").await.unwrap();
    settle().await;
    first.push_json(json!({"type": "match_found", "data": {"duel_id": "d2"}}));
    wait_for(|| h.session.duel().is_some_and(|d| d.id == "d2")).await;

    assert_eq!(h.session.connection_state(), ConnectionState::Open);
    assert!(h
        .factory
        .connected_urls()
        .iter()
        .any(|url| url.contains("/duels/ws/d2")));
    // The d1 channel ended without a "connection lost" complaint.
    assert!(h.session.last_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_run_tests_publishes_adapted_result() {
    let (mut h, _handle) = connected_harness(duel_with_problem(
        "d1",
        "in_progress",
        Some("2026-02-01T10:01:00Z".to_string()),
    ))
    .await;

    h.api.set_test_response(
        serde_json::from_value(json!({
            "success": false,
            "passed_tests": 2,
            "total_tests": 3,
            "results": [{"test_number": 3, "passed": false, "message": "off by one"}]
        }))
        .unwrap(),
    );

    h.session.run_tests("print(1)").await.unwrap();
    let result = h.session.submission_result().unwrap();
    assert!(!result.is_correct);
    assert_eq!((result.passed, result.total), (2, 3));
    assert!(drain(&mut h.ui_rx)
        .iter()
        .any(|e| matches!(e, UiEvent::SubmissionResult(_))));
    assert!(!h.session.is_loading());
}

#[tokio::test(start_paused = true)]
async fn test_submission_requires_a_language() {
    let (h, _handle) = connected_harness(duel("d1", "in_progress")).await;
    // No problem, so no derived language.
    assert!(h.session.submit_solution("code").await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_matchmaking_poll_navigates_on_assignment() {
    let mut h = harness();
    h.session.start_polling_for_duel("u1");
    settle().await;
    assert!(drain(&mut h.ui_rx).is_empty());

    h.api.set_active(Some(duel("d9", "waiting")));
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;

    assert!(drain(&mut h.ui_rx)
        .iter()
        .any(|e| matches!(e, UiEvent::Navigate(Route::Arena(id)) if id == "d9")));
}

#[tokio::test(start_paused = true)]
async fn test_generation_status_surfaces_and_ai_warmup_notice() {
    let (mut h, handle) = connected_harness(duel("d1", "generating_problem")).await;

    handle.push_json(json!({"type": "generation_status",
        "data": {"status": "Generating problem...", "stage": "starting_ai"}}));
    settle().await;

    assert_eq!(
        h.session.generation_status().as_deref(),
        Some("Generating problem...")
    );
    assert!(drain(&mut h.ui_rx)
        .iter()
        .any(|e| matches!(e, UiEvent::Notify { message, .. } if message.contains("warming up"))));
}
