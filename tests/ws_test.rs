//! Integration tests for WebSocket connection, in-band auth, presence,
//! typing indicators, and message dispatch against a real server instance.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsWrite = futures_util::stream::SplitSink<WsStream, Message>;
type WsRead = futures_util::stream::SplitStream<WsStream>;

/// Helper: start the server on a random port with a tempfile-backed SQLite
/// database seeded with three users. Returns (addr, db, tmp guard).
async fn start_test_server() -> (SocketAddr, skillhub_realtime::db::DbPool, tempfile::TempDir) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db = skillhub_realtime::db::init_db(tmp_dir.path().to_str().unwrap())
        .expect("Failed to init DB");

    {
        let conn = db.lock().unwrap();
        for (id, username, full_name) in [
            ("u1", "alice", "Alice Nguyen"),
            ("u2", "bob", "Bob Tran"),
            ("u3", "carol", "Carol Le"),
        ] {
            conn.execute(
                "INSERT INTO users (id, username, full_name, avatar_url, created_at)
                 VALUES (?1, ?2, ?3, NULL, ?4)",
                rusqlite::params![id, username, full_name, "2026-01-01T00:00:00Z"],
            )
            .unwrap();
        }
    }

    let state = skillhub_realtime::state::AppState::new(db.clone());
    let app = skillhub_realtime::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, db, tmp_dir)
}

async fn connect_client(addr: SocketAddr) -> (WsWrite, WsRead) {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("WebSocket connect failed");
    let (write, read) = ws.split();
    (write, read)
}

async fn send_event(write: &mut WsWrite, event: Value) {
    write
        .send(Message::Text(event.to_string()))
        .await
        .expect("WebSocket send failed");
}

/// Read until the named event arrives, skipping everything else
/// (presence replays, online announcements).
async fn await_event(read: &mut WsRead, name: &str) -> Value {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let value: Value = serde_json::from_str(&text).expect("valid JSON frame");
                if value["event"] == name {
                    return value;
                }
            }
            Ok(Some(Ok(_))) => continue,
            other => panic!("expected {name} event, got {other:?}"),
        }
    }
}

/// Assert the named event does not arrive within the window.
async fn assert_no_event(read: &mut WsRead, name: &str, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match tokio::time::timeout(remaining, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let value: Value = serde_json::from_str(&text).expect("valid JSON frame");
                assert_ne!(value["event"], name, "unexpected {name}: {value}");
            }
            _ => return,
        }
    }
}

/// Read presence updates until the expected one arrives. Authentication
/// replays the whole presence table to the new connection, so the first
/// `user_presence_updated` frame is usually a replayed entry, not the change
/// under test.
async fn await_presence_update(read: &mut WsRead, user_id: &str, status: &str) -> Value {
    loop {
        let updated = await_event(read, "user_presence_updated").await;
        if updated["data"]["userId"] == user_id && updated["data"]["status"] == status {
            return updated;
        }
    }
}

async fn login(write: &mut WsWrite, read: &mut WsRead, user_id: &str) -> Value {
    send_event(
        write,
        json!({"event": "authenticate", "data": {"userId": user_id, "token": "session-token"}}),
    )
    .await;
    await_event(read, "authenticated").await
}

#[tokio::test]
async fn authenticate_echoes_identity_and_presence_shows_online() {
    let (addr, _db, _tmp) = start_test_server().await;
    let (mut write, mut read) = connect_client(addr).await;

    let authed = login(&mut write, &mut read, "u1").await;
    assert_eq!(authed["data"]["user"]["username"], "alice");
    assert_eq!(authed["data"]["user"]["fullName"], "Alice Nguyen");

    let client = reqwest::Client::new();
    let health: Value = client
        .get(format!("http://{addr}/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let presence: Vec<Value> = client
        .get(format!("http://{addr}/api/presence"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(presence
        .iter()
        .any(|p| p["userId"] == "u1" && p["status"] == "online"));
}

#[tokio::test]
async fn auth_failures_are_reported_and_recoverable() {
    let (addr, _db, _tmp) = start_test_server().await;
    let (mut write, mut read) = connect_client(addr).await;

    // Unknown identity
    send_event(
        &mut write,
        json!({"event": "authenticate", "data": {"userId": "nobody", "token": "t"}}),
    )
    .await;
    let err = await_event(&mut read, "auth_error").await;
    assert!(err["data"]["message"].as_str().unwrap().contains("unknown user"));

    // Missing token
    send_event(
        &mut write,
        json!({"event": "authenticate", "data": {"userId": "u1", "token": ""}}),
    )
    .await;
    await_event(&mut read, "auth_error").await;

    // The transport stays open: the client may retry and succeed
    let authed = login(&mut write, &mut read, "u1").await;
    assert_eq!(authed["data"]["user"]["username"], "alice");
}

#[tokio::test]
async fn events_before_authentication_are_rejected() {
    let (addr, _db, _tmp) = start_test_server().await;
    let (mut write, mut read) = connect_client(addr).await;

    send_event(&mut write, json!({"event": "join_room", "data": {"roomId": "conversation:c1"}}))
        .await;
    let err = await_event(&mut read, "error").await;
    assert_eq!(err["data"]["message"], "not authenticated");
}

#[tokio::test]
async fn joining_a_foreign_user_room_is_forbidden() {
    let (addr, _db, _tmp) = start_test_server().await;
    let (mut write, mut read) = connect_client(addr).await;
    login(&mut write, &mut read, "u1").await;

    send_event(&mut write, json!({"event": "join_room", "data": {"roomId": "user:u2"}})).await;
    let err = await_event(&mut read, "error").await;
    assert!(err["data"]["message"].as_str().unwrap().contains("forbidden"));
}

#[tokio::test]
async fn message_to_offline_receiver_is_persisted_and_delivered_to_the_room() {
    let (addr, db, _tmp) = start_test_server().await;

    // u1 authenticates and joins the conversation; u2 is not connected
    let (mut write, mut read) = connect_client(addr).await;
    login(&mut write, &mut read, "u1").await;
    send_event(&mut write, json!({"event": "join_room", "data": {"roomId": "conversation:c1"}}))
        .await;

    send_event(
        &mut write,
        json!({"event": "send_message", "data": {
            "content": "hi",
            "senderId": "u1",
            "receiverId": "u2",
            "conversationId": "c1",
        }}),
    )
    .await;

    let msg = await_event(&mut read, "new_message").await;
    assert_eq!(msg["data"]["content"], "hi");
    assert_eq!(msg["data"]["conversationId"], "c1");
    assert_eq!(msg["data"]["sender"]["fullName"], "Alice Nguyen");

    // Persist preceded publish: the row is already durable
    let count: i64 = db
        .lock()
        .unwrap()
        .query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = 'c1' AND content = 'hi'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn receiver_outside_the_conversation_gets_a_fallback_alert() {
    let (addr, _db, _tmp) = start_test_server().await;

    let (mut u1_write, mut u1_read) = connect_client(addr).await;
    login(&mut u1_write, &mut u1_read, "u1").await;
    send_event(&mut u1_write, json!({"event": "join_room", "data": {"roomId": "conversation:c2"}}))
        .await;

    // u2 is connected (and in their own inbox room) but not in the conversation
    let (mut u2_write, mut u2_read) = connect_client(addr).await;
    login(&mut u2_write, &mut u2_read, "u2").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    send_event(
        &mut u1_write,
        json!({"event": "send_message", "data": {
            "content": "are you around?",
            "senderId": "u1",
            "receiverId": "u2",
            "conversationId": "c2",
        }}),
    )
    .await;

    let alert = await_event(&mut u2_read, "message_notification").await;
    assert_eq!(alert["data"]["type"], "new_message");
    assert!(alert["data"]["title"]
        .as_str()
        .unwrap()
        .contains("Alice Nguyen"));
    assert_eq!(alert["data"]["data"]["conversationId"], "c2");
}

#[tokio::test]
async fn multi_tab_disconnect_broadcasts_offline_exactly_once() {
    let (addr, _db, _tmp) = start_test_server().await;

    // Observer
    let (mut obs_write, mut obs_read) = connect_client(addr).await;
    login(&mut obs_write, &mut obs_read, "u1").await;

    // Two tabs for u3
    let (mut tab_a_write, mut tab_a_read) = connect_client(addr).await;
    login(&mut tab_a_write, &mut tab_a_read, "u3").await;
    let (mut tab_b_write, mut tab_b_read) = connect_client(addr).await;
    login(&mut tab_b_write, &mut tab_b_read, "u3").await;

    // First tab closes: u3 still has a live connection, no offline broadcast
    drop(tab_a_write);
    drop(tab_a_read);
    assert_no_event(&mut obs_read, "user_offline", Duration::from_millis(400)).await;

    // Last tab closes: exactly one offline broadcast
    drop(tab_b_write);
    drop(tab_b_read);
    let offline = await_event(&mut obs_read, "user_offline").await;
    assert_eq!(offline["data"]["userId"], "u3");
    assert_no_event(&mut obs_read, "user_offline", Duration::from_millis(300)).await;
}

#[tokio::test]
async fn reauthenticating_switches_accounts_cleanly() {
    let (addr, _db, _tmp) = start_test_server().await;

    let (mut obs_write, mut obs_read) = connect_client(addr).await;
    login(&mut obs_write, &mut obs_read, "u3").await;

    // Same transport logs in as u1, then switches to u2
    let (mut write, mut read) = connect_client(addr).await;
    login(&mut write, &mut read, "u1").await;
    login(&mut write, &mut read, "u2").await;

    // u1 lost its only connection and goes offline
    let offline = await_event(&mut obs_read, "user_offline").await;
    assert_eq!(offline["data"]["userId"], "u1");

    // Inbox traffic for the old account no longer reaches this connection
    send_event(
        &mut obs_write,
        json!({"event": "send_notification", "data": {
            "userId": "u1",
            "type": "like",
            "title": "Someone liked your project",
            "message": "nice work",
        }}),
    )
    .await;
    assert_no_event(&mut read, "notification", Duration::from_millis(400)).await;
}

#[tokio::test]
async fn typing_indicators_reach_conversation_members() {
    let (addr, _db, _tmp) = start_test_server().await;

    let (mut u1_write, mut u1_read) = connect_client(addr).await;
    login(&mut u1_write, &mut u1_read, "u1").await;
    send_event(&mut u1_write, json!({"event": "join_room", "data": {"roomId": "conversation:c9"}}))
        .await;

    let (mut u2_write, mut u2_read) = connect_client(addr).await;
    login(&mut u2_write, &mut u2_read, "u2").await;
    send_event(&mut u2_write, json!({"event": "join_room", "data": {"roomId": "conversation:c9"}}))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    send_event(
        &mut u1_write,
        json!({"event": "typing_start", "data": {"conversationId": "c9", "userId": "u1"}}),
    )
    .await;
    let typing = await_event(&mut u2_read, "user_typing").await;
    assert_eq!(typing["data"]["isTyping"], true);
    assert_eq!(typing["data"]["userId"], "u1");
    assert_eq!(typing["data"]["user"]["username"], "alice");

    send_event(
        &mut u1_write,
        json!({"event": "typing_stop", "data": {"conversationId": "c9", "userId": "u1"}}),
    )
    .await;
    let typing = await_event(&mut u2_read, "user_typing").await;
    assert_eq!(typing["data"]["isTyping"], false);
}

#[tokio::test]
async fn presence_updates_fan_out_to_shared_rooms() {
    let (addr, _db, _tmp) = start_test_server().await;

    let (mut u1_write, mut u1_read) = connect_client(addr).await;
    login(&mut u1_write, &mut u1_read, "u1").await;
    send_event(&mut u1_write, json!({"event": "join_room", "data": {"roomId": "conversation:c3"}}))
        .await;

    let (mut u2_write, mut u2_read) = connect_client(addr).await;
    login(&mut u2_write, &mut u2_read, "u2").await;
    send_event(&mut u2_write, json!({"event": "join_room", "data": {"roomId": "conversation:c3"}}))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    send_event(
        &mut u1_write,
        json!({"event": "update_presence", "data": {"status": "busy"}}),
    )
    .await;

    let updated = await_presence_update(&mut u2_read, "u1", "busy").await;
    assert!(updated["data"]["lastSeen"].is_string());
}

#[tokio::test]
async fn like_counters_are_broadcast_to_every_client() {
    let (addr, _db, _tmp) = start_test_server().await;

    let (mut u1_write, mut u1_read) = connect_client(addr).await;
    login(&mut u1_write, &mut u1_read, "u1").await;

    // u2 joined no rooms at all; counter syncs are global
    let (mut u2_write, mut u2_read) = connect_client(addr).await;
    login(&mut u2_write, &mut u2_read, "u2").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    send_event(
        &mut u1_write,
        json!({"event": "project_liked", "data": {"projectId": "p1", "userId": "u1", "likesCount": 12}}),
    )
    .await;

    let updated = await_event(&mut u2_read, "project_updated").await;
    assert_eq!(updated["data"]["projectId"], "p1");
    assert_eq!(updated["data"]["likesCount"], 12);
}

#[tokio::test]
async fn follower_notification_lands_in_the_followed_inbox() {
    let (addr, db, _tmp) = start_test_server().await;

    let (mut u1_write, mut u1_read) = connect_client(addr).await;
    login(&mut u1_write, &mut u1_read, "u1").await;

    let (mut u2_write, mut u2_read) = connect_client(addr).await;
    login(&mut u2_write, &mut u2_read, "u2").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    send_event(
        &mut u1_write,
        json!({"event": "new_follower", "data": {"followerId": "u1", "followedId": "u2"}}),
    )
    .await;

    let notification = await_event(&mut u2_read, "notification").await;
    assert_eq!(notification["data"]["type"], "follow");
    assert!(notification["data"]["message"]
        .as_str()
        .unwrap()
        .contains("Alice Nguyen"));

    let count: i64 = db
        .lock()
        .unwrap()
        .query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = 'u2' AND type = 'follow'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, 1);
}
