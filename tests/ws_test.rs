//! Integration tests for the session gateway: connection lifecycle, room
//! events, playback fan-out, signaling relay, and disconnect cleanup.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use watchroom_server::room::registry::RoomRegistry;
use watchroom_server::state::AppState;
use watchroom_server::torrent::search::SearchClient;
use watchroom_server::torrent::TorrentManager;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Start the full router on an ephemeral port.
async fn start_test_server(strict_rooms: bool) -> SocketAddr {
    let state = AppState {
        rooms: Arc::new(RoomRegistry::new(50)),
        connections: watchroom_server::ws::new_connection_registry(),
        torrents: Arc::new(TorrentManager::new(None, Duration::from_secs(3600))),
        search: Arc::new(SearchClient::new(
            "http://127.0.0.1:9/unreachable".to_string(),
            Duration::from_secs(1),
            10,
        )),
        strict_rooms,
    };
    let app = watchroom_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> WsStream {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("failed to connect websocket");
    ws
}

async fn send(ws: &mut WsStream, event: &str, data: Value) {
    let frame = json!({ "event": event, "data": data }).to_string();
    ws.send(Message::Text(frame.into())).await.unwrap();
}

/// Receive the next JSON event, failing the test after a 2s timeout.
async fn recv(ws: &mut WsStream) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Receive events until one with the given name arrives.
async fn recv_named(ws: &mut WsStream, name: &str) -> Value {
    for _ in 0..10 {
        let event = recv(ws).await;
        if event["event"] == name {
            return event["data"].clone();
        }
    }
    panic!("event {name} never arrived");
}

/// Assert no event arrives within the window (echo suppression).
async fn assert_silent(ws: &mut WsStream, window: Duration) {
    let result = tokio::time::timeout(window, ws.next()).await;
    if let Ok(Some(Ok(Message::Text(text)))) = result {
        panic!("expected silence, got: {text}");
    }
}

/// Create a room as `name`, returning (room_code, user_id).
async fn create_room(ws: &mut WsStream, name: &str) -> (String, String) {
    send(ws, "create_room", json!({ "user_name": name })).await;
    let created = recv_named(ws, "room_created").await;
    let code = created["room_code"].as_str().unwrap().to_string();
    let joined = recv_named(ws, "room_joined").await;
    let user_id = joined["user_id"].as_str().unwrap().to_string();
    (code, user_id)
}

/// Join a room as `name`, returning the joiner's user_id.
async fn join_room(ws: &mut WsStream, code: &str, name: &str) -> String {
    send(
        ws,
        "join_room",
        json!({ "room_code": code, "user_name": name }),
    )
    .await;
    let joined = recv_named(ws, "room_joined").await;
    joined["user_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn create_room_returns_code_and_snapshot() {
    let addr = start_test_server(false).await;
    let mut ws = connect(addr).await;

    send(&mut ws, "create_room", json!({ "user_name": "mia" })).await;
    let created = recv_named(&mut ws, "room_created").await;
    let code = created["room_code"].as_str().unwrap();
    assert_eq!(code.len(), 6);
    assert!(code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

    let joined = recv_named(&mut ws, "room_joined").await;
    assert_eq!(joined["room_code"], code);
    assert_eq!(joined["is_host"], true);
    assert_eq!(joined["users"].as_array().unwrap().len(), 1);
    assert!(joined["media"].is_null());
    assert_eq!(joined["chat"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn create_room_requires_a_name() {
    let addr = start_test_server(false).await;
    let mut ws = connect(addr).await;

    send(&mut ws, "create_room", json!({ "user_name": "  " })).await;
    let err = recv_named(&mut ws, "error").await;
    assert_eq!(err["message"], "name is required");
}

#[tokio::test]
async fn join_with_lowercase_code_lands_in_same_room() {
    let addr = start_test_server(false).await;
    let mut a = connect(addr).await;
    let (code, _) = create_room(&mut a, "a").await;

    let mut b = connect(addr).await;
    send(
        &mut b,
        "join_room",
        json!({ "room_code": code.to_ascii_lowercase(), "user_name": "b" }),
    )
    .await;
    let joined = recv_named(&mut b, "room_joined").await;
    assert_eq!(joined["room_code"], code);
    assert_eq!(joined["is_host"], false);
    assert_eq!(joined["users"].as_array().unwrap().len(), 2);

    // Existing member sees the arrival and the refreshed list.
    let arrival = recv_named(&mut a, "user_joined").await;
    assert_eq!(arrival["user_name"], "b");
    let update = recv_named(&mut a, "users_updated").await;
    assert_eq!(update["users"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn strict_mode_reports_unknown_rooms() {
    let addr = start_test_server(true).await;
    let mut ws = connect(addr).await;

    send(
        &mut ws,
        "join_room",
        json!({ "room_code": "ZZ99ZZ", "user_name": "mia" }),
    )
    .await;
    let err = recv_named(&mut ws, "error").await;
    assert!(err["message"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn chat_reaches_every_member_exactly_once() {
    let addr = start_test_server(false).await;
    let mut a = connect(addr).await;
    let (code, _) = create_room(&mut a, "a").await;
    let mut b = connect(addr).await;
    join_room(&mut b, &code, "b").await;
    // Drain a's join notifications.
    recv_named(&mut a, "users_updated").await;

    send(&mut a, "send_message", json!({ "message": "hello" })).await;

    let to_a = recv_named(&mut a, "new_message").await;
    assert_eq!(to_a["user_name"], "a");
    assert_eq!(to_a["message"], "hello");
    assert_eq!(to_a["is_server"], false);

    let to_b = recv_named(&mut b, "new_message").await;
    assert_eq!(to_b["message"], "hello");

    // Exactly once each: nothing further on either side.
    assert_silent(&mut a, Duration::from_millis(300)).await;
    assert_silent(&mut b, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn playback_control_is_never_echoed_to_its_originator() {
    let addr = start_test_server(false).await;
    let mut a = connect(addr).await;
    let (code, _) = create_room(&mut a, "a").await;
    let mut b = connect(addr).await;
    join_room(&mut b, &code, "b").await;
    recv_named(&mut a, "users_updated").await;

    send(
        &mut a,
        "media_control",
        json!({ "action": "change_media", "url": "http://cdn/movie.mp4", "type": "direct", "title": "movie" }),
    )
    .await;
    // change_media goes to everyone, sender included.
    let changed_a = recv_named(&mut a, "media_changed").await;
    assert_eq!(changed_a["type"], "direct");
    recv_named(&mut b, "media_changed").await;

    send(
        &mut a,
        "media_control",
        json!({ "action": "pause", "timestamp": 42.5 }),
    )
    .await;

    let paused = recv_named(&mut b, "media_pause").await;
    assert_eq!(paused["timestamp"], 42.5);
    assert_eq!(paused["user_name"], "a");

    // The originator must not receive its own pause.
    assert_silent(&mut a, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn seek_updates_the_snapshot_for_late_joiners() {
    let addr = start_test_server(false).await;
    let mut a = connect(addr).await;
    let (code, _) = create_room(&mut a, "a").await;

    send(
        &mut a,
        "media_control",
        json!({ "action": "change_media", "url": "http://cdn/movie.mp4", "type": "direct", "title": "movie" }),
    )
    .await;
    recv_named(&mut a, "media_changed").await;
    send(&mut a, "media_control", json!({ "action": "seek", "timestamp": 120.0 })).await;

    let mut b = connect(addr).await;
    send(
        &mut b,
        "join_room",
        json!({ "room_code": code, "user_name": "b" }),
    )
    .await;
    let joined = recv_named(&mut b, "room_joined").await;
    assert_eq!(joined["media"]["position_seconds"], 120.0);
    assert_eq!(joined["media"]["status"], "paused");
}

#[tokio::test]
async fn loading_and_progress_are_relayed_to_the_room() {
    let addr = start_test_server(false).await;
    let mut a = connect(addr).await;
    let (code, _) = create_room(&mut a, "a").await;
    let mut b = connect(addr).await;
    join_room(&mut b, &code, "b").await;
    recv_named(&mut a, "users_updated").await;

    send(
        &mut a,
        "media_control",
        json!({ "action": "start_loading", "type": "torrent", "title": "Big Movie" }),
    )
    .await;
    let loading = recv_named(&mut b, "media_loading").await;
    assert_eq!(loading["title"], "Big Movie");

    let status = json!({ "progress": 0.15, "streaming_ready": true });
    send(
        &mut a,
        "media_control",
        json!({ "action": "torrent_progress", "torrent_status": status }),
    )
    .await;
    let progress = recv_named(&mut b, "torrent_progress").await;
    assert_eq!(progress["torrent_status"]["progress"], 0.15);

    // Loading is transient: committed media state stays empty.
    let mut c = connect(addr).await;
    send(
        &mut c,
        "join_room",
        json!({ "room_code": code, "user_name": "c" }),
    )
    .await;
    let joined = recv_named(&mut c, "room_joined").await;
    assert!(joined["media"].is_null());
}

#[tokio::test]
async fn webrtc_signals_relay_to_the_target_only() {
    let addr = start_test_server(false).await;
    let mut a = connect(addr).await;
    let (code, a_id) = create_room(&mut a, "a").await;
    let mut b = connect(addr).await;
    let b_id = join_room(&mut b, &code, "b").await;
    recv_named(&mut a, "users_updated").await;

    let offer = json!({ "sdp": "v=0 fake-offer", "type": "offer" });
    send(
        &mut a,
        "webrtc_offer",
        json!({ "target_user_id": b_id, "payload": offer }),
    )
    .await;

    let relayed = recv_named(&mut b, "webrtc_offer").await;
    assert_eq!(relayed["from_user_id"], a_id);
    assert_eq!(relayed["from_user_name"], "a");
    assert_eq!(relayed["payload"]["sdp"], "v=0 fake-offer");

    // Pure relay: the sender hears nothing back.
    assert_silent(&mut a, Duration::from_millis(300)).await;

    // A signal to a vanished target is silently dropped.
    send(
        &mut b,
        "webrtc_answer",
        json!({ "target_user_id": uuid::Uuid::new_v4(), "payload": { "sdp": "x" } }),
    )
    .await;
    assert_silent(&mut b, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn toggling_media_flags_refreshes_the_member_list() {
    let addr = start_test_server(false).await;
    let mut a = connect(addr).await;
    let (code, _) = create_room(&mut a, "a").await;
    let mut b = connect(addr).await;
    let b_id = join_room(&mut b, &code, "b").await;
    recv_named(&mut a, "users_updated").await;

    send(&mut b, "toggle_video", json!({ "enabled": true })).await;

    let update = recv_named(&mut a, "users_updated").await;
    let member = update["users"]
        .as_array()
        .unwrap()
        .iter()
        .find(|u| u["user_id"] == b_id.as_str())
        .unwrap();
    assert_eq!(member["video_enabled"], true);
    assert_eq!(member["audio_enabled"], false);
}

#[tokio::test]
async fn disconnect_acts_as_leave_and_transfers_host() {
    let addr = start_test_server(false).await;
    let mut a = connect(addr).await;
    let (code, a_id) = create_room(&mut a, "a").await;
    let mut b = connect(addr).await;
    let b_id = join_room(&mut b, &code, "b").await;
    recv_named(&mut a, "users_updated").await;

    // Host drops without an explicit leave.
    a.close(None).await.unwrap();

    let left = recv_named(&mut b, "user_left").await;
    assert_eq!(left["user_id"], a_id);
    assert_eq!(left["new_host"], b_id.as_str());

    let update = recv_named(&mut b, "users_updated").await;
    let users = update["users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["is_host"], true);

    // Last member leaving destroys the room.
    b.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let resp = reqwest::get(format!("http://{addr}/api/room/{code}"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn room_info_endpoint_tracks_membership() {
    let addr = start_test_server(false).await;
    let mut a = connect(addr).await;
    let (code, _) = create_room(&mut a, "a").await;

    let info: Value = reqwest::get(format!("http://{addr}/api/room/{code}"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["room_code"], code);
    assert_eq!(info["user_count"], 1);
    assert_eq!(info["has_media"], false);

    let stats: Value = reqwest::get(format!("http://{addr}/api/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_rooms"], 1);
    assert_eq!(stats["total_users"], 1);
}

#[tokio::test]
async fn malformed_frames_get_an_error_without_killing_the_connection() {
    let addr = start_test_server(false).await;
    let mut ws = connect(addr).await;

    ws.send(Message::Text("this is not json".into()))
        .await
        .unwrap();
    let err = recv_named(&mut ws, "error").await;
    assert_eq!(err["message"], "invalid event payload");

    // Messaging without a room association is an error, not a crash.
    send(&mut ws, "send_message", json!({ "message": "hi" })).await;
    let err = recv_named(&mut ws, "error").await;
    assert_eq!(err["message"], "not in a room");

    // The connection is still perfectly usable.
    let (code, _) = create_room(&mut ws, "mia").await;
    assert_eq!(code.len(), 6);
}
