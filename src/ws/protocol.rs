//! Wire protocol for the session gateway: JSON text frames shaped
//! `{"event": "...", "data": {...}}`, plus the dispatch from decoded
//! events into room state machine operations and resulting fan-out.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::room::model::{ChatMessage, MediaKind, MediaState, Member};
use crate::room::registry::{MemberFlag, PlaybackAction, RoomError};
use crate::state::AppState;
use crate::ws::broadcast::{broadcast_to_room, send_error, send_to_conn};
use crate::ws::signaling;

/// Events a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    CreateRoom {
        user_name: String,
    },
    JoinRoom {
        room_code: String,
        user_name: String,
    },
    SendMessage {
        message: String,
    },
    MediaControl(MediaControl),
    WebrtcOffer(SignalEnvelope),
    WebrtcAnswer(SignalEnvelope),
    WebrtcIceCandidate(SignalEnvelope),
    ToggleVideo {
        enabled: bool,
    },
    ToggleAudio {
        enabled: bool,
    },
}

/// Playback-control sub-actions carried by `media_control`.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MediaControl {
    ChangeMedia {
        url: String,
        #[serde(rename = "type")]
        kind: MediaKind,
        #[serde(default)]
        title: String,
        #[serde(default)]
        timestamp: f64,
    },
    StartLoading {
        #[serde(rename = "type", default = "default_loading_kind")]
        kind: MediaKind,
        #[serde(default = "default_loading_title")]
        title: String,
    },
    TorrentProgress {
        torrent_status: serde_json::Value,
    },
    Play {
        timestamp: Option<f64>,
    },
    Pause {
        timestamp: Option<f64>,
    },
    Seek {
        #[serde(default)]
        timestamp: f64,
    },
}

fn default_loading_kind() -> MediaKind {
    MediaKind::Torrent
}

fn default_loading_title() -> String {
    "Loading media...".to_string()
}

/// A WebRTC signaling frame addressed at one peer. The payload is relayed
/// verbatim; the gateway never looks inside it.
#[derive(Debug, Deserialize)]
pub struct SignalEnvelope {
    pub target_user_id: Uuid,
    pub payload: serde_json::Value,
}

/// Events the server emits.
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    RoomCreated {
        room_code: String,
    },
    RoomJoined {
        room_code: String,
        user_id: Uuid,
        is_host: bool,
        users: Vec<Member>,
        host: Option<Uuid>,
        media: Option<MediaState>,
        chat: Vec<ChatMessage>,
    },
    UserJoined {
        user_id: Uuid,
        user_name: String,
        is_host: bool,
    },
    UsersUpdated {
        users: Vec<Member>,
        host: Option<Uuid>,
    },
    UserLeft {
        user_id: Uuid,
        user_name: String,
        new_host: Option<Uuid>,
    },
    NewMessage(ChatMessage),
    MediaChanged {
        url: String,
        #[serde(rename = "type")]
        kind: MediaKind,
        title: String,
        user_name: String,
    },
    MediaLoading {
        #[serde(rename = "type")]
        kind: MediaKind,
        title: String,
        user_name: String,
    },
    TorrentProgress {
        torrent_status: serde_json::Value,
        user_name: String,
    },
    MediaPlay {
        timestamp: f64,
        user_name: String,
    },
    MediaPause {
        timestamp: f64,
        user_name: String,
    },
    MediaSeek {
        timestamp: f64,
        user_name: String,
    },
    WebrtcOffer {
        from_user_id: Uuid,
        from_user_name: String,
        payload: serde_json::Value,
    },
    WebrtcAnswer {
        from_user_id: Uuid,
        from_user_name: String,
        payload: serde_json::Value,
    },
    WebrtcIceCandidate {
        from_user_id: Uuid,
        from_user_name: String,
        payload: serde_json::Value,
    },
    Error {
        message: String,
    },
}

/// Decode and dispatch one inbound text frame. Every failure path ends in
/// an `error` reply to the originator; nothing here can take the actor
/// down or touch another room.
pub async fn handle_text_message(text: &str, conn_id: Uuid, state: &AppState) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(conn = %conn_id, error = %e, "undecodable client event");
            send_error(&state.connections, conn_id, "invalid event payload");
            return;
        }
    };

    match event {
        ClientEvent::CreateRoom { user_name } => handle_create_room(state, conn_id, &user_name),
        ClientEvent::JoinRoom {
            room_code,
            user_name,
        } => handle_join_room(state, conn_id, &room_code, &user_name),
        ClientEvent::SendMessage { message } => handle_send_message(state, conn_id, &message),
        ClientEvent::MediaControl(control) => handle_media_control(state, conn_id, control),
        ClientEvent::WebrtcOffer(envelope) => {
            signaling::relay(state, conn_id, envelope, signaling::SignalKind::Offer)
        }
        ClientEvent::WebrtcAnswer(envelope) => {
            signaling::relay(state, conn_id, envelope, signaling::SignalKind::Answer)
        }
        ClientEvent::WebrtcIceCandidate(envelope) => {
            signaling::relay(state, conn_id, envelope, signaling::SignalKind::IceCandidate)
        }
        ClientEvent::ToggleVideo { enabled } => {
            handle_toggle(state, conn_id, MemberFlag::Video, enabled)
        }
        ClientEvent::ToggleAudio { enabled } => {
            handle_toggle(state, conn_id, MemberFlag::Audio, enabled)
        }
    }
}

/// The room association for a connection, or an error reply if it has none.
fn require_room(state: &AppState, conn_id: Uuid) -> Option<String> {
    let room = state
        .connections
        .get(&conn_id)
        .and_then(|entry| entry.room_code.clone());
    if room.is_none() {
        send_error(&state.connections, conn_id, "not in a room");
    }
    room
}

fn bind_connection(state: &AppState, conn_id: Uuid, room_code: &str, user_name: &str) {
    if let Some(mut entry) = state.connections.get_mut(&conn_id) {
        entry.room_code = Some(room_code.to_string());
        entry.user_name = Some(user_name.to_string());
    }
}

fn reply_room_error(state: &AppState, conn_id: Uuid, err: RoomError) {
    send_error(&state.connections, conn_id, err.to_string());
}

fn handle_create_room(state: &AppState, conn_id: Uuid, user_name: &str) {
    if user_name.trim().is_empty() {
        send_error(&state.connections, conn_id, "name is required");
        return;
    }
    leave_current_room(state, conn_id);

    let room_code = state.rooms.create();
    // The room was just created, so this join cannot miss.
    let outcome = match state.rooms.join(&room_code, conn_id, user_name, true) {
        Ok(outcome) => outcome,
        Err(err) => return reply_room_error(state, conn_id, err),
    };
    bind_connection(state, conn_id, &room_code, &outcome.member.user_name);

    send_to_conn(
        &state.connections,
        conn_id,
        &ServerEvent::RoomCreated {
            room_code: room_code.clone(),
        },
    );
    send_joined_snapshot(state, conn_id, outcome);
}

fn handle_join_room(state: &AppState, conn_id: Uuid, room_code: &str, user_name: &str) {
    leave_current_room(state, conn_id);

    let auto_create = !state.strict_rooms;
    let outcome = match state.rooms.join(room_code, conn_id, user_name, auto_create) {
        Ok(outcome) => outcome,
        Err(err) => return reply_room_error(state, conn_id, err),
    };
    let code = outcome.snapshot.room_code.clone();
    bind_connection(state, conn_id, &code, &outcome.member.user_name);

    let joined = ServerEvent::UserJoined {
        user_id: conn_id,
        user_name: outcome.member.user_name.clone(),
        is_host: outcome.member.is_host,
    };
    let users = ServerEvent::UsersUpdated {
        users: outcome.snapshot.users.clone(),
        host: outcome.snapshot.host,
    };

    send_joined_snapshot(state, conn_id, outcome);
    broadcast_to_room(&state.connections, &code, Some(conn_id), &joined);
    broadcast_to_room(&state.connections, &code, None, &users);
}

fn send_joined_snapshot(
    state: &AppState,
    conn_id: Uuid,
    outcome: crate::room::registry::JoinOutcome,
) {
    let snapshot = outcome.snapshot;
    send_to_conn(
        &state.connections,
        conn_id,
        &ServerEvent::RoomJoined {
            room_code: snapshot.room_code,
            user_id: conn_id,
            is_host: outcome.member.is_host,
            users: snapshot.users,
            host: snapshot.host,
            media: snapshot.media,
            chat: snapshot.chat,
        },
    );
}

fn handle_send_message(state: &AppState, conn_id: Uuid, message: &str) {
    let Some(room_code) = require_room(state, conn_id) else {
        return;
    };
    match state.rooms.append_chat(&room_code, conn_id, message) {
        // Delivered to every member including the sender, so all clients
        // observe the same log order.
        Ok(entry) => broadcast_to_room(
            &state.connections,
            &room_code,
            None,
            &ServerEvent::NewMessage(entry),
        ),
        Err(err) => reply_room_error(state, conn_id, err),
    }
}

fn handle_media_control(state: &AppState, conn_id: Uuid, control: MediaControl) {
    let Some(room_code) = require_room(state, conn_id) else {
        return;
    };

    match control {
        MediaControl::ChangeMedia {
            url,
            kind,
            title,
            timestamp,
        } => {
            match state
                .rooms
                .change_media(&room_code, conn_id, &url, kind, &title, timestamp)
            {
                Ok((media, user_name)) => broadcast_to_room(
                    &state.connections,
                    &room_code,
                    None,
                    &ServerEvent::MediaChanged {
                        url: media.url,
                        kind: media.kind,
                        title: media.title,
                        user_name,
                    },
                ),
                Err(err) => reply_room_error(state, conn_id, err),
            }
        }
        MediaControl::StartLoading { kind, title } => {
            // Transient notice only; committed media state is untouched.
            let Some(user_name) = state.rooms.member_name(&room_code, conn_id) else {
                return send_error(&state.connections, conn_id, "not in a room");
            };
            broadcast_to_room(
                &state.connections,
                &room_code,
                None,
                &ServerEvent::MediaLoading {
                    kind,
                    title,
                    user_name,
                },
            );
        }
        MediaControl::TorrentProgress { torrent_status } => {
            // The room relays progress so every member's UI stays in sync;
            // the fetch adapter remains the source of truth.
            let Some(user_name) = state.rooms.member_name(&room_code, conn_id) else {
                return send_error(&state.connections, conn_id, "not in a room");
            };
            broadcast_to_room(
                &state.connections,
                &room_code,
                None,
                &ServerEvent::TorrentProgress {
                    torrent_status,
                    user_name,
                },
            );
        }
        MediaControl::Play { timestamp } => {
            playback(state, conn_id, &room_code, PlaybackAction::Play, timestamp)
        }
        MediaControl::Pause { timestamp } => {
            playback(state, conn_id, &room_code, PlaybackAction::Pause, timestamp)
        }
        MediaControl::Seek { timestamp } => playback(
            state,
            conn_id,
            &room_code,
            PlaybackAction::Seek,
            Some(timestamp),
        ),
    }
}

fn playback(
    state: &AppState,
    conn_id: Uuid,
    room_code: &str,
    action: PlaybackAction,
    timestamp: Option<f64>,
) {
    match state
        .rooms
        .control_playback(room_code, conn_id, action, timestamp)
    {
        Ok(outcome) => {
            let event = match action {
                PlaybackAction::Play => ServerEvent::MediaPlay {
                    timestamp: outcome.position,
                    user_name: outcome.user_name,
                },
                PlaybackAction::Pause => ServerEvent::MediaPause {
                    timestamp: outcome.position,
                    user_name: outcome.user_name,
                },
                PlaybackAction::Seek => ServerEvent::MediaSeek {
                    timestamp: outcome.position,
                    user_name: outcome.user_name,
                },
            };
            // The originator applied its own control locally; excluding it
            // here is what keeps the echo off the wire.
            broadcast_to_room(&state.connections, room_code, Some(conn_id), &event);
        }
        Err(err) => reply_room_error(state, conn_id, err),
    }
}

fn handle_toggle(state: &AppState, conn_id: Uuid, flag: MemberFlag, enabled: bool) {
    let Some(room_code) = require_room(state, conn_id) else {
        return;
    };
    match state
        .rooms
        .set_member_flag(&room_code, conn_id, flag, enabled)
    {
        Ok(update) => broadcast_to_room(
            &state.connections,
            &room_code,
            None,
            &ServerEvent::UsersUpdated {
                users: update.users,
                host: update.host,
            },
        ),
        Err(err) => reply_room_error(state, conn_id, err),
    }
}

/// Detach a connection from its current room, notifying the remaining
/// members. Idempotent: the association is taken before the room op, so a
/// second call finds nothing to do. This is the single place disconnect
/// cleanup happens.
pub fn leave_current_room(state: &AppState, conn_id: Uuid) {
    let room_code = match state.connections.get_mut(&conn_id) {
        Some(mut entry) => entry.room_code.take(),
        None => None,
    };
    let Some(room_code) = room_code else { return };

    if let Some(outcome) = state.rooms.leave(&room_code, conn_id) {
        if !outcome.room_destroyed {
            broadcast_to_room(
                &state.connections,
                &room_code,
                None,
                &ServerEvent::UserLeft {
                    user_id: conn_id,
                    user_name: outcome.user_name,
                    new_host: outcome.new_host.as_ref().map(|m| m.user_id),
                },
            );
            broadcast_to_room(
                &state.connections,
                &room_code,
                None,
                &ServerEvent::UsersUpdated {
                    users: outcome.users,
                    host: outcome.host,
                },
            );
        }
    }
}
