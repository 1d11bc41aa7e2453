//! Fan-out primitives for the session gateway.
//!
//! "Broadcast to room" means every live connection whose room association
//! matches, with an optional excluded connection id so playback-control
//! events are never echoed back to their originator.

use axum::extract::ws::Message;
use uuid::Uuid;

use crate::ws::protocol::ServerEvent;
use crate::ws::ConnectionRegistry;

fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode server event");
            None
        }
    }
}

/// Send an event to a single connection. Dropped silently if the
/// connection is gone.
pub fn send_to_conn(registry: &ConnectionRegistry, conn_id: Uuid, event: &ServerEvent) {
    let Some(msg) = encode(event) else { return };
    if let Some(entry) = registry.get(&conn_id) {
        let _ = entry.tx.send(msg);
    }
}

/// Reply to a connection with an `error` event. Per-event failures go to
/// the originator only; room state is untouched.
pub fn send_error(registry: &ConnectionRegistry, conn_id: Uuid, message: impl Into<String>) {
    send_to_conn(
        registry,
        conn_id,
        &ServerEvent::Error {
            message: message.into(),
        },
    );
}

/// Broadcast an event to every connection mapped to `room_code`, excluding
/// `skip` when given.
pub fn broadcast_to_room(
    registry: &ConnectionRegistry,
    room_code: &str,
    skip: Option<Uuid>,
    event: &ServerEvent,
) {
    let Some(msg) = encode(event) else { return };
    for entry in registry.iter() {
        if skip == Some(*entry.key()) {
            continue;
        }
        if entry.value().room_code.as_deref() == Some(room_code) {
            let _ = entry.value().tx.send(msg.clone());
        }
    }
}
