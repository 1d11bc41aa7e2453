pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;
pub mod signaling;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Sender half of a WebSocket connection's outbound channel. Any part of
/// the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// What the gateway knows about one live connection: its outbound channel
/// plus the room/name association established by create_room/join_room.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub tx: ConnectionSender,
    pub user_name: Option<String>,
    pub room_code: Option<String>,
}

/// Connection registry: all live WebSocket connections keyed by connection
/// id. Fan-out to a room walks this map filtering on `room_code`.
pub type ConnectionRegistry = Arc<DashMap<Uuid, ConnectionEntry>>;

pub fn new_connection_registry() -> ConnectionRegistry {
    Arc::new(DashMap::new())
}
