use std::sync::Arc;

use crate::room::RoomRegistry;
use crate::torrent::search::SearchClient;
use crate::torrent::TorrentManager;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Live rooms keyed by room code
    pub rooms: Arc<RoomRegistry>,
    /// Active WebSocket connections keyed by connection id
    pub connections: ConnectionRegistry,
    /// Progressive fetch adapter (engine may be absent on this host)
    pub torrents: Arc<TorrentManager>,
    /// Torrent search indexer client
    pub search: Arc<SearchClient>,
    /// Joining an unknown room code errors instead of auto-creating
    pub strict_rooms: bool,
}
