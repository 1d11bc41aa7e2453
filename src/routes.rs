use axum::{Json, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::state::AppState;
use crate::torrent::routes as torrent_routes;
use crate::torrent::search;
use crate::ws::handler as ws_handler;

/// GET /api/room/{code} — Public room info, without the member/chat detail
/// the WebSocket snapshot carries.
async fn room_info(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::extract::Path(room_code): axum::extract::Path<String>,
) -> Result<Json<serde_json::Value>, (axum::http::StatusCode, String)> {
    let snapshot = state
        .rooms
        .snapshot(&room_code)
        .map_err(|e| (axum::http::StatusCode::NOT_FOUND, e.to_string()))?;
    Ok(Json(serde_json::json!({
        "room_code": snapshot.room_code,
        "user_count": snapshot.users.len(),
        "has_media": snapshot.media.is_some(),
        "created_at": snapshot.created_at,
    })))
}

/// GET /api/stats — Registry-wide room/member counts.
async fn stats(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<crate::room::registry::RegistryStats> {
    Json(state.rooms.stats())
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting on the search endpoint, which fans out to an external
    // indexer: 10 requests per minute per IP.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(6) // 1 token every 6 seconds = 10 per minute
            .burst_size(10)
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    let search_routes = Router::new()
        .route(
            "/api/search-torrents",
            axum::routing::post(search::search_torrents),
        )
        .layer(GovernorLayer {
            config: governor_config,
        });

    let room_routes = Router::new()
        .route("/api/room/{code}", axum::routing::get(room_info))
        .route("/api/stats", axum::routing::get(stats));

    let torrent_api = Router::new()
        .route(
            "/api/torrent/add",
            axum::routing::post(torrent_routes::add_torrent),
        )
        .route(
            "/api/torrent/status/{id}",
            axum::routing::get(torrent_routes::torrent_status),
        )
        .route(
            "/api/torrent/stream/{id}/{file_index}",
            axum::routing::get(torrent_routes::stream_torrent_file),
        )
        .route(
            "/api/torrent/remove/{id}",
            axum::routing::delete(torrent_routes::remove_torrent),
        )
        .route(
            "/api/torrent/list",
            axum::routing::get(torrent_routes::list_torrents),
        );

    // WebSocket endpoint: the session gateway
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(search_routes)
        .merge(room_routes)
        .merge(torrent_api)
        .merge(ws_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
