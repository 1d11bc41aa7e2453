mod config;
mod room;
mod routes;
mod state;
mod torrent;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use config::{generate_config_template, Config, TorrentConfig};
use room::RoomRegistry;
use state::AppState;
use torrent::engine::SpoolEngine;
use torrent::search::SearchClient;
use torrent::{FetchEngine, TorrentManager};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "watchroom_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "watchroom_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("watchroom server v{} starting", env!("CARGO_PKG_VERSION"));

    let torrent_config = config.torrent.clone().unwrap_or_default();
    let search_config = config.search.clone().unwrap_or_default();

    // The torrent engine is optional on a host. When it cannot be set up,
    // torrent features are disabled and everything else runs as normal.
    let engine: Option<Arc<dyn FetchEngine>> = if torrent_config.enabled {
        match SpoolEngine::new(&torrent_config.spool_dir) {
            Ok(engine) => {
                tracing::info!(spool_dir = %torrent_config.spool_dir, "torrent bridge enabled");
                Some(Arc::new(engine))
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "torrent engine unavailable, torrent features disabled"
                );
                None
            }
        }
    } else {
        tracing::info!("torrent bridge disabled by config");
        None
    };

    let rooms = Arc::new(RoomRegistry::new(config.max_users_per_room));
    let torrents = Arc::new(TorrentManager::new(
        engine,
        Duration::from_secs(torrent_config.max_age_hours * 3600),
    ));
    let search = Arc::new(SearchClient::new(
        search_config.indexer_url.clone(),
        Duration::from_secs(search_config.timeout_secs),
        search_config.max_results,
    ));

    let state = AppState {
        rooms: rooms.clone(),
        connections: ws::new_connection_registry(),
        torrents: torrents.clone(),
        search,
        strict_rooms: config.strict_rooms,
    };

    spawn_room_sweeper(rooms, config.room_sweep_interval_secs);
    spawn_torrent_sweeper(torrents, &torrent_config);

    let app = routes::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Periodically drop empty rooms that slipped past leave-time cleanup.
fn spawn_room_sweeper(rooms: Arc<RoomRegistry>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(Duration::from_secs(interval_secs));
        timer.tick().await;
        loop {
            timer.tick().await;
            let swept = rooms.sweep_empty();
            if swept > 0 {
                tracing::info!(swept, "cleaned up empty rooms");
            }
        }
    });
}

/// Periodically drop torrent jobs idle past the configured age.
fn spawn_torrent_sweeper(torrents: Arc<TorrentManager>, config: &TorrentConfig) {
    if !torrents.enabled() {
        return;
    }
    let interval_secs = config.cleanup_interval_secs;
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(Duration::from_secs(interval_secs));
        timer.tick().await;
        loop {
            timer.tick().await;
            let swept = torrents.sweep();
            if swept > 0 {
                tracing::info!(swept, "cleaned up idle torrent jobs");
            }
        }
    });
}
