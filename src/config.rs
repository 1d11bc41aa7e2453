use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// watchroom session server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "watchroom-server", version, about = "watchroom session server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "WATCHROOM_PORT", default_value = "8000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "WATCHROOM_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./watchroom.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "WATCHROOM_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Require rooms to exist before join (disables auto-create-on-join)
    #[arg(long, env = "WATCHROOM_STRICT_ROOMS")]
    pub strict_rooms: bool,

    /// Maximum members per room
    #[arg(long, env = "WATCHROOM_MAX_USERS_PER_ROOM", default_value = "50")]
    pub max_users_per_room: usize,

    /// Seconds between empty-room sweeps
    #[arg(long, env = "WATCHROOM_ROOM_SWEEP_INTERVAL", default_value = "300")]
    pub room_sweep_interval_secs: u64,

    /// Torrent bridge configuration (loaded from [torrent] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub torrent: Option<TorrentConfig>,

    /// Torrent search configuration (loaded from [search] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub search: Option<SearchConfig>,
}

/// Configuration for the progressive torrent bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentConfig {
    /// Whether the torrent bridge is enabled (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Spool directory shared with the external downloader
    #[serde(default = "default_spool_dir")]
    pub spool_dir: String,

    /// Hours an idle job is kept before cleanup (default: 24)
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,

    /// Interval in seconds between job cleanup runs (default: 3600)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            spool_dir: default_spool_dir(),
            max_age_hours: default_max_age_hours(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

fn default_spool_dir() -> String {
    "./spool".to_string()
}

fn default_max_age_hours() -> u64 {
    24
}

fn default_cleanup_interval() -> u64 {
    3600
}

/// Configuration for the torrent search indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Indexer endpoint returning a JSON array for `?q=<query>`
    #[serde(default = "default_indexer_url")]
    pub indexer_url: String,

    /// Request timeout in seconds (default: 8)
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,

    /// Maximum results returned per search (default: 10)
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            indexer_url: default_indexer_url(),
            timeout_secs: default_search_timeout(),
            max_results: default_max_results(),
        }
    }
}

fn default_indexer_url() -> String {
    "https://apibay.org/q.php".to_string()
}

fn default_search_timeout() -> u64 {
    8
}

fn default_max_results() -> usize {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_address: "0.0.0.0".to_string(),
            config: "./watchroom.toml".to_string(),
            json_logs: false,
            generate_config: false,
            strict_rooms: false,
            max_users_per_room: 50,
            room_sweep_interval_secs: 300,
            torrent: Some(TorrentConfig::default()),
            search: Some(SearchConfig::default()),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (WATCHROOM_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("WATCHROOM_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# watchroom Server Configuration
# Place this file at ./watchroom.toml or specify with --config <path>
# All settings can be overridden via environment variables (WATCHROOM_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8000)
# port = 8000

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Require rooms to exist before join. Default is lenient: joining an
# unknown code creates the room with the joiner as host.
# strict_rooms = false

# Maximum members per room (default: 50)
# max_users_per_room = 50

# Seconds between empty-room sweeps (default: 300)
# room_sweep_interval_secs = 300

# ---- Torrent Bridge ----
# [torrent]

# Enable server-side progressive torrent streaming. Requires an external
# downloader maintaining the spool directory.
# enabled = false

# Spool directory shared with the downloader (one subdirectory per
# info-hash, payload files plus manifest.json)
# spool_dir = "./spool"

# Hours an idle job is kept before cleanup (default: 24)
# max_age_hours = 24

# Interval in seconds between job cleanup runs (default: 3600)
# cleanup_interval_secs = 3600

# ---- Torrent Search ----
# [search]

# Indexer endpoint returning a JSON array for ?q=<query>
# indexer_url = "https://apibay.org/q.php"

# Request timeout in seconds (default: 8)
# timeout_secs = 8

# Maximum results returned per search (default: 10)
# max_results = 10
"#
    .to_string()
}
