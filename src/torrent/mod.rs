pub mod engine;
pub mod manager;
pub mod routes;
pub mod search;

/// Failure taxonomy for the progressive fetch adapter. Mapped to HTTP
/// statuses at the route boundary and never allowed to cross rooms.
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("invalid magnet locator")]
    InvalidLocator,
    #[error("torrent engine unavailable")]
    EngineUnavailable,
    #[error("torrent {0} not found")]
    NotFound(String),
    #[error("file index {0} out of range")]
    UnknownFile(usize),
    #[error("requested range not yet downloaded")]
    NotYetAvailable,
    #[error("requested range beyond end of file")]
    RangeNotSatisfiable,
    #[error("torrent metadata timed out")]
    MetadataTimeout,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub use engine::{FetchEngine, FetchJob, FileEntry, SpoolEngine};
pub use manager::{TorrentManager, TorrentStatus};
