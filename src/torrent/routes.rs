//! REST endpoints for the progressive fetch adapter.
//!
//! POST /api/torrent/add — start a download from a magnet locator
//! GET /api/torrent/status/{id} — job snapshot
//! GET /api/torrent/stream/{id}/{file_index} — range-aware byte serving
//! DELETE /api/torrent/remove/{id}
//! GET /api/torrent/list

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::torrent::manager::RangeSlice;
use crate::torrent::{TorrentError, TorrentStatus};

fn error_response(err: TorrentError) -> (StatusCode, String) {
    let status = match err {
        TorrentError::InvalidLocator => StatusCode::BAD_REQUEST,
        TorrentError::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        TorrentError::NotFound(_) | TorrentError::UnknownFile(_) | TorrentError::MetadataTimeout => {
            StatusCode::NOT_FOUND
        }
        // 425 Too Early: the client retries with backoff once more of the
        // file has downloaded.
        TorrentError::NotYetAvailable => StatusCode::TOO_EARLY,
        TorrentError::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
        TorrentError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn content_type_for(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    match lower.rsplit('.').next() {
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("wmv") => "video/x-ms-wmv",
        Some("flv") => "video/x-flv",
        Some("m4v") => "video/x-m4v",
        _ => "video/mp4",
    }
}

/// Parse a `Range: bytes=start-end` header. Only the single-range form
/// browsers send is supported. Returns `(start, Option<end>)`.
fn parse_range_header(value: &str) -> Option<(u64, Option<u64>)> {
    let range = value.trim().strip_prefix("bytes=")?;
    let (start, end) = range.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => None,
        e => Some(e.parse().ok()?),
    };
    Some((start, end))
}

#[derive(Debug, Deserialize)]
pub struct AddTorrentRequest {
    pub magnet_url: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AddTorrentResponse {
    pub success: bool,
    pub torrent_id: String,
    pub status: TorrentStatus,
}

/// POST /api/torrent/add
pub async fn add_torrent(
    State(state): State<AppState>,
    Json(body): Json<AddTorrentRequest>,
) -> Result<Json<AddTorrentResponse>, (StatusCode, String)> {
    let (torrent_id, status) = state
        .torrents
        .add(body.magnet_url.trim(), body.title)
        .map_err(error_response)?;
    tracing::info!(job = %torrent_id, "torrent added via bridge");
    Ok(Json(AddTorrentResponse {
        success: true,
        torrent_id,
        status,
    }))
}

/// GET /api/torrent/status/{id}
pub async fn torrent_status(
    State(state): State<AppState>,
    Path(torrent_id): Path<String>,
) -> Result<Json<TorrentStatus>, (StatusCode, String)> {
    state
        .torrents
        .status(&torrent_id)
        .map(Json)
        .map_err(error_response)
}

/// GET /api/torrent/stream/{id}/{file_index}
///
/// Byte serving for browser video elements over a still-downloading file.
/// With a `Range` header: 206 + `Content-Range` carrying the requested
/// slice clamped to the downloaded frontier. Without one: 200 with the
/// available prefix. 425 while not streaming-ready or ahead of the
/// frontier, 416 past end of file.
pub async fn stream_torrent_file(
    State(state): State<AppState>,
    Path((torrent_id, file_index)): Path<(String, usize)>,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    let readiness = state
        .torrents
        .file_readiness(&torrent_id, file_index)
        .map_err(error_response)?;
    if !readiness.ready {
        return Err((
            StatusCode::TOO_EARLY,
            format!(
                "not enough data for streaming: {:.1}% downloaded, need {:.1}%",
                readiness.progress * 100.0,
                readiness.threshold * 100.0
            ),
        ));
    }

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_header);

    let (start, end, partial) = match range {
        Some((start, end)) => (start, end, true),
        None => (0, None, false),
    };

    let slice = state
        .torrents
        .read_range(&torrent_id, file_index, start, end)
        .await
        .map_err(error_response)?;

    Ok(build_range_response(slice, partial))
}

fn build_range_response(slice: RangeSlice, partial: bool) -> Response {
    let status = if partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let mut builder = Response::builder()
        .status(status)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_TYPE, content_type_for(&slice.file.path))
        .header(header::CONTENT_LENGTH, slice.bytes.len());
    if partial {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", slice.start, slice.end, slice.total_size),
        );
    }
    builder
        .body(Body::from(slice.bytes))
        .expect("static headers are valid")
}

#[derive(Debug, Serialize)]
pub struct RemoveTorrentResponse {
    pub success: bool,
    pub message: String,
}

/// DELETE /api/torrent/remove/{id}
pub async fn remove_torrent(
    State(state): State<AppState>,
    Path(torrent_id): Path<String>,
) -> Result<Json<RemoveTorrentResponse>, (StatusCode, String)> {
    if !state.torrents.remove(&torrent_id) {
        return Err((StatusCode::NOT_FOUND, "torrent not found".to_string()));
    }
    Ok(Json(RemoveTorrentResponse {
        success: true,
        message: "torrent removed".to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct ListTorrentsResponse {
    pub torrents: Vec<TorrentStatus>,
}

/// GET /api/torrent/list
pub async fn list_torrents(State(state): State<AppState>) -> Json<ListTorrentsResponse> {
    Json(ListTorrentsResponse {
        torrents: state.torrents.list(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_header_forms() {
        assert_eq!(parse_range_header("bytes=0-999"), Some((0, Some(999))));
        assert_eq!(parse_range_header("bytes=500-"), Some((500, None)));
        assert_eq!(parse_range_header("bytes=-500"), None);
        assert_eq!(parse_range_header("items=0-1"), None);
    }
}
