//! Torrent search against an apibay-style JSON indexer.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::state::AppState;

const TRACKERS: &[&str] = &[
    "udp://tracker.opentrackr.org:1337/announce",
    "udp://open.demonii.com:1337/announce",
    "udp://tracker.openbittorrent.com:6969/announce",
];

/// Quality tags recognized in release titles, most specific first.
const QUALITY_TAGS: &[&str] = &[
    "2160p", "4K", "1080p", "720p", "480p", "BluRay", "BRRip", "BDRip", "WEBRip", "WEB-DL",
    "DVDRip", "CAMRip", "CAM", "TS",
];

/// The info-hash apibay returns for its "no results" placeholder row.
const EMPTY_MARKER_HASH: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("indexer request failed: {0}")]
    Indexer(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub magnet_url: String,
    pub size: String,
    pub seeders: u64,
    pub leechers: u64,
    pub quality: Option<String>,
}

/// Client for the configured indexer (`q.php?q=<query>` returning a JSON
/// array of rows with name/info_hash/seeders/leechers/size).
pub struct SearchClient {
    http: reqwest::Client,
    indexer_url: String,
    max_results: usize,
}

impl SearchClient {
    pub fn new(indexer_url: String, timeout: Duration, max_results: usize) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            indexer_url,
            max_results,
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        let rows: Vec<serde_json::Value> = self
            .http
            .get(&self.indexer_url)
            .query(&[("q", query)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut seen = HashSet::new();
        let mut results: Vec<SearchResult> = rows
            .iter()
            .filter_map(|row| {
                let name = row.get("name")?.as_str()?.to_string();
                let info_hash = row.get("info_hash")?.as_str()?.to_ascii_lowercase();
                if info_hash == EMPTY_MARKER_HASH || !seen.insert(info_hash.clone()) {
                    return None;
                }
                Some(SearchResult {
                    magnet_url: build_magnet(&info_hash),
                    size: format_size(field_u64(row, "size")),
                    seeders: field_u64(row, "seeders"),
                    leechers: field_u64(row, "leechers"),
                    quality: extract_quality(&name),
                    title: name,
                })
            })
            .collect();

        results.sort_by(|a, b| b.seeders.cmp(&a.seeders));
        results.truncate(self.max_results);
        Ok(results)
    }
}

/// Indexers serve numeric fields as either numbers or strings.
fn field_u64(row: &serde_json::Value, key: &str) -> u64 {
    match row.get(key) {
        Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn build_magnet(info_hash: &str) -> String {
    let mut magnet = format!("magnet:?xt=urn:btih:{info_hash}");
    for tracker in TRACKERS {
        magnet.push_str("&tr=");
        // Minimal percent-encoding; tracker URLs only need ':' and '/'.
        magnet.push_str(&tracker.replace(':', "%3A").replace('/', "%2F"));
    }
    magnet
}

fn extract_quality(title: &str) -> Option<String> {
    let lower = title.to_ascii_lowercase();
    QUALITY_TAGS
        .iter()
        .find(|tag| lower.contains(&tag.to_ascii_lowercase()))
        .map(|tag| tag.to_string())
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub count: usize,
}

/// POST /api/search-torrents
///
/// Body: `{ "query": "..." }`. Results ranked by seeders.
pub async fn search_torrents(
    State(state): State<AppState>,
    Json(body): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let query = body.query.trim();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "query is required".to_string()));
    }

    tracing::info!(query = %query, "torrent search requested");
    let results = state.search.search(query).await.map_err(|e| {
        tracing::warn!(error = %e, "torrent search failed");
        (StatusCode::BAD_GATEWAY, "search failed".to_string())
    })?;

    Ok(Json(SearchResponse {
        query: query.to_string(),
        count: results.len(),
        results,
    }))
}
