//! Download-engine abstraction and the spool-directory bridge.
//!
//! The adapter never talks to a torrent client directly. `FetchEngine` /
//! `FetchJob` expose exactly what progressive streaming needs: metadata,
//! a per-file contiguous downloaded frontier, byte reads below that
//! frontier, and a read-cursor hint that reprioritizes piece fetch toward
//! the playback position. Tests drive the same traits with hand-written
//! spool state, so readiness and range logic are exercised without a real
//! download engine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::torrent::TorrentError;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v"];

/// One file inside a torrent job.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub index: usize,
    pub path: String,
    pub size: u64,
    pub is_video: bool,
}

pub fn is_video_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// A live download job.
pub trait FetchJob: Send + Sync + 'static {
    fn name(&self) -> Option<String>;
    fn has_metadata(&self) -> bool;
    fn files(&self) -> Vec<FileEntry>;
    /// Fraction of the whole job downloaded, in [0, 1].
    fn overall_progress(&self) -> f64;
    /// Contiguous downloaded byte prefix of one file. Bytes below the
    /// frontier are safe to serve; bytes at or past it are not on disk yet.
    fn file_frontier(&self, index: usize) -> u64;
    fn download_rate(&self) -> u64;
    fn upload_rate(&self) -> u64;
    fn num_peers(&self) -> u32;
    /// Read up to `len` bytes of a file starting at `offset`. Callers clamp
    /// the request to the frontier first.
    fn read(&self, index: usize, offset: u64, len: usize) -> Result<Vec<u8>, TorrentError>;
    /// Reprioritize piece fetch toward `offset` so sequential playback reads
    /// stay ahead of the download after a seek.
    fn hint_read_cursor(&self, index: usize, offset: u64);
    fn cancel(&self);
}

/// A source of download jobs.
pub trait FetchEngine: Send + Sync + 'static {
    fn add(&self, magnet: &str) -> Result<Arc<dyn FetchJob>, TorrentError>;
}

/// Extract the info-hash from a magnet locator (`xt=urn:btih:...`),
/// lowercased. 40-char hex and 32-char base32 forms are accepted.
pub fn parse_magnet(magnet: &str) -> Result<String, TorrentError> {
    let rest = magnet
        .strip_prefix("magnet:?")
        .ok_or(TorrentError::InvalidLocator)?;
    for param in rest.split('&') {
        if let Some(value) = param.strip_prefix("xt=urn:btih:") {
            let hash = value.to_ascii_lowercase();
            let hex40 = hash.len() == 40 && hash.chars().all(|c| c.is_ascii_hexdigit());
            let b32 = hash.len() == 32 && hash.chars().all(|c| c.is_ascii_alphanumeric());
            if hex40 || b32 {
                return Ok(hash);
            }
        }
    }
    Err(TorrentError::InvalidLocator)
}

/// Spool manifest, maintained by the external downloader next to the
/// payload files: one JSON document per job directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoolManifest {
    pub name: String,
    pub files: Vec<SpoolFile>,
    #[serde(default)]
    pub download_rate: u64,
    #[serde(default)]
    pub upload_rate: u64,
    #[serde(default)]
    pub num_peers: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoolFile {
    pub path: String,
    pub size: u64,
    /// Contiguous bytes downloaded from the start of the file.
    pub downloaded: u64,
}

/// Bridges an external downloader through a spool directory: one directory
/// per info-hash holding the payload files, a `manifest.json` the
/// downloader keeps current, a `magnet` file it reads on pickup, a `cursor`
/// file carrying the read-cursor hint, and a `cancel` marker.
pub struct SpoolEngine {
    root: PathBuf,
}

impl SpoolEngine {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, TorrentError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }
}

impl FetchEngine for SpoolEngine {
    fn add(&self, magnet: &str) -> Result<Arc<dyn FetchJob>, TorrentError> {
        let info_hash = parse_magnet(magnet)?;
        let dir = self.root.join(&info_hash);
        fs::create_dir_all(&dir)?;
        // Drop the locator for the downloader to pick up; clear any stale
        // cancel marker from a previous run of the same hash.
        fs::write(dir.join("magnet"), magnet)?;
        let _ = fs::remove_file(dir.join("cancel"));
        tracing::info!(info_hash = %info_hash, "torrent job spooled");
        Ok(Arc::new(SpoolJob { dir }))
    }
}

struct SpoolJob {
    dir: PathBuf,
}

impl SpoolJob {
    fn manifest(&self) -> Option<SpoolManifest> {
        let raw = fs::read_to_string(self.dir.join("manifest.json")).ok()?;
        serde_json::from_str(&raw).ok()
    }
}

impl FetchJob for SpoolJob {
    fn name(&self) -> Option<String> {
        self.manifest().map(|m| m.name)
    }

    fn has_metadata(&self) -> bool {
        self.manifest().map(|m| !m.files.is_empty()).unwrap_or(false)
    }

    fn files(&self) -> Vec<FileEntry> {
        self.manifest()
            .map(|m| {
                m.files
                    .iter()
                    .enumerate()
                    .map(|(index, f)| FileEntry {
                        index,
                        path: f.path.clone(),
                        size: f.size,
                        is_video: is_video_path(&f.path),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn overall_progress(&self) -> f64 {
        let Some(manifest) = self.manifest() else {
            return 0.0;
        };
        let total: u64 = manifest.files.iter().map(|f| f.size).sum();
        if total == 0 {
            return 0.0;
        }
        let done: u64 = manifest
            .files
            .iter()
            .map(|f| f.downloaded.min(f.size))
            .sum();
        done as f64 / total as f64
    }

    fn file_frontier(&self, index: usize) -> u64 {
        self.manifest()
            .and_then(|m| m.files.get(index).map(|f| f.downloaded.min(f.size)))
            .unwrap_or(0)
    }

    fn download_rate(&self) -> u64 {
        self.manifest().map(|m| m.download_rate).unwrap_or(0)
    }

    fn upload_rate(&self) -> u64 {
        self.manifest().map(|m| m.upload_rate).unwrap_or(0)
    }

    fn num_peers(&self) -> u32 {
        self.manifest().map(|m| m.num_peers).unwrap_or(0)
    }

    fn read(&self, index: usize, offset: u64, len: usize) -> Result<Vec<u8>, TorrentError> {
        let manifest = self.manifest().ok_or(TorrentError::NotYetAvailable)?;
        let entry = manifest
            .files
            .get(index)
            .ok_or(TorrentError::UnknownFile(index))?;

        let mut file = fs::File::open(self.dir.join(&entry.path))?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn hint_read_cursor(&self, index: usize, offset: u64) {
        // Best effort; a missed hint only costs prefetch locality.
        let _ = fs::write(self.dir.join("cursor"), format!("{index}\t{offset}\n"));
    }

    fn cancel(&self) {
        let _ = fs::write(self.dir.join("cancel"), b"");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnet_parsing() {
        let hash = parse_magnet(
            "magnet:?xt=urn:btih:C9E15763F722F23E98A29DECDFAE341B98D53056&dn=x&tr=udp%3A%2F%2Ft",
        )
        .unwrap();
        assert_eq!(hash, "c9e15763f722f23e98a29decdfae341b98d53056");

        assert!(parse_magnet("http://example.com/file.torrent").is_err());
        assert!(parse_magnet("magnet:?dn=missing-xt").is_err());
        assert!(parse_magnet("magnet:?xt=urn:btih:tooshort").is_err());
    }

    #[test]
    fn video_detection_is_case_insensitive() {
        assert!(is_video_path("Movies/Feature.MKV"));
        assert!(is_video_path("clip.mp4"));
        assert!(!is_video_path("subtitles.srt"));
        assert!(!is_video_path("no_extension"));
    }
}
