//! Tracked progressive downloads: job table, readiness policy, and
//! frontier-aware byte-range reads.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::torrent::engine::{FetchEngine, FetchJob, FileEntry};
use crate::torrent::TorrentError;

/// Upper bound on one range response. Clients re-request; serving the whole
/// remainder of a multi-gigabyte file in one slice would buffer it in memory.
const STREAM_SLICE_MAX: u64 = 8 * 1024 * 1024;

/// A read at most this far past the frontier waits briefly for the
/// download to catch up instead of failing outright.
const NEAR_FRONTIER_WINDOW: u64 = 4 * 1024 * 1024;

const FRONTIER_WAIT: Duration = Duration::from_secs(2);
const FRONTIER_POLL: Duration = Duration::from_millis(100);

/// A job that still has no metadata after this long is stuck and dropped.
const METADATA_TIMEOUT: Duration = Duration::from_secs(120);

/// Readiness needs this many contiguous bytes (or 5% of the file for small
/// files) on top of the fractional threshold.
const MIN_READY_BYTES: u64 = 10 * 1024 * 1024;

/// Fractional readiness threshold by container. MKV needs more prefix for
/// header parsing; MP4/WebM can start earlier. Tuned, not derived.
fn streaming_threshold(path: &str) -> f64 {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".mkv") {
        0.12
    } else if lower.ends_with(".mp4") || lower.ends_with(".webm") {
        0.08
    } else {
        0.10
    }
}

/// Point-in-time view of a job, served over HTTP and relayed through rooms.
#[derive(Debug, Clone, Serialize)]
pub struct TorrentStatus {
    pub id: String,
    pub name: String,
    pub status: String,
    pub progress: f64,
    pub download_rate: u64,
    pub upload_rate: u64,
    pub num_peers: u32,
    pub files: Vec<FileEntry>,
    pub largest_file: Option<FileEntry>,
    pub total_size: u64,
    pub has_metadata: bool,
    pub streaming_ready: bool,
    pub file_progress: f64,
    pub streaming_threshold: f64,
}

/// Readiness verdict for one file, with the numbers a retry message needs.
pub struct FileReadiness {
    pub ready: bool,
    pub progress: f64,
    pub threshold: f64,
}

/// A served byte slice plus the header fields that describe it.
pub struct RangeSlice {
    pub bytes: Vec<u8>,
    pub start: u64,
    pub end: u64,
    pub total_size: u64,
    pub file: FileEntry,
}

struct JobEntry {
    job: Arc<dyn FetchJob>,
    magnet: String,
    title: Option<String>,
    added_at: Instant,
    last_access: Mutex<Instant>,
    streaming_ready: AtomicBool,
}

impl JobEntry {
    fn touch(&self) {
        if let Ok(mut at) = self.last_access.lock() {
            *at = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_access
            .lock()
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }
}

/// The progressive fetch adapter's public face: owns the job table, applies
/// the readiness policy, and serves frontier-clamped byte ranges.
///
/// Constructed with `None` when no engine is present on this host; every
/// torrent operation then fails with `EngineUnavailable` while the rest of
/// the system runs untouched.
pub struct TorrentManager {
    engine: Option<Arc<dyn FetchEngine>>,
    jobs: DashMap<String, Arc<JobEntry>>,
    max_age: Duration,
}

impl TorrentManager {
    pub fn new(engine: Option<Arc<dyn FetchEngine>>, max_age: Duration) -> Self {
        Self {
            engine,
            jobs: DashMap::new(),
            max_age,
        }
    }

    pub fn enabled(&self) -> bool {
        self.engine.is_some()
    }

    /// Start (or reuse) a download for a magnet locator. A healthy existing
    /// job for the same magnet is shared under the new id rather than
    /// downloaded twice.
    pub fn add(
        &self,
        magnet: &str,
        title: Option<String>,
    ) -> Result<(String, TorrentStatus), TorrentError> {
        let engine = self
            .engine
            .as_ref()
            .ok_or(TorrentError::EngineUnavailable)?;

        let existing = self.jobs.iter().find_map(|entry| {
            let healthy =
                entry.magnet == magnet && entry.job.has_metadata() && entry.job.overall_progress() > 0.0;
            healthy.then(|| entry.value().clone())
        });

        let job_id = Uuid::new_v4().to_string();
        let entry = match existing {
            Some(shared) => {
                tracing::info!(job = %job_id, "reusing healthy torrent job for magnet");
                Arc::new(JobEntry {
                    job: shared.job.clone(),
                    magnet: magnet.to_string(),
                    title,
                    added_at: Instant::now(),
                    last_access: Mutex::new(Instant::now()),
                    streaming_ready: AtomicBool::new(
                        shared.streaming_ready.load(Ordering::Relaxed),
                    ),
                })
            }
            None => Arc::new(JobEntry {
                job: engine.add(magnet)?,
                magnet: magnet.to_string(),
                title,
                added_at: Instant::now(),
                last_access: Mutex::new(Instant::now()),
                streaming_ready: AtomicBool::new(false),
            }),
        };

        self.jobs.insert(job_id.clone(), entry);
        let status = self.status(&job_id)?;
        Ok((job_id, status))
    }

    fn entry(&self, job_id: &str) -> Result<Arc<JobEntry>, TorrentError> {
        self.jobs
            .get(job_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TorrentError::NotFound(job_id.to_string()))
    }

    /// Current snapshot of a job. Jobs stuck without metadata past the
    /// timeout are dropped here, on observation.
    pub fn status(&self, job_id: &str) -> Result<TorrentStatus, TorrentError> {
        let entry = self.entry(job_id)?;
        entry.touch();

        let has_metadata = entry.job.has_metadata();
        if !has_metadata && entry.added_at.elapsed() > METADATA_TIMEOUT {
            tracing::warn!(job = %job_id, "dropping stuck torrent job (no metadata)");
            self.remove(job_id);
            return Err(TorrentError::MetadataTimeout);
        }

        let files = entry.job.files();
        let total_size: u64 = files.iter().map(|f| f.size).sum();
        let largest_file = files
            .iter()
            .filter(|f| f.is_video)
            .max_by_key(|f| f.size)
            .cloned();
        let progress = entry.job.overall_progress();

        let (streaming_ready, file_progress, threshold) = match &largest_file {
            Some(file) => {
                let readiness = self.readiness_of(&entry, file);
                (readiness.ready, readiness.progress, readiness.threshold)
            }
            None => (false, 0.0, 0.10),
        };

        let status = if !has_metadata {
            "metadata"
        } else if progress >= 1.0 {
            "finished"
        } else {
            "downloading"
        };

        Ok(TorrentStatus {
            id: job_id.to_string(),
            name: entry
                .job
                .name()
                .or_else(|| entry.title.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            status: status.to_string(),
            progress,
            download_rate: entry.job.download_rate(),
            upload_rate: entry.job.upload_rate(),
            num_peers: entry.job.num_peers(),
            files,
            largest_file,
            total_size,
            has_metadata,
            streaming_ready,
            file_progress,
            streaming_threshold: threshold,
        })
    }

    fn readiness_of(&self, entry: &JobEntry, file: &FileEntry) -> FileReadiness {
        let threshold = streaming_threshold(&file.path);
        if file.size == 0 {
            return FileReadiness {
                ready: false,
                progress: 0.0,
                threshold,
            };
        }
        let frontier = entry.job.file_frontier(file.index);
        let progress = frontier as f64 / file.size as f64;
        let min_bytes = MIN_READY_BYTES.min(file.size / 20);
        let ready = progress >= threshold && frontier >= min_bytes;

        if ready && !entry.streaming_ready.swap(true, Ordering::Relaxed) {
            tracing::info!(
                file = %file.path,
                progress = format!("{:.1}%", progress * 100.0),
                "streaming ready"
            );
        }
        FileReadiness {
            ready,
            progress,
            threshold,
        }
    }

    /// Readiness of one file of a job, for gating the stream endpoint.
    pub fn file_readiness(
        &self,
        job_id: &str,
        file_index: usize,
    ) -> Result<FileReadiness, TorrentError> {
        let entry = self.entry(job_id)?;
        entry.touch();
        let files = entry.job.files();
        let file = files
            .get(file_index)
            .ok_or(TorrentError::UnknownFile(file_index))?;
        Ok(self.readiness_of(&entry, file))
    }

    /// Serve a byte range of one file, clamped to the downloaded frontier.
    ///
    /// The read cursor is hinted at `start` first so the engine shifts piece
    /// priority toward the playback position; this is what keeps sequential
    /// reads ahead of the download across seeks. A request slightly past
    /// the frontier waits (bounded) for the download; one far past it fails
    /// with `NotYetAvailable` for the client to retry with backoff.
    pub async fn read_range(
        &self,
        job_id: &str,
        file_index: usize,
        start: u64,
        end: Option<u64>,
    ) -> Result<RangeSlice, TorrentError> {
        let entry = self.entry(job_id)?;
        entry.touch();

        let files = entry.job.files();
        let file = files
            .get(file_index)
            .cloned()
            .ok_or(TorrentError::UnknownFile(file_index))?;
        if file.size == 0 || start >= file.size {
            return Err(TorrentError::RangeNotSatisfiable);
        }

        entry.job.hint_read_cursor(file_index, start);

        let mut frontier = entry.job.file_frontier(file_index);
        if start >= frontier {
            if start - frontier > NEAR_FRONTIER_WINDOW {
                return Err(TorrentError::NotYetAvailable);
            }
            let deadline = Instant::now() + FRONTIER_WAIT;
            while start >= frontier {
                if Instant::now() >= deadline {
                    return Err(TorrentError::NotYetAvailable);
                }
                tokio::time::sleep(FRONTIER_POLL).await;
                frontier = entry.job.file_frontier(file_index);
            }
        }

        let requested_end = end.unwrap_or(file.size - 1).min(file.size - 1);
        if requested_end < start {
            return Err(TorrentError::RangeNotSatisfiable);
        }
        let clamped_end = requested_end
            .min(frontier - 1)
            .min(start + STREAM_SLICE_MAX - 1);
        let len = (clamped_end - start + 1) as usize;

        let job = entry.job.clone();
        let bytes = tokio::task::spawn_blocking(move || job.read(file_index, start, len))
            .await
            .map_err(|e| TorrentError::Io(std::io::Error::other(e)))??;
        if bytes.is_empty() {
            return Err(TorrentError::NotYetAvailable);
        }

        let end = start + bytes.len() as u64 - 1;
        Ok(RangeSlice {
            bytes,
            start,
            end,
            total_size: file.size,
            file,
        })
    }

    /// Drop a job. The underlying download is cancelled once no other job
    /// id shares it.
    pub fn remove(&self, job_id: &str) -> bool {
        let Some((_, entry)) = self.jobs.remove(job_id) else {
            return false;
        };
        let shared = self
            .jobs
            .iter()
            .any(|other| Arc::ptr_eq(&other.job, &entry.job));
        if !shared {
            entry.job.cancel();
        }
        tracing::info!(job = %job_id, "torrent job removed");
        true
    }

    pub fn list(&self) -> Vec<TorrentStatus> {
        let ids: Vec<String> = self.jobs.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter_map(|id| self.status(id).ok())
            .collect()
    }

    /// Drop jobs idle past the configured age, bounding disk and bandwidth
    /// held by abandoned downloads.
    pub fn sweep(&self) -> usize {
        let stale: Vec<String> = self
            .jobs
            .iter()
            .filter(|entry| entry.idle_for() > self.max_age)
            .map(|entry| entry.key().clone())
            .collect();
        for id in &stale {
            tracing::info!(job = %id, "sweeping idle torrent job");
            self.remove(id);
        }
        stale.len()
    }
}
