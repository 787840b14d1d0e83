//! Data structures shared by the scanner, fetcher and worker pool.

use crate::error::SyncError;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the staging subdirectory under the destination.
pub const STAGING_DIR_NAME: &str = "tmp";

/// A single fetch unit, `(chunk, index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId {
    pub chunk: u64,
    pub index: u64,
}

impl SegmentId {
    pub fn new(chunk: u64, index: u64) -> Self {
        Self { chunk, index }
    }

    /// File name used both remotely and on disk, `<chunk>_<index>`.
    pub fn file_name(&self) -> String {
        format!("{}_{}", self.chunk, self.index)
    }

    /// Full URL of this segment under `base_url`.
    pub fn url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.file_name())
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.chunk, self.index)
    }
}

/// What a worker does after finding a chunk with no segments at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndOfStreamPolicy {
    /// Signal every worker to stop at its next queue pull.
    #[default]
    StopAll,
    /// Only the worker that found the empty chunk stops; the others keep
    /// draining the queue.
    StopWorker,
}

/// Configuration for a download run.
///
/// # Example
///
/// ```
/// use chunksync::DownloadConfig;
///
/// let config = DownloadConfig {
///     base_url: "https://example.com/da".to_string(),
///     output_dir: "./chunks".into(),
///     last_chunk: 1_000,
///     workers: 8,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Base URL segments are served under (`<base_url>/<chunk>_<segment>`).
    pub base_url: String,
    /// Destination directory for completed segments.
    pub output_dir: PathBuf,
    /// Highest chunk identifier to consider, inclusive.
    pub last_chunk: u64,
    /// Re-download every chunk in `[reset_from, last_chunk]` even if present.
    ///
    /// `Some(0)` is treated the same as `None`.
    pub reset_from: Option<u64>,
    /// Number of concurrent workers (default: 4).
    pub workers: usize,
    /// Emit a progress report every this many completed chunks (default: 100).
    pub report_every: u64,
    /// Total timeout for a single segment request (default: 60s).
    pub request_timeout: Duration,
    /// Connect timeout for a single segment request (default: 10s).
    pub connect_timeout: Duration,
    /// Abort a chunk whose segment index reaches this value (default: 100000).
    pub max_segments_per_chunk: u64,
    /// Reaction to a chunk with zero segments.
    pub end_of_stream: EndOfStreamPolicy,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            output_dir: PathBuf::from("."),
            last_chunk: 0,
            reset_from: None,
            workers: 4,
            report_every: 100,
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            max_segments_per_chunk: 100_000,
            end_of_stream: EndOfStreamPolicy::default(),
        }
    }
}

impl DownloadConfig {
    /// Rejects configurations that cannot run.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.base_url.trim().is_empty() {
            return Err(SyncError::Usage("base URL must not be empty".into()));
        }
        if self.workers == 0 {
            return Err(SyncError::Usage("worker count must be at least 1".into()));
        }
        if self.report_every == 0 {
            return Err(SyncError::Usage("report interval must be at least 1".into()));
        }
        if self.max_segments_per_chunk == 0 {
            return Err(SyncError::Usage(
                "segment limit per chunk must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The staging directory, `<output_dir>/tmp`.
    pub fn staging_dir(&self) -> PathBuf {
        self.output_dir.join(STAGING_DIR_NAME)
    }
}

/// Outcome of a download run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Number of chunks in the work list.
    pub planned: usize,
    /// Chunks fully promoted into the destination.
    pub completed: u64,
    /// Chunks that hit a transport, staging or promotion error, ascending.
    pub failed: Vec<u64>,
    /// Bytes of every segment promoted into the destination.
    pub total_bytes: u64,
    /// Segments promoted into the destination.
    pub total_segments: u64,
    /// Bytes written to staging, including chunks that later failed or were
    /// cancelled.
    pub staged_bytes: u64,
    /// Segments written to staging, including chunks that later failed or
    /// were cancelled.
    pub staged_segments: u64,
    /// Lowest chunk found to have no segments, if any.
    pub stream_end: Option<u64>,
    /// Whether the run was stopped by the caller.
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl DownloadSummary {
    /// Persists the summary as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), SyncError> {
        let summary_json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, summary_json)?;
        Ok(())
    }

    /// Whether the run finished with no failed chunk and no cancellation.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}
