//! Main orchestration logic: scan, then drain the work list with a worker pool.

use crate::error::SyncError;
use crate::fetch::{build_client, FetchOutcome, SegmentFetcher};
use crate::finalize::promote_chunk;
use crate::inventory::scan_work_list;
use crate::progress::{chunk_progress_bar, ProgressHandle, ProgressReporter};
use crate::types::{DownloadConfig, DownloadSummary, EndOfStreamPolicy};
use indicatif::HumanBytes;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Downloads every missing chunk described by `config`.
///
/// This is the main entry point. It performs the following steps:
///
/// 1. Validates the configuration and creates the destination and staging directories
/// 2. Scans the destination for chunks whose segment 0 is missing
/// 3. Fetches and promotes those chunks with `config.workers` concurrent workers
/// 4. Returns the aggregated counters once every worker is done
///
/// Per-chunk failures are logged and listed in the summary; only
/// configuration, setup and scan errors are returned as `Err`.
///
/// # Example
///
/// ```no_run
/// use chunksync::{download_chunks, DownloadConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = DownloadConfig {
///     base_url: "https://example.com/da".to_string(),
///     output_dir: "./chunks".into(),
///     last_chunk: 5_000,
///     ..Default::default()
/// };
/// let summary = download_chunks(&config).await?;
/// println!("{} chunks downloaded", summary.completed);
/// # Ok(())
/// # }
/// ```
pub async fn download_chunks(config: &DownloadConfig) -> Result<DownloadSummary, SyncError> {
    download_chunks_with_cancel(config, CancellationToken::new()).await
}

/// Like [`download_chunks`], stopping early once `cancel` fires.
///
/// Cancellation is honored between chunks, between segments and while a
/// request is in flight. A chunk that is already being promoted is always
/// promoted to the end.
pub async fn download_chunks_with_cancel(
    config: &DownloadConfig,
    cancel: CancellationToken,
) -> Result<DownloadSummary, SyncError> {
    config.validate()?;
    let started = Instant::now();

    let staging_dir = config.staging_dir();
    tokio::fs::create_dir_all(&staging_dir).await?;

    let chunks = scan_work_list(&config.output_dir, config.reset_from, config.last_chunk).await?;
    let planned = chunks.len();
    info!("Starting download for {} chunks", planned);

    let client = build_client(config)?;
    let (progress, reporter) =
        ProgressReporter::new(planned, config.report_every, chunk_progress_bar(planned)).spawn();
    let fetcher = Arc::new(SegmentFetcher::new(client, config, progress.clone()));
    let queue = WorkQueue::seeded(chunks);
    let stream_end = CancellationToken::new();

    let mut workers = Vec::with_capacity(config.workers);
    for id in 0..config.workers {
        let worker = Worker {
            id,
            fetcher: Arc::clone(&fetcher),
            queue: queue.clone(),
            progress: progress.clone(),
            output_dir: config.output_dir.clone(),
            staging_dir: staging_dir.clone(),
            policy: config.end_of_stream,
            stream_end: stream_end.clone(),
            cancel: cancel.clone(),
        };
        workers.push(tokio::spawn(worker.run()));
    }
    // The reporter finishes once the workers drop the last handles.
    drop(fetcher);
    drop(progress);

    let mut boundary: Option<u64> = None;
    for task in workers {
        match task.await {
            Ok(Some(chunk)) => boundary = Some(boundary.map_or(chunk, |b| b.min(chunk))),
            Ok(None) => {}
            Err(e) => error!("Worker task failed: {}", e),
        }
    }

    let totals = reporter
        .await
        .map_err(|e| SyncError::Io(std::io::Error::other(format!("Task join error: {}", e))))?;

    let mut failed = totals.failed;
    failed.sort_unstable();
    let summary = DownloadSummary {
        planned,
        completed: totals.chunks_completed,
        failed,
        total_bytes: totals.total_bytes,
        total_segments: totals.total_segments,
        staged_bytes: totals.staged_bytes,
        staged_segments: totals.staged_segments,
        stream_end: boundary,
        cancelled: cancel.is_cancelled(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    info!(
        "Chunks downloaded: {}/{}; total size: {}; total segments: {}",
        summary.completed,
        summary.planned,
        HumanBytes(summary.total_bytes),
        summary.total_segments
    );
    if let Some(chunk) = summary.stream_end {
        info!("Chunk sequence ended at chunk {}", chunk);
    }
    if !summary.failed.is_empty() {
        warn!(
            "{} chunks failed and will be retried on the next run: {:?}",
            summary.failed.len(),
            summary.failed
        );
    }

    Ok(summary)
}

/// Multi-consumer view of a channel that is fully seeded and closed up front.
#[derive(Clone)]
struct WorkQueue {
    rx: Arc<Mutex<mpsc::Receiver<u64>>>,
}

impl WorkQueue {
    fn seeded(chunks: Vec<u64>) -> Self {
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            // Capacity covers every chunk, so this never fails.
            let _ = tx.try_send(chunk);
        }
        // Dropping the only sender closes the queue.
        drop(tx);
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Next chunk, or `None` once the queue is drained.
    async fn next(&self) -> Option<u64> {
        self.rx.lock().await.recv().await
    }
}

enum Step {
    Continue,
    Stop,
}

struct Worker {
    id: usize,
    fetcher: Arc<SegmentFetcher>,
    queue: WorkQueue,
    progress: ProgressHandle,
    output_dir: PathBuf,
    staging_dir: PathBuf,
    policy: EndOfStreamPolicy,
    stream_end: CancellationToken,
    cancel: CancellationToken,
}

impl Worker {
    /// Drains the queue one chunk at a time.
    ///
    /// Returns the chunk this worker found to have no segments, if any.
    async fn run(self) -> Option<u64> {
        let mut boundary = None;
        loop {
            if self.cancel.is_cancelled() {
                debug!(worker = self.id, "Cancelled; stopping");
                break;
            }
            if self.stream_end.is_cancelled() {
                debug!(worker = self.id, "Chunk sequence ended; stopping");
                break;
            }
            let Some(chunk) = self.queue.next().await else {
                break;
            };
            match self.process(chunk).await {
                Step::Continue => {}
                Step::Stop => {
                    if !self.cancel.is_cancelled() {
                        boundary = Some(chunk);
                    }
                    break;
                }
            }
        }
        boundary
    }

    /// Promotes a fully staged chunk.
    ///
    /// Never consults the cancellation token. A chunk whose promotion has
    /// started is promoted to the end.
    async fn finish_chunk(&self, chunk: u64, segments: u64, bytes: u64) {
        match promote_chunk(&self.staging_dir, &self.output_dir, chunk, segments).await {
            Ok(()) => {
                debug!(
                    worker = self.id,
                    chunk,
                    segments,
                    bytes,
                    "Chunk downloaded"
                );
                self.progress.chunk_completed(chunk, segments, bytes);
            }
            Err(e) => {
                error!(
                    worker = self.id,
                    chunk,
                    error = %e,
                    "Failed to promote chunk; its segments remain in {}",
                    self.staging_dir.display()
                );
                self.progress.chunk_failed(chunk);
            }
        }
    }

    async fn process(&self, chunk: u64) -> Step {
        match self.fetcher.fetch_chunk(chunk, &self.cancel).await {
            Ok(FetchOutcome::Staged { segments, bytes }) => {
                self.finish_chunk(chunk, segments, bytes).await;
                Step::Continue
            }
            Ok(FetchOutcome::Empty) => {
                warn!(
                    worker = self.id,
                    chunk, "Chunk has no segments; the chunk sequence appears to have ended"
                );
                if self.policy == EndOfStreamPolicy::StopAll {
                    self.stream_end.cancel();
                }
                Step::Stop
            }
            Ok(FetchOutcome::Cancelled) => {
                info!(worker = self.id, chunk, "Download cancelled; chunk left incomplete");
                Step::Stop
            }
            Err(e) => {
                error!(
                    worker = self.id,
                    chunk,
                    error = %e,
                    "Chunk download failed; it will be retried on the next run"
                );
                self.progress.chunk_failed(chunk);
                Step::Continue
            }
        }
    }
}
