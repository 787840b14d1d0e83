//! Progress aggregation and periodic reporting.
//!
//! Workers never touch counters directly. They send [`ProgressEvent`]s to a
//! single reporter task which owns every counter, so updates from any number
//! of workers are applied one at a time and none is lost.

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Something a worker did that the reporter needs to account for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProgressEvent {
    /// A segment was fully written to staging.
    SegmentWritten { bytes: u64 },
    /// A chunk was promoted into the destination.
    ChunkCompleted { chunk: u64, segments: u64, bytes: u64 },
    /// A chunk was abandoned after an error.
    ChunkFailed { chunk: u64 },
}

/// Cloneable sender side handed to every worker.
#[derive(Debug, Clone)]
pub(crate) struct ProgressHandle {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressHandle {
    pub(crate) fn segment_written(&self, bytes: u64) {
        self.send(ProgressEvent::SegmentWritten { bytes });
    }

    pub(crate) fn chunk_completed(&self, chunk: u64, segments: u64, bytes: u64) {
        self.send(ProgressEvent::ChunkCompleted {
            chunk,
            segments,
            bytes,
        });
    }

    pub(crate) fn chunk_failed(&self, chunk: u64) {
        self.send(ProgressEvent::ChunkFailed { chunk });
    }

    fn send(&self, event: ProgressEvent) {
        // The reporter only goes away once every handle is dropped.
        let _ = self.tx.send(event);
    }
}

/// Final counter values once every worker has finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ProgressTotals {
    /// Bytes written to staging, including chunks that later failed.
    pub staged_bytes: u64,
    pub staged_segments: u64,
    /// Bytes of promoted chunks only.
    pub total_bytes: u64,
    pub total_segments: u64,
    pub chunks_completed: u64,
    pub failed: Vec<u64>,
}

/// A periodic report, emitted every `report_every` completed chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProgressReport {
    pub done: u64,
    pub total: usize,
    pub window_chunks: u64,
    pub since_last: Duration,
    pub window_bytes: u64,
    pub staged_bytes: u64,
}

pub(crate) struct ProgressReporter {
    total: usize,
    report_every: u64,
    totals: ProgressTotals,
    window_bytes: u64,
    window_start: Instant,
    pb: ProgressBar,
}

impl ProgressReporter {
    pub(crate) fn new(total: usize, report_every: u64, pb: ProgressBar) -> Self {
        Self {
            total,
            report_every: report_every.max(1),
            totals: ProgressTotals::default(),
            window_bytes: 0,
            window_start: Instant::now(),
            pb,
        }
    }

    /// Starts the reporter task.
    ///
    /// The task ends once every [`ProgressHandle`] has been dropped and all
    /// queued events are applied, yielding the final totals.
    pub(crate) fn spawn(self) -> (ProgressHandle, JoinHandle<ProgressTotals>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (ProgressHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ProgressEvent>) -> ProgressTotals {
        while let Some(event) = rx.recv().await {
            if let Some(report) = self.apply(event) {
                let line = format_report(&report);
                self.pb.suspend(|| info!("{}", line));
            }
        }
        self.pb.finish_and_clear();
        self.totals
    }

    /// Applies one event, returning a report when a reporting window closes.
    pub(crate) fn apply(&mut self, event: ProgressEvent) -> Option<ProgressReport> {
        match event {
            ProgressEvent::SegmentWritten { bytes } => {
                self.totals.staged_bytes += bytes;
                self.totals.staged_segments += 1;
                self.window_bytes += bytes;
                self.pb.set_message(format!("{}", HumanBytes(self.totals.staged_bytes)));
                None
            }
            ProgressEvent::ChunkFailed { chunk } => {
                self.totals.failed.push(chunk);
                self.pb.inc(1);
                None
            }
            ProgressEvent::ChunkCompleted {
                chunk,
                segments,
                bytes,
            } => {
                self.totals.chunks_completed += 1;
                self.totals.total_segments += segments;
                self.totals.total_bytes += bytes;
                self.pb.inc(1);
                self.pb.set_message(format!(
                    "chunk {} done, {}",
                    chunk,
                    HumanBytes(self.totals.staged_bytes)
                ));
                if self.totals.chunks_completed % self.report_every != 0 {
                    return None;
                }
                let now = Instant::now();
                let report = ProgressReport {
                    done: self.totals.chunks_completed,
                    total: self.total,
                    window_chunks: self.report_every,
                    since_last: now.duration_since(self.window_start),
                    window_bytes: std::mem::take(&mut self.window_bytes),
                    staged_bytes: self.totals.staged_bytes,
                };
                self.window_start = now;
                Some(report)
            }
        }
    }
}

/// Progress bar shown while downloading; hidden when stderr is not a terminal.
pub(crate) fn chunk_progress_bar(total: usize) -> ProgressBar {
    if !atty::is(atty::Stream::Stderr) {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar().template(
        "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} chunks | {msg} | {elapsed_precise} elapsed, ETA {eta_precise}",
    ) {
        pb.set_style(style.progress_chars("█▓▒░ "));
    }
    pb
}

pub(crate) fn format_report(report: &ProgressReport) -> String {
    // Whole milliseconds keep humantime from printing nanosecond noise.
    let since_last = Duration::from_millis(report.since_last.as_millis() as u64);
    format!(
        "Downloaded {}/{} chunks; last {} chunks took {}; size: {} (total {})",
        report.done,
        report.total,
        report.window_chunks,
        humantime::format_duration(since_last),
        HumanBytes(report.window_bytes),
        HumanBytes(report.staged_bytes),
    )
}
