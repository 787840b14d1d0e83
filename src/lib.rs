//! ChunkSync - Resumable, concurrent downloader for segmented chunk archives
//!
//! A remote server exposes a dense range of chunks, each split into an
//! unknown number of segments served as `<base_url>/<chunk>_<segment>`. This
//! library mirrors them into a local directory with the same file names.
//!
//! # Features
//!
//! - **Resumable Downloads**: Chunks whose segment 0 already exists are skipped
//! - **Crash Safety**: Segments are staged, then promoted with segment 0 last
//! - **Worker Pool**: A fixed number of workers drain a shared work queue
//! - **Progress Tracking**: Periodic throughput reports and a run summary
//! - **Cancellation**: Stops cleanly between segments or chunks
//!
//! # Example
//!
//! ```no_run
//! use chunksync::{download_chunks, DownloadConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DownloadConfig {
//!     base_url: "https://example.com/da".to_string(),
//!     output_dir: "./chunks".into(),
//!     last_chunk: 5_000,
//!     ..Default::default()
//! };
//!
//! let summary = download_chunks(&config).await?;
//! println!("{} bytes downloaded", summary.total_bytes);
//! # Ok(())
//! # }
//! ```

mod error;
mod fetch;
mod finalize;
mod inventory;
mod orchestrator;
mod progress;
mod types;

pub use error::SyncError;
pub use finalize::promote_chunk;
pub use inventory::scan_work_list;
pub use orchestrator::{download_chunks, download_chunks_with_cancel};
pub use types::{DownloadConfig, DownloadSummary, EndOfStreamPolicy, SegmentId, STAGING_DIR_NAME};

/// Re-exported so callers can stop a run without depending on `tokio-util`.
pub use tokio_util::sync::CancellationToken;
