//! Segment download loop for a single chunk.

use crate::error::SyncError;
use crate::progress::ProgressHandle;
use crate::types::{DownloadConfig, SegmentId};
use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of probing and staging every segment of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchOutcome {
    /// Segments `0..segments` are in staging.
    Staged { segments: u64, bytes: u64 },
    /// Segment 0 was not found: the chunk has no segments.
    Empty,
    /// The run was cancelled before the chunk finished.
    Cancelled,
}

/// Builds the HTTP client shared by every worker.
pub(crate) fn build_client(config: &DownloadConfig) -> Result<Client, SyncError> {
    Client::builder()
        .timeout(config.request_timeout)
        .connect_timeout(config.connect_timeout)
        .build()
        .map_err(|source| SyncError::Http {
            url: config.base_url.clone(),
            source,
        })
}

/// Fetches segments `0, 1, 2, …` of a chunk into the staging directory.
pub(crate) struct SegmentFetcher {
    client: Client,
    base_url: String,
    staging_dir: PathBuf,
    max_segments: u64,
    progress: ProgressHandle,
}

impl SegmentFetcher {
    pub(crate) fn new(client: Client, config: &DownloadConfig, progress: ProgressHandle) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            staging_dir: config.staging_dir(),
            max_segments: config.max_segments_per_chunk,
            progress,
        }
    }

    /// Downloads every segment of `chunk` until the server answers not-found.
    ///
    /// Any error aborts the chunk immediately. Segments staged before the
    /// error are left in staging and overwritten when the chunk is retried.
    pub(crate) async fn fetch_chunk(
        &self,
        chunk: u64,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, SyncError> {
        let mut bytes = 0u64;
        let mut index = 0u64;

        loop {
            if index >= self.max_segments {
                return Err(SyncError::SegmentLimit {
                    chunk,
                    limit: self.max_segments,
                });
            }
            if cancel.is_cancelled() {
                return Ok(FetchOutcome::Cancelled);
            }

            let id = SegmentId::new(chunk, index);
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    discard_partial(&id.path_in(&self.staging_dir)).await;
                    return Ok(FetchOutcome::Cancelled);
                }
                result = self.fetch_segment(id) => result?,
            };

            match fetched {
                Some(written) => {
                    bytes += written;
                    self.progress.segment_written(written);
                    index += 1;
                }
                None if index == 0 => return Ok(FetchOutcome::Empty),
                None => {
                    debug!(chunk, segments = index, bytes, "Staged chunk");
                    return Ok(FetchOutcome::Staged {
                        segments: index,
                        bytes,
                    });
                }
            }
        }
    }

    /// Fetches one segment into staging.
    ///
    /// Returns `Ok(None)` on not-found, or the number of bytes written.
    async fn fetch_segment(&self, id: SegmentId) -> Result<Option<u64>, SyncError> {
        let url = id.url(&self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| SyncError::Http {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SyncError::Transport { url, status });
        }

        let path = id.path_in(&self.staging_dir);
        match stream_to_file(response, &path, &url).await {
            Ok(written) => Ok(Some(written)),
            Err(e) => {
                discard_partial(&path).await;
                Err(e)
            }
        }
    }
}

/// Streams a response body into `path`, returning the bytes written.
async fn stream_to_file(response: Response, path: &Path, url: &str) -> Result<u64, SyncError> {
    let staging_err = |source| SyncError::StagingWrite {
        path: path.to_path_buf(),
        source,
    };

    let file = tokio::fs::File::create(path).await.map_err(staging_err)?;
    let mut file = BufWriter::new(file);
    let mut written = 0u64;

    let mut byte_stream = response.bytes_stream();
    while let Some(piece) = byte_stream.next().await {
        let piece = piece.map_err(|source| SyncError::Http {
            url: url.to_string(),
            source,
        })?;
        file.write_all(&piece).await.map_err(staging_err)?;
        written += piece.len() as u64;
    }
    file.flush().await.map_err(staging_err)?;
    file.into_inner().sync_all().await.map_err(staging_err)?;

    Ok(written)
}

async fn discard_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial segment {}: {}", path.display(), e);
        }
    }
}
