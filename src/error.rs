//! Error types for chunk download operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while scanning, fetching or promoting chunks.
///
/// Only [`SyncError::Usage`], [`SyncError::Scan`] and setup-time
/// [`SyncError::Io`] failures abort a run. Everything else is scoped to a
/// single chunk and is logged by the worker that hit it.
#[derive(Error, Debug)]
pub enum SyncError {
    /// I/O error while preparing the destination or staging directories.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The destination inventory could not be read.
    #[error("failed to inspect {}: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The HTTP request itself failed (connect, timeout, body read).
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a status other than success or not-found.
    #[error("unexpected status {status} from {url}")]
    Transport {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Writing a fetched segment into the staging area failed.
    #[error("failed to stage {}: {source}", path.display())]
    StagingWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Moving a staged segment into the destination failed.
    #[error("failed to promote segment {chunk}_{segment}: {source}")]
    Promotion {
        chunk: u64,
        segment: u64,
        #[source]
        source: io::Error,
    },

    /// An older copy of a segment could not be removed from the destination.
    #[error("failed to remove stale segment {chunk}_{segment}: {source}")]
    StaleSegment {
        chunk: u64,
        segment: u64,
        #[source]
        source: io::Error,
    },

    /// A chunk kept producing segments past the configured limit.
    #[error("chunk {chunk} exceeded the limit of {limit} segments")]
    SegmentLimit { chunk: u64, limit: u64 },

    /// Invalid or missing configuration.
    #[error("invalid configuration: {0}")]
    Usage(String),

    /// The run summary could not be serialized.
    #[error(transparent)]
    Summary(#[from] serde_json::Error),
}
