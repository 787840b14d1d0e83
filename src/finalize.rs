//! Promotion of fully staged chunks into the destination.

use crate::error::SyncError;
use crate::types::SegmentId;
use std::io;
use std::path::Path;
use tracing::debug;

/// Moves segments `0..segments` of `chunk` from staging into the destination.
///
/// Segment 0 is the presence marker, so it is handled at both ends:
///
/// 1. An existing destination copy of segment 0 is removed first, so an
///    older copy of the chunk no longer counts as present.
/// 2. Segments `segments - 1` down to `1` are renamed into place.
/// 3. Older destination segments at index `segments` and above are removed.
/// 4. Segment 0 is renamed last.
///
/// The first failure stops promotion and segment 0 stays in staging.
///
/// # Arguments
///
/// * `staging_dir` - Directory holding the staged segments
/// * `output_dir` - Destination directory (same filesystem as `staging_dir`)
/// * `chunk` - Chunk identifier
/// * `segments` - Number of staged segments
pub async fn promote_chunk(
    staging_dir: &Path,
    output_dir: &Path,
    chunk: u64,
    segments: u64,
) -> Result<(), SyncError> {
    if segments == 0 {
        return Ok(());
    }

    if remove_if_present(&SegmentId::new(chunk, 0).path_in(output_dir))
        .await
        .map_err(|source| SyncError::StaleSegment {
            chunk,
            segment: 0,
            source,
        })?
    {
        debug!(chunk, "Removed previous copy of segment 0");
    }

    for index in (1..segments).rev() {
        rename_segment(staging_dir, output_dir, SegmentId::new(chunk, index)).await?;
    }

    let stale = remove_stale_segments(output_dir, chunk, segments).await?;
    if stale > 0 {
        debug!(chunk, stale, "Removed stale segments past the new end of chunk");
    }

    rename_segment(staging_dir, output_dir, SegmentId::new(chunk, 0)).await?;
    debug!(chunk, segments, "Promoted chunk");
    Ok(())
}

async fn rename_segment(staging_dir: &Path, output_dir: &Path, id: SegmentId) -> Result<(), SyncError> {
    tokio::fs::rename(id.path_in(staging_dir), id.path_in(output_dir))
        .await
        .map_err(|source| SyncError::Promotion {
            chunk: id.chunk,
            segment: id.index,
            source,
        })
}

/// Removes `<chunk>_<k>` for `k = from, from + 1, …` until one is missing.
async fn remove_stale_segments(output_dir: &Path, chunk: u64, from: u64) -> Result<u64, SyncError> {
    let mut index = from;
    loop {
        let removed = remove_if_present(&SegmentId::new(chunk, index).path_in(output_dir))
            .await
            .map_err(|source| SyncError::StaleSegment {
                chunk,
                segment: index,
                source,
            })?;
        if !removed {
            return Ok(index - from);
        }
        index += 1;
    }
}

async fn remove_if_present(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
