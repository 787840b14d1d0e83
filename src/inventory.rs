//! Local inventory scan: which chunks still need downloading.

use crate::error::SyncError;
use crate::types::SegmentId;
use std::collections::HashSet;
use std::io;
use std::path::Path;
use tracing::debug;

/// Builds the ordered, de-duplicated work list for a run.
///
/// A chunk is considered present when its segment 0 exists in `output_dir`.
/// The list holds every absent chunk in `[0, last_chunk]` in ascending order,
/// followed by every chunk of `[reset_from, last_chunk]` not already listed.
/// The reset range bypasses the presence check.
///
/// # Arguments
///
/// * `output_dir` - Destination directory holding completed segments
/// * `reset_from` - Optional start of a range to force re-downloading (`0` is ignored)
/// * `last_chunk` - Highest chunk identifier, inclusive
///
/// # Returns
///
/// The work list, or [`SyncError::Scan`] if any candidate path could not be
/// inspected for a reason other than not existing.
pub async fn scan_work_list(
    output_dir: &Path,
    reset_from: Option<u64>,
    last_chunk: u64,
) -> Result<Vec<u64>, SyncError> {
    let mut chunks = Vec::new();

    for chunk in 0..=last_chunk {
        let path = SegmentId::new(chunk, 0).path_in(output_dir);
        if !segment_exists(&path).await? {
            chunks.push(chunk);
        }
    }
    let missing = chunks.len();

    if let Some(reset_from) = reset_from.filter(|&r| r > 0) {
        chunks.extend(reset_from..=last_chunk);
    }

    let chunks = dedup_preserving_order(chunks);
    debug!(
        missing,
        planned = chunks.len(),
        "Scanned {} for chunks up to {}",
        output_dir.display(),
        last_chunk
    );
    Ok(chunks)
}

async fn segment_exists(path: &Path) -> Result<bool, SyncError> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(SyncError::Scan {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn dedup_preserving_order(chunks: Vec<u64>) -> Vec<u64> {
    let mut seen = HashSet::with_capacity(chunks.len());
    chunks.into_iter().filter(|c| seen.insert(*c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[tokio::test]
    async fn test_empty_destination_lists_every_chunk() {
        let dir = tempdir().unwrap();
        let chunks = scan_work_list(dir.path(), None, 2).await.unwrap();
        assert_eq!(chunks, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_present_chunks_are_skipped() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "0_0");
        touch(dir.path(), "2_0");
        // Only a higher segment of chunk 3: still missing.
        touch(dir.path(), "3_1");
        let chunks = scan_work_list(dir.path(), None, 4).await.unwrap();
        assert_eq!(chunks, vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn test_reset_range_refetches_present_chunks() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "0_0");
        touch(dir.path(), "1_0");
        touch(dir.path(), "2_0");
        let chunks = scan_work_list(dir.path(), Some(2), 3).await.unwrap();
        assert_eq!(chunks, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_overlapping_reset_range_is_deduplicated() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "1_0");
        let chunks = scan_work_list(dir.path(), Some(1), 4).await.unwrap();
        assert_eq!(chunks, vec![0, 2, 3, 4, 1]);
    }

    #[tokio::test]
    async fn test_reset_from_zero_is_ignored() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "0_0");
        let chunks = scan_work_list(dir.path(), Some(0), 1).await.unwrap();
        assert_eq!(chunks, vec![1]);
    }

    #[tokio::test]
    async fn test_reset_past_last_chunk_adds_nothing() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "0_0");
        let chunks = scan_work_list(dir.path(), Some(5), 1).await.unwrap();
        assert_eq!(chunks, vec![1]);
    }

    #[tokio::test]
    async fn test_unreadable_destination_fails_scan() {
        let dir = tempdir().unwrap();
        // A regular file where a directory is expected: stat on `file/0_0`
        // fails with something other than NotFound.
        let not_a_dir = dir.path().join("plain-file");
        std::fs::write(&not_a_dir, b"").unwrap();
        let err = scan_work_list(&not_a_dir, None, 3).await.unwrap_err();
        assert!(matches!(err, SyncError::Scan { .. }), "got {err:?}");
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        assert_eq!(dedup_preserving_order(vec![3, 1, 3, 2, 1]), vec![3, 1, 2]);
    }
}
