//! Chunk bookkeeping for resumable transfers.
//!
//! A [`ChunkTracker`] records which chunks of a file have been persisted. It
//! is saved as a JSON sidecar (`<file>.state`) after every persisted chunk,
//! so a crash leaves a sidecar whose content is a lower bound on what is
//! actually on disk. The sidecar is deleted on successful completion and
//! retained on abort to enable resume.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Persistent record of received chunks for one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkTracker {
    /// Total size of the file in bytes
    pub file_size: u64,
    /// Chunk size the transfer was split with
    pub chunk_size: u32,
    /// Indices of chunks that have been persisted
    pub received_chunks: BTreeSet<u32>,
}

impl ChunkTracker {
    /// Create an empty tracker for a file of `file_size` bytes.
    #[must_use]
    pub const fn new(file_size: u64, chunk_size: u32) -> Self {
        Self {
            file_size,
            chunk_size,
            received_chunks: BTreeSet::new(),
        }
    }

    /// Number of chunks the file splits into (`⌈file_size / chunk_size⌉`).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn total_chunks(&self) -> u32 {
        (self.file_size.div_ceil(self.chunk_size as u64)) as u32
    }

    /// Mark one chunk as received.
    ///
    /// Indices outside `[0, total_chunks)` are rejected.
    pub fn mark(&mut self, chunk: u32) -> Result<()> {
        if chunk >= self.total_chunks() {
            return Err(Error::ChunkOutOfRange {
                chunk,
                total: self.total_chunks(),
            });
        }
        self.received_chunks.insert(chunk);
        Ok(())
    }

    /// Mark a set of chunks as received.
    pub fn mark_many<I: IntoIterator<Item = u32>>(&mut self, chunks: I) -> Result<()> {
        for chunk in chunks {
            self.mark(chunk)?;
        }
        Ok(())
    }

    /// Whether a chunk has been received.
    #[must_use]
    pub fn contains(&self, chunk: u32) -> bool {
        self.received_chunks.contains(&chunk)
    }

    /// Chunk indices not yet received, in ascending order.
    #[must_use]
    pub fn missing(&self) -> BTreeSet<u32> {
        (0..self.total_chunks())
            .filter(|chunk| !self.received_chunks.contains(chunk))
            .collect()
    }

    /// Whether every chunk has been received.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received_chunks.len() as u64 == u64::from(self.total_chunks())
    }

    /// Bytes covered by the received chunks.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.received_chunks
            .iter()
            .map(|&chunk| self.chunk_len(chunk))
            .sum()
    }

    /// Length in bytes of chunk `chunk` (the last chunk may be shorter).
    #[must_use]
    pub fn chunk_len(&self, chunk: u32) -> u64 {
        let start = u64::from(chunk) * u64::from(self.chunk_size);
        self.file_size
            .saturating_sub(start)
            .min(u64::from(self.chunk_size))
    }

    /// Save the tracker as JSON at `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_vec_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a tracker from the JSON at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        serde_json::from_slice(&data).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Sidecar path for a transfer target (`<file>.state`).
#[must_use]
pub fn sidecar_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
    name.push_str(".state");
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn total_chunks_arithmetic() {
        assert_eq!(ChunkTracker::new(0, 8192).total_chunks(), 0);
        assert_eq!(ChunkTracker::new(1, 8192).total_chunks(), 1);
        assert_eq!(ChunkTracker::new(8192, 8192).total_chunks(), 1);
        assert_eq!(ChunkTracker::new(8193, 8192).total_chunks(), 2);
        assert_eq!(ChunkTracker::new(10, 8).total_chunks(), 2);
    }

    #[test]
    fn mark_and_missing() {
        let mut tracker = ChunkTracker::new(10, 8);
        tracker.mark(0).expect("mark chunk 0");
        assert!(tracker.contains(0));
        assert!(!tracker.contains(1));
        assert_eq!(tracker.missing(), BTreeSet::from([1]));
        assert!(!tracker.is_complete());

        tracker.mark(1).expect("mark chunk 1");
        assert!(tracker.missing().is_empty());
        assert!(tracker.is_complete());
    }

    #[test]
    fn mark_rejects_out_of_range() {
        let mut tracker = ChunkTracker::new(10, 8);
        let err = tracker.mark(2).unwrap_err();
        assert!(matches!(err, Error::ChunkOutOfRange { chunk: 2, total: 2 }));
        assert!(tracker.received_chunks.is_empty());
    }

    #[test]
    fn empty_file_has_no_chunks_and_is_complete() {
        let tracker = ChunkTracker::new(0, 8192);
        assert!(tracker.is_complete());
        assert!(tracker.missing().is_empty());
    }

    #[test]
    fn mark_many_is_idempotent() {
        let mut tracker = ChunkTracker::new(24, 8);
        tracker.mark_many([0, 2, 0, 2]).expect("mark many");
        assert_eq!(tracker.received_chunks, BTreeSet::from([0, 2]));
        assert_eq!(tracker.missing(), BTreeSet::from([1]));
    }

    #[test]
    fn chunk_lengths() {
        let tracker = ChunkTracker::new(10, 8);
        assert_eq!(tracker.chunk_len(0), 8);
        assert_eq!(tracker.chunk_len(1), 2);
        assert_eq!(tracker.bytes_received(), 0);

        let mut tracker = tracker;
        tracker.mark_many([0, 1]).expect("mark");
        assert_eq!(tracker.bytes_received(), 10);
    }

    #[test]
    fn save_load_round_trip() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("x.state");

        let mut tracker = ChunkTracker::new(10, 8);
        tracker.mark(0).expect("mark");
        tracker.save(&path).expect("save");

        let loaded = ChunkTracker::load(&path).expect("load");
        assert_eq!(loaded, tracker);
    }

    #[test]
    fn sidecar_json_schema() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("x.state");

        let mut tracker = ChunkTracker::new(10, 8);
        tracker.mark(1).expect("mark");
        tracker.save(&path).expect("save");

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).expect("read")).expect("json");
        assert_eq!(raw["file_size"], 10);
        assert_eq!(raw["chunk_size"], 8);
        assert_eq!(raw["received_chunks"], serde_json::json!([1]));
    }

    #[test]
    fn sidecar_path_appends_state() {
        assert_eq!(
            sidecar_path(Path::new("/tmp/dl/file.bin")),
            PathBuf::from("/tmp/dl/file.bin.state")
        );
    }
}
