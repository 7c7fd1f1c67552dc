//! Root-confined file store and transfer staging.
//!
//! One [`FileStore`] serves one session. It owns:
//!
//! - the published namespace under `root_dir` (listing, chunked reads,
//!   publish),
//! - the session's staging area (chunked random-access writes to a memory
//!   buffer or a temp file, selected by [`StorageMode`]),
//! - at most one live [`TransferContext`] — a new request supersedes the
//!   previous context,
//! - preserved partials: staging for an incomplete upload survives session
//!   close under `partial/` in the shared temp root so a later session can
//!   resume it.
//!
//! Every peer-supplied path is resolved relative to the root and must not
//! escape it; the check canonicalises the nearest existing ancestor so
//! symlinks cannot smuggle a path outside.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::{debug, warn};

use crate::config::{StorageMode, HYBRID_MEMORY_THRESHOLD};
use crate::error::{Error, Result};
use crate::frame::crc32;
use crate::message::{ListEntry, ListFilter};
use crate::tracker::ChunkTracker;

/// Staging placement of one in-progress transfer.
#[derive(Debug)]
enum Staging {
    /// Assembled in a byte buffer
    Memory(Vec<u8>),
    /// Assembled in a temp file
    Disk(PathBuf),
}

/// State of a single file transfer within a session.
#[derive(Debug)]
pub struct TransferContext {
    /// Session-scoped transfer id
    pub transfer_id: u64,
    /// Requested path, relative to the root
    pub filename: String,
    target: PathBuf,
    tracker: Option<ChunkTracker>,
    staging: Option<Staging>,
    completed: bool,
}

impl TransferContext {
    /// Authoritative size, once declared.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.tracker.as_ref().map(|t| t.file_size)
    }

    /// Chunk bookkeeping, once the size is declared.
    #[must_use]
    pub const fn tracker(&self) -> Option<&ChunkTracker> {
        self.tracker.as_ref()
    }

    /// Whether any chunk has been persisted yet.
    #[must_use]
    pub fn has_received_chunks(&self) -> bool {
        self.tracker
            .as_ref()
            .is_some_and(|t| !t.received_chunks.is_empty())
    }

    /// Whether the transfer committed.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }
}

/// Root-confined store with per-session staging.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    canonical_root: PathBuf,
    staging_dir: PathBuf,
    partial_dir: PathBuf,
    chunk_size: u32,
    storage_mode: StorageMode,
    max_memory_bytes: u64,
    memory_used: u64,
    next_transfer_id: u64,
    context: Option<TransferContext>,
}

impl FileStore {
    /// Create a store rooted at `root`, staging into `staging_dir`.
    ///
    /// `partial_dir` is the shared location for preserved partial uploads;
    /// all three directories are created if absent.
    pub fn new(
        root: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
        partial_dir: impl Into<PathBuf>,
        chunk_size: u32,
        storage_mode: StorageMode,
        max_memory_bytes: u64,
    ) -> Result<Self> {
        let root = root.into();
        let staging_dir = staging_dir.into();
        let partial_dir = partial_dir.into();

        fs::create_dir_all(&root)?;
        fs::create_dir_all(&staging_dir)?;
        fs::create_dir_all(&partial_dir)?;

        let canonical_root = root.canonicalize()?;

        Ok(Self {
            root,
            canonical_root,
            staging_dir,
            partial_dir,
            chunk_size,
            storage_mode,
            max_memory_bytes,
            memory_used: 0,
            next_transfer_id: 1,
            context: None,
        })
    }

    /// Chunk size of this store.
    #[must_use]
    pub const fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// The live transfer context, if any.
    #[must_use]
    pub const fn context(&self) -> Option<&TransferContext> {
        self.context.as_ref()
    }

    // ── Path confinement ─────────────────────────────────────────────

    /// Resolve a peer-supplied relative path under the root.
    ///
    /// Rejects absolute paths and any `..` component, then verifies that the
    /// nearest existing ancestor canonicalises inside the root (so symlinks
    /// cannot lead outside). An empty path resolves to the root itself.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let mut clean = PathBuf::new();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(Error::PathEscapesRoot(relative.to_string()));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::InvalidPath(format!("absolute path: {relative}")));
                }
            }
        }

        let candidate = self.root.join(&clean);

        let mut probe = candidate.as_path();
        while !probe.exists() {
            probe = probe
                .parent()
                .ok_or_else(|| Error::PathEscapesRoot(relative.to_string()))?;
        }
        let canonical = probe.canonicalize()?;
        if !canonical.starts_with(&self.canonical_root) {
            return Err(Error::PathEscapesRoot(relative.to_string()));
        }

        Ok(candidate)
    }

    /// Resolve a path that must name a file (non-empty, not the root).
    fn resolve_file(&self, relative: &str) -> Result<PathBuf> {
        if relative.is_empty() {
            return Err(Error::InvalidPath("empty file path".to_string()));
        }
        let resolved = self.resolve(relative)?;
        if resolved == self.root {
            return Err(Error::InvalidPath(relative.to_string()));
        }
        Ok(resolved)
    }

    // ── Listing and reads ────────────────────────────────────────────

    /// List one directory level under the root, honouring the filter.
    ///
    /// Entries come back sorted by name; directory sizes are reported as 0.
    pub fn list_entries(&self, relative: &str, filter: ListFilter) -> Result<Vec<ListEntry>> {
        let dir = self.resolve(relative)?;
        if !dir.exists() {
            return Err(Error::NotFound(relative.to_string()));
        }
        if !dir.is_dir() {
            return Err(Error::InvalidPath(format!("not a directory: {relative}")));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            let is_dir = metadata.is_dir();

            match filter {
                ListFilter::FilesOnly if is_dir => continue,
                ListFilter::DirsOnly if !is_dir => continue,
                _ => {}
            }

            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs());

            entries.push(ListEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: if is_dir { 0 } else { metadata.len() },
                mtime,
                is_dir,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Size of a published file, or `None` when it does not exist.
    pub fn published_size(&self, relative: &str) -> Result<Option<u64>> {
        let path = self.resolve_file(relative)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Err(Error::InvalidPath(format!("not a file: {relative}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// CRC32 of a published file.
    pub fn published_crc32(&self, relative: &str) -> Result<u32> {
        let path = self.resolve_file(relative)?;
        let data = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(relative.to_string())
            } else {
                e.into()
            }
        })?;
        Ok(crc32(&data))
    }

    /// Read chunk `chunk` of a published file.
    pub fn read_chunk(&self, relative: &str, chunk: u32) -> Result<Vec<u8>> {
        let path = self.resolve_file(relative)?;
        let mut file = fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(relative.to_string())
            } else {
                e.into()
            }
        })?;

        file.seek(SeekFrom::Start(
            u64::from(chunk) * u64::from(self.chunk_size),
        ))?;
        let mut buf = vec![0u8; self.chunk_size as usize];
        let mut read = 0;
        while read < buf.len() {
            let n = file.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf.truncate(read);
        Ok(buf)
    }

    // ── Transfer lifecycle ───────────────────────────────────────────

    /// Open a transfer context for `filename`, superseding any prior one.
    ///
    /// Returns the size the context starts with: the published file's size,
    /// or `None` for a fresh upload awaiting a size declaration.
    pub fn begin(&mut self, filename: &str) -> Result<Option<u64>> {
        let target = self.resolve_file(filename)?;
        let existing = self.published_size(filename)?;

        self.drop_context();

        let tracker = existing.map(|size| ChunkTracker::new(size, self.chunk_size));
        let transfer_id = self.next_transfer_id;
        self.next_transfer_id += 1;

        debug!(filename, transfer_id, size = ?existing, "transfer context opened");
        self.context = Some(TransferContext {
            transfer_id,
            filename: filename.to_string(),
            target,
            tracker,
            staging: None,
            completed: false,
        });
        Ok(existing)
    }

    /// Fix the live context's authoritative size.
    ///
    /// Only permitted for the declared filename, and only before any chunk
    /// has been persisted.
    pub fn declare_size(&mut self, filename: &str, size: u64) -> Result<()> {
        let chunk_size = self.chunk_size;
        let context = self.context.as_mut().ok_or(Error::NoActiveTransfer)?;
        if context.filename != filename {
            return Err(Error::InvalidPath(format!(
                "metadata names '{filename}' but the live transfer is '{}'",
                context.filename
            )));
        }
        if context.has_received_chunks() {
            return Err(Error::Storage(
                "cannot redeclare size after data has been received".to_string(),
            ));
        }
        context.tracker = Some(ChunkTracker::new(size, chunk_size));
        context.staging = None;
        Ok(())
    }

    /// Re-open an interrupted transfer at `offset`.
    ///
    /// Prefers a preserved partial from an earlier session (its sidecar is
    /// authoritative for size and received chunks); falls back to the
    /// published file, seeding staging with its first `offset` bytes.
    /// Returns the authoritative file size.
    pub fn begin_resume(&mut self, filename: &str, offset: u64) -> Result<u64> {
        let target = self.resolve_file(filename)?;

        let partial = self.partial_path(filename);
        let sidecar = self.partial_sidecar_path(filename);

        if partial.exists() && sidecar.exists() {
            let tracker = ChunkTracker::load(&sidecar)?;
            if offset > tracker.file_size {
                return Err(Error::InvalidOffset {
                    offset,
                    file_size: tracker.file_size,
                });
            }

            self.drop_context();
            let transfer_id = self.next_transfer_id;
            self.next_transfer_id += 1;

            let staging_path = self.staging_path(transfer_id, filename);
            fs::copy(&partial, &staging_path)?;

            let file_size = tracker.file_size;
            debug!(
                filename,
                offset,
                received = tracker.received_chunks.len(),
                "resuming from preserved partial"
            );
            self.context = Some(TransferContext {
                transfer_id,
                filename: filename.to_string(),
                target,
                tracker: Some(tracker),
                staging: Some(Staging::Disk(staging_path)),
                completed: false,
            });
            return Ok(file_size);
        }

        let Some(file_size) = self.published_size(filename)? else {
            return Err(Error::NotFound(filename.to_string()));
        };
        if offset > file_size {
            return Err(Error::InvalidOffset { offset, file_size });
        }

        self.drop_context();
        let transfer_id = self.next_transfer_id;
        self.next_transfer_id += 1;

        let mut tracker = ChunkTracker::new(file_size, self.chunk_size);
        let whole_chunks = (offset / u64::from(self.chunk_size)) as u32;
        tracker.mark_many(0..whole_chunks)?;

        // Seed staging with the bytes the peer claims to already have.
        let staging_path = self.staging_path(transfer_id, filename);
        let mut source = fs::File::open(&target)?;
        let mut staged = fs::File::create(&staging_path)?;
        let mut remaining = offset;
        let mut buf = vec![0u8; self.chunk_size as usize];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = source.read(&mut buf[..want])?;
            if n == 0 {
                break;
            }
            staged.write_all(&buf[..n])?;
            remaining -= n as u64;
        }

        self.context = Some(TransferContext {
            transfer_id,
            filename: filename.to_string(),
            target,
            tracker: Some(tracker),
            staging: Some(Staging::Disk(staging_path)),
            completed: false,
        });
        Ok(file_size)
    }

    /// Persist one chunk of the live transfer.
    ///
    /// Enforces the chunk contract: the index must be inside the declared
    /// range, and the payload must not exceed the expected size for that
    /// index (only the last chunk may be shorter). Nothing is ever written
    /// past the declared size.
    pub fn write_chunk(&mut self, chunk: u32, data: &[u8]) -> Result<()> {
        let chunk_size = self.chunk_size;
        let use_memory = {
            let context = self.context.as_ref().ok_or(Error::NoActiveTransfer)?;
            let tracker = context
                .tracker
                .as_ref()
                .ok_or_else(|| Error::SizeNotDeclared(context.filename.clone()))?;

            if chunk >= tracker.total_chunks() {
                return Err(Error::ChunkOutOfRange {
                    chunk,
                    total: tracker.total_chunks(),
                });
            }
            let expected = tracker.chunk_len(chunk);
            if data.len() as u64 > expected {
                return Err(Error::ChunkOversized {
                    chunk,
                    got: data.len(),
                    expected,
                });
            }

            context.staging.is_none() && self.use_memory(tracker.file_size)
        };

        // Lazily create staging on the first write.
        if self
            .context
            .as_ref()
            .is_some_and(|context| context.staging.is_none())
        {
            let (transfer_id, filename, size) = {
                let context = self.context.as_ref().expect("checked above");
                (
                    context.transfer_id,
                    context.filename.clone(),
                    context.tracker.as_ref().expect("checked above").file_size,
                )
            };
            let staging = if use_memory {
                self.memory_used += size;
                Staging::Memory(Vec::with_capacity(size as usize))
            } else {
                Staging::Disk(self.staging_path(transfer_id, &filename))
            };
            if let Some(context) = self.context.as_mut() {
                context.staging = Some(staging);
            }
        }

        let context = self.context.as_mut().expect("checked above");
        let offset = u64::from(chunk) * u64::from(chunk_size);
        match context.staging.as_mut().expect("created above") {
            Staging::Memory(buf) => {
                let pos = offset as usize;
                if buf.len() < pos + data.len() {
                    buf.resize(pos + data.len(), 0);
                }
                buf[pos..pos + data.len()].copy_from_slice(data);
            }
            Staging::Disk(path) => {
                let mut file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(false)
                    .open(path)
                    .map_err(|e| Error::Storage(format!("cannot open staging file: {e}")))?;
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(data)?;
            }
        }

        context
            .tracker
            .as_mut()
            .expect("checked above")
            .mark(chunk)?;
        Ok(())
    }

    /// CRC32 of the assembled staging content.
    pub fn assembled_crc32(&self) -> Result<u32> {
        let context = self.context.as_ref().ok_or(Error::NoActiveTransfer)?;
        match &context.staging {
            Some(Staging::Memory(buf)) => Ok(crc32(buf)),
            Some(Staging::Disk(path)) => {
                let data = fs::read(path)
                    .map_err(|e| Error::Storage(format!("cannot read staging file: {e}")))?;
                Ok(crc32(&data))
            }
            None => Ok(crc32(&[])),
        }
    }

    /// Publish the assembled content under the root.
    ///
    /// The target appears atomically: rename within the same filesystem when
    /// possible, copy-then-remove otherwise. The context is consumed and any
    /// preserved partial for the same file is discarded.
    pub fn publish(&mut self) -> Result<()> {
        let mut context = self.context.take().ok_or(Error::NoActiveTransfer)?;

        if let Some(parent) = context.target.parent() {
            fs::create_dir_all(parent)?;
        }

        let reserved = context.size().unwrap_or(0);
        match context.staging.take() {
            Some(Staging::Memory(buf)) => {
                // Stage to disk first so the publish itself is a rename.
                let tmp = self.staging_path(context.transfer_id, &context.filename);
                fs::write(&tmp, &buf)
                    .map_err(|e| Error::Storage(format!("cannot stage for publish: {e}")))?;
                self.memory_used = self.memory_used.saturating_sub(reserved);
                move_file(&tmp, &context.target)?;
            }
            Some(Staging::Disk(path)) => {
                move_file(&path, &context.target)?;
            }
            None => {
                fs::write(&context.target, [])
                    .map_err(|e| Error::Storage(format!("cannot publish empty file: {e}")))?;
            }
        }

        context.completed = true;
        self.discard_partial(&context.filename);
        debug!(filename = %context.filename, "published");
        Ok(())
    }

    /// Drop the live context, releasing its staging resources.
    pub fn drop_context(&mut self) {
        if let Some(mut context) = self.context.take() {
            let reserved = context.size().unwrap_or(0);
            match context.staging.take() {
                Some(Staging::Memory(_)) => {
                    self.memory_used = self.memory_used.saturating_sub(reserved);
                }
                Some(Staging::Disk(path)) => {
                    if let Err(e) = fs::remove_file(&path) {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!(path = %path.display(), error = %e, "staging cleanup failed");
                        }
                    }
                }
                None => {}
            }
        }
    }

    /// Preserve an incomplete transfer so a later session can resume it.
    ///
    /// Called at session close. Staging with at least one received chunk is
    /// flushed to the shared `partial/` area together with its tracker
    /// sidecar; everything else is discarded.
    pub fn preserve_partial(&mut self) {
        let Some(mut context) = self.context.take() else {
            return;
        };
        if context.completed || !context.has_received_chunks() {
            self.context = Some(context);
            self.drop_context();
            return;
        }

        let tracker = context.tracker.take().expect("has received chunks");
        let reserved = tracker.file_size;
        let partial = self.partial_path(&context.filename);
        let sidecar = self.partial_sidecar_path(&context.filename);

        let flushed = match context.staging.take() {
            Some(Staging::Memory(buf)) => {
                self.memory_used = self.memory_used.saturating_sub(reserved);
                fs::write(&partial, &buf).is_ok()
            }
            Some(Staging::Disk(path)) => move_file(&path, &partial).is_ok(),
            None => false,
        };

        if flushed {
            if let Err(e) = tracker.save(&sidecar) {
                warn!(filename = %context.filename, error = %e, "cannot save partial sidecar");
            } else {
                debug!(
                    filename = %context.filename,
                    received = tracker.received_chunks.len(),
                    "partial preserved for resume"
                );
            }
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    fn use_memory(&self, size: u64) -> bool {
        match self.storage_mode {
            StorageMode::MemoryFirst => self.memory_used + size <= self.max_memory_bytes,
            StorageMode::DiskFirst => false,
            StorageMode::Hybrid => size <= HYBRID_MEMORY_THRESHOLD,
        }
    }

    fn staging_path(&self, transfer_id: u64, filename: &str) -> PathBuf {
        self.staging_dir
            .join(format!("{transfer_id}_{}", flatten_name(filename)))
    }

    fn partial_path(&self, filename: &str) -> PathBuf {
        self.partial_dir
            .join(format!("{}.partial", flatten_name(filename)))
    }

    fn partial_sidecar_path(&self, filename: &str) -> PathBuf {
        self.partial_dir
            .join(format!("{}.partial.state", flatten_name(filename)))
    }

    fn discard_partial(&self, filename: &str) {
        for path in [
            self.partial_path(filename),
            self.partial_sidecar_path(filename),
        ] {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "partial cleanup failed");
                }
            }
        }
    }
}

/// Flatten a relative path into a single file name component.
fn flatten_name(filename: &str) -> String {
    filename.replace(['/', '\\'], "__")
}

/// Move a file, falling back to copy-then-remove across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).map_err(|e| Error::Storage(format!("cannot publish: {e}")))?;
    if let Err(e) = fs::remove_file(from) {
        warn!(path = %from.display(), error = %e, "staging unlink failed");
    }
    Ok(())
}
