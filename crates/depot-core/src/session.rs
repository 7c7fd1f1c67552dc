//! Session allocation and lifecycle.
//!
//! Every accepted connection gets a fresh session: a UUID identity, its own
//! staging subtree under the temp directory, and a dedicated
//! [`TransferService`]. The manager's mutex guards only the session table;
//! per-session state is owned by exactly one connection worker.
//!
//! Reaping is cooperative: [`SessionManager::reap`] marks idle sessions
//! expired, and the owning worker — which polls its socket with short
//! timeouts — observes the flag, tears the connection down, and calls
//! [`SessionManager::close`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::service::TransferService;
use crate::store::FileStore;

/// Shared view of one live session.
#[derive(Debug)]
pub struct SessionHandle {
    /// Session identity (also names the temp subtree)
    pub id: Uuid,
    /// Peer address
    pub peer: SocketAddr,
    /// When the session was accepted
    pub created_at: DateTime<Utc>,
    last_active: AtomicI64,
    expired: AtomicBool,
}

impl SessionHandle {
    /// Record activity; called for every received frame.
    pub fn touch(&self) {
        self.last_active
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    /// Seconds since the last recorded activity.
    #[must_use]
    pub fn idle_secs(&self) -> i64 {
        Utc::now().timestamp() - self.last_active.load(Ordering::Relaxed)
    }

    /// Whether the reaper has asked this session to shut down.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Relaxed)
    }

    fn expire(&self) {
        self.expired.store(true, Ordering::Relaxed);
    }
}

/// Allocates and tracks sessions for one server.
#[derive(Debug)]
pub struct SessionManager {
    root_dir: PathBuf,
    temp_dir: PathBuf,
    chunk_size: u32,
    storage_mode: crate::config::StorageMode,
    max_memory_bytes: u64,
    sessions: Mutex<HashMap<Uuid, Arc<SessionHandle>>>,
}

impl SessionManager {
    /// Create a manager for the configured directories.
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            root_dir: config.root_dir.clone(),
            temp_dir: config.temp_dir.clone(),
            chunk_size: config.chunk_size,
            storage_mode: config.storage_mode,
            max_memory_bytes: config.max_memory_bytes,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh session for a peer.
    ///
    /// Creates `temp_dir/<session_id>/` and a [`TransferService`] scoped to
    /// it. The returned service is owned by the caller; only the handle is
    /// shared.
    pub fn open(&self, peer: SocketAddr) -> Result<(Arc<SessionHandle>, TransferService)> {
        let id = Uuid::new_v4();
        let staging_dir = self.temp_dir.join(id.to_string());
        let partial_dir = self.temp_dir.join("partial");

        let store = FileStore::new(
            &self.root_dir,
            staging_dir,
            partial_dir,
            self.chunk_size,
            self.storage_mode,
            self.max_memory_bytes,
        )?;
        let service = TransferService::new(store);

        let handle = Arc::new(SessionHandle {
            id,
            peer,
            created_at: Utc::now(),
            last_active: AtomicI64::new(Utc::now().timestamp()),
            expired: AtomicBool::new(false),
        });

        self.sessions
            .lock()
            .expect("session table poisoned")
            .insert(id, Arc::clone(&handle));

        info!(session = %id, %peer, "session opened");
        Ok((handle, service))
    }

    /// Close a session: drop it from the table and remove its temp subtree.
    pub fn close(&self, id: Uuid) {
        let removed = self
            .sessions
            .lock()
            .expect("session table poisoned")
            .remove(&id);
        if removed.is_none() {
            return;
        }

        let staging_dir = self.temp_dir.join(id.to_string());
        if let Err(e) = std::fs::remove_dir_all(&staging_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(session = %id, error = %e, "temp subtree cleanup failed");
            }
        }
        info!(session = %id, "session closed");
    }

    /// Mark sessions idle for longer than `max_idle` as expired.
    ///
    /// Returns how many sessions were marked. The owning workers perform the
    /// actual teardown.
    pub fn reap(&self, max_idle: Duration) -> usize {
        let sessions = self.sessions.lock().expect("session table poisoned");
        let mut marked = 0;
        for handle in sessions.values() {
            if !handle.is_expired() && handle.idle_secs() >= max_idle.as_secs() as i64 {
                debug!(session = %handle.id, idle = handle.idle_secs(), "session expired");
                handle.expire();
                marked += 1;
            }
        }
        marked
    }

    /// Number of live sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions.lock().expect("session table poisoned").len()
    }
}
