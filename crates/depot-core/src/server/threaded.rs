//! Thread-per-connection back-end.
//!
//! Each accepted connection runs the sequential loop on its own worker
//! thread. Workers poll the shared shutdown flag, so `stop` completes after
//! joining them all.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use super::{serve_connection, Shared};

const ACCEPT_POLL: Duration = Duration::from_millis(100);

pub(crate) fn run(shared: &Arc<Shared>, listener: &TcpListener) {
    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    while !shared.is_shutdown() {
        shared.tick_reaper();
        workers.retain(|worker| !worker.is_finished());

        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "connection accepted");
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let shared = Arc::clone(shared);
                match std::thread::Builder::new()
                    .name(format!("depot-conn-{peer}"))
                    .spawn(move || serve_connection(&shared, stream, peer))
                {
                    Ok(worker) => workers.push(worker),
                    Err(e) => warn!(%peer, error = %e, "cannot spawn worker"),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }

    for worker in workers {
        if worker.join().is_err() {
            warn!("connection worker panicked");
        }
    }
}
