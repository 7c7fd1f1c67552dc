//! Blocking single-threaded back-end.
//!
//! One connection at a time: the accept loop handles each client to
//! completion before accepting the next. The non-blocking listener is
//! polled so the shutdown flag is observed at least once per second even
//! while idle.

use std::net::TcpListener;
use std::time::Duration;

use tracing::{debug, warn};

use super::{serve_connection, Shared};

const ACCEPT_POLL: Duration = Duration::from_millis(100);

pub(crate) fn run(shared: &Shared, listener: &TcpListener) {
    while !shared.is_shutdown() {
        shared.tick_reaper();

        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "connection accepted");
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                serve_connection(shared, stream, peer);
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
}
