//! Cooperative async back-end.
//!
//! All connections are multiplexed by a single current-thread tokio reactor.
//! Suspension points sit exactly at the read-exactly and write-all
//! boundaries of the transport layer; each connection task owns its session
//! and service outright.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{Shared, POLL_INTERVAL};
use crate::error::Error;
use crate::transport;

pub(crate) fn run(shared: &Arc<Shared>, listener: std::net::TcpListener) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!(error = %e, "cannot build reactor");
            return;
        }
    };

    runtime.block_on(async {
        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(e) => {
                warn!(error = %e, "cannot adopt listener");
                return;
            }
        };

        let mut tasks = JoinSet::new();
        let mut tick = tokio::time::interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        let shared = Arc::clone(shared);
                        tasks.spawn(async move {
                            serve_connection(&shared, stream, peer).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                _ = tick.tick() => {
                    shared.tick_reaper();
                    if shared.is_shutdown() {
                        break;
                    }
                }
            }
        }

        // Connection tasks observe the shutdown flag on their own ticks.
        while tasks.join_next().await.is_some() {}
    });
}

async fn serve_connection(shared: &Shared, mut stream: TcpStream, peer: std::net::SocketAddr) {
    let (handle, mut service) = match shared.sessions.open(peer) {
        Ok(opened) => opened,
        Err(e) => {
            warn!(%peer, error = %e, "cannot open session");
            return;
        }
    };

    let mut tick = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            received = transport::async_read_frame(&mut stream) => {
                let frame = match received {
                    Ok(frame) => frame,
                    Err(Error::ConnectionClosed) => break,
                    Err(e) => {
                        warn!(session = %handle.id, error = %e, "framing error, dropping connection");
                        break;
                    }
                };

                handle.touch();
                match service.handle(&frame) {
                    Ok(Some(reply)) => {
                        if let Err(e) = transport::async_write_frame(&mut stream, &reply).await {
                            warn!(session = %handle.id, error = %e, "write failed");
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(session = %handle.id, error = %e, "fatal error, dropping connection");
                        break;
                    }
                }
            }
            // Cancelling a half-read frame is fine here: both exits below
            // tear the connection down.
            _ = tick.tick() => {
                if shared.is_shutdown() || handle.is_expired() {
                    break;
                }
            }
        }
    }

    super::finish(shared, &handle, &mut service);
}
