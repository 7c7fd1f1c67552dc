//! Readiness-multiplexed back-end.
//!
//! One thread runs a mio poll loop over the listening socket and every
//! client socket. Reads drain only when the socket is ready; partial frames
//! sit in a per-connection [`FrameAccumulator`] until complete. Replies go
//! through a per-connection outbox flushed on writable readiness, so a slow
//! reader never blocks the loop.
//!
//! [`FrameAccumulator`]: crate::transport::FrameAccumulator

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, warn};

use super::{Shared, POLL_INTERVAL};
use crate::service::TransferService;
use crate::session::SessionHandle;
use crate::transport::FrameAccumulator;

const LISTENER: Token = Token(0);

struct Connection {
    stream: TcpStream,
    handle: Arc<SessionHandle>,
    service: TransferService,
    accumulator: FrameAccumulator,
    outbox: Vec<u8>,
}

enum Disposition {
    Keep,
    Close,
}

pub(crate) fn run(shared: &Arc<Shared>, listener: std::net::TcpListener) {
    let mut poll = match Poll::new() {
        Ok(poll) => poll,
        Err(e) => {
            warn!(error = %e, "cannot create poll");
            return;
        }
    };
    let mut listener = TcpListener::from_std(listener);
    if let Err(e) = poll
        .registry()
        .register(&mut listener, LISTENER, Interest::READABLE)
    {
        warn!(error = %e, "cannot register listener");
        return;
    }

    let mut events = Events::with_capacity(128);
    let mut connections: HashMap<Token, Connection> = HashMap::new();
    let mut next_token: usize = 1;

    while !shared.is_shutdown() {
        shared.tick_reaper();

        if let Err(e) = poll.poll(&mut events, Some(POLL_INTERVAL)) {
            if e.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            warn!(error = %e, "poll failed");
            break;
        }

        for event in &events {
            match event.token() {
                LISTENER => accept_ready(shared, &poll, &listener, &mut connections, &mut next_token),
                token => {
                    let disposition = connections.get_mut(&token).map_or(
                        Disposition::Keep,
                        |connection| {
                            let mut disposition = Disposition::Keep;
                            if event.is_readable() {
                                disposition = on_readable(connection);
                            }
                            if matches!(disposition, Disposition::Keep) && event.is_writable() {
                                disposition = flush_outbox(connection);
                            }
                            if matches!(disposition, Disposition::Keep) {
                                disposition = update_interest(&poll, token, connection);
                            }
                            disposition
                        },
                    );
                    if matches!(disposition, Disposition::Close) {
                        close_connection(shared, &poll, &mut connections, token);
                    }
                }
            }
        }

        // Tear down sessions the reaper expired.
        let expired: Vec<Token> = connections
            .iter()
            .filter(|(_, connection)| connection.handle.is_expired())
            .map(|(&token, _)| token)
            .collect();
        for token in expired {
            close_connection(shared, &poll, &mut connections, token);
        }
    }

    let tokens: Vec<Token> = connections.keys().copied().collect();
    for token in tokens {
        close_connection(shared, &poll, &mut connections, token);
    }
}

fn accept_ready(
    shared: &Arc<Shared>,
    poll: &Poll,
    listener: &TcpListener,
    connections: &mut HashMap<Token, Connection>,
    next_token: &mut usize,
) {
    loop {
        match listener.accept() {
            Ok((mut stream, peer)) => {
                let (handle, service) = match shared.sessions.open(peer) {
                    Ok(opened) => opened,
                    Err(e) => {
                        warn!(%peer, error = %e, "cannot open session");
                        continue;
                    }
                };

                let token = Token(*next_token);
                *next_token += 1;

                if let Err(e) = poll
                    .registry()
                    .register(&mut stream, token, Interest::READABLE)
                {
                    warn!(%peer, error = %e, "cannot register connection");
                    shared.sessions.close(handle.id);
                    continue;
                }

                debug!(%peer, session = %handle.id, "connection accepted");
                connections.insert(
                    token,
                    Connection {
                        stream,
                        handle,
                        service,
                        accumulator: FrameAccumulator::new(),
                        outbox: Vec::new(),
                    },
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => {
                warn!(error = %e, "accept failed");
                break;
            }
        }
    }
}

fn on_readable(connection: &mut Connection) -> Disposition {
    let mut buf = [0u8; 4096];
    loop {
        match connection.stream.read(&mut buf) {
            Ok(0) => return Disposition::Close,
            Ok(n) => connection.accumulator.push(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(_) => return Disposition::Close,
        }
    }

    loop {
        match connection.accumulator.next_frame() {
            Ok(Some(frame)) => {
                connection.handle.touch();
                match connection.service.handle(&frame) {
                    Ok(Some(reply)) => connection.outbox.extend_from_slice(&reply.to_bytes()),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(session = %connection.handle.id, error = %e, "fatal error");
                        return Disposition::Close;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(session = %connection.handle.id, error = %e, "framing error");
                return Disposition::Close;
            }
        }
    }

    flush_outbox(connection)
}

fn flush_outbox(connection: &mut Connection) -> Disposition {
    while !connection.outbox.is_empty() {
        match connection.stream.write(&connection.outbox) {
            Ok(0) => return Disposition::Close,
            Ok(n) => {
                connection.outbox.drain(..n);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(_) => return Disposition::Close,
        }
    }
    Disposition::Keep
}

fn update_interest(poll: &Poll, token: Token, connection: &mut Connection) -> Disposition {
    let interest = if connection.outbox.is_empty() {
        Interest::READABLE
    } else {
        Interest::READABLE | Interest::WRITABLE
    };
    match poll
        .registry()
        .reregister(&mut connection.stream, token, interest)
    {
        Ok(()) => Disposition::Keep,
        Err(_) => Disposition::Close,
    }
}

fn close_connection(
    shared: &Arc<Shared>,
    poll: &Poll,
    connections: &mut HashMap<Token, Connection>,
    token: Token,
) {
    if let Some(mut connection) = connections.remove(&token) {
        let _ = poll.registry().deregister(&mut connection.stream);
        super::finish(shared, &connection.handle, &mut connection.service);
        debug!(session = %connection.handle.id, "connection closed");
    }
}
