//! Server dispatcher.
//!
//! One [`FileServer`] binds a listening socket and drives it with one of
//! four interchangeable back-ends selected by [`Strategy`]: blocking
//! single-threaded, thread-per-connection, readiness-multiplexed (mio), or
//! cooperative async (tokio, single reactor). Only the concurrency model
//! differs; per-connection byte handling goes through the transport layer
//! and per-session logic through a fresh [`TransferService`] either way.
//!
//! [`TransferService`]: crate::service::TransferService

mod blocking;
mod cooperative;
mod readiness;
mod threaded;

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use socket2::{Domain, Socket, Type};
use tracing::{info, warn};

use crate::config::{ServerConfig, Strategy, DEFAULT_BACKLOG, DEFAULT_REAP_INTERVAL};
use crate::error::{Error, Result};
use crate::session::{SessionHandle, SessionManager};
use crate::transport;

/// Interval at which connection loops poll shutdown and expiry flags.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Snapshot of a server's lifecycle state.
#[derive(Debug, Clone)]
pub struct ServerStatus {
    /// Whether the dispatcher is accepting connections
    pub running: bool,
    /// Configured host
    pub host: String,
    /// Actual bound port (resolved when the config asked for port 0)
    pub port: u16,
    /// Active I/O strategy
    pub strategy: Strategy,
    /// Number of live sessions
    pub active_sessions: usize,
}

/// State shared between the dispatcher facade and its back-end loop.
pub(crate) struct Shared {
    pub(crate) config: ServerConfig,
    pub(crate) sessions: SessionManager,
    shutdown: AtomicBool,
    last_reap: Mutex<Instant>,
}

impl Shared {
    fn new(config: ServerConfig) -> Self {
        let sessions = SessionManager::new(&config);
        Self {
            config,
            sessions,
            shutdown: AtomicBool::new(false),
            last_reap: Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Run a reap sweep if the interval has elapsed.
    pub(crate) fn tick_reaper(&self) {
        let mut last = self.last_reap.lock().expect("reaper clock poisoned");
        if last.elapsed() >= DEFAULT_REAP_INTERVAL {
            *last = Instant::now();
            drop(last);
            let marked = self.sessions.reap(self.config.idle_timeout());
            if marked > 0 {
                info!(marked, "idle sessions expired");
            }
        }
    }
}

/// A file transfer server with a pluggable I/O strategy.
pub struct FileServer {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for FileServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileServer")
            .field("strategy", &self.shared.config.strategy)
            .field("local_addr", &self.local_addr)
            .field("running", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

impl FileServer {
    /// Create a server from a validated configuration.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared::new(config)),
            worker: None,
            local_addr: None,
        })
    }

    /// Bind the listening socket and begin accepting.
    ///
    /// The dispatcher runs on a background thread; `start` returns once the
    /// socket is bound, so a configured port of 0 can be resolved through
    /// [`local_addr`](Self::local_addr) immediately after.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(Error::Lifecycle("server already running".to_string()));
        }

        let listener = bind(&self.shared.config)?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        let strategy = self.shared.config.strategy;
        info!(%local_addr, %strategy, "server started");

        let shared = Arc::clone(&self.shared);
        let worker = std::thread::Builder::new()
            .name("depot-server".to_string())
            .spawn(move || match strategy {
                Strategy::Blocking => blocking::run(&shared, &listener),
                Strategy::Threaded => threaded::run(&shared, &listener),
                Strategy::Readiness => readiness::run(&shared, listener),
                Strategy::Async => cooperative::run(&shared, listener),
            })
            .map_err(|e| Error::Lifecycle(format!("cannot spawn dispatcher: {e}")))?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Graceful shutdown.
    ///
    /// Sets the shutdown flag, waits for the accept loop and every
    /// connection worker to finish, and returns once all per-connection
    /// state has been released.
    pub fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.shared.shutdown.store(true, Ordering::Relaxed);
        worker
            .join()
            .map_err(|_| Error::Lifecycle("dispatcher panicked".to_string()))?;
        self.shared.shutdown.store(false, Ordering::Relaxed);
        info!("server stopped");
        Ok(())
    }

    /// Lifecycle snapshot.
    #[must_use]
    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            running: self.worker.is_some(),
            host: self.shared.config.host.clone(),
            port: self
                .local_addr
                .map_or(self.shared.config.port, |addr| addr.port()),
            strategy: self.shared.config.strategy,
            active_sessions: self.shared.sessions.active_count(),
        }
    }

    /// Actual bound address, available after [`start`](Self::start).
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Drop for FileServer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Bind the listen socket with the protocol's backlog of 5.
///
/// The listener is non-blocking so every back-end can poll its shutdown
/// flag at least once per second.
fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| Error::Config(format!("invalid bind address: {e}")))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(DEFAULT_BACKLOG)?;

    let listener: TcpListener = socket.into();
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Sequential read-handle-write loop shared by the blocking and threaded
/// back-ends.
///
/// The socket reads with a short timeout so the loop can observe shutdown
/// and expiry; a peer that stalls in the middle of a frame for longer than
/// the timeout is treated as gone.
pub(crate) fn serve_connection(shared: &Shared, mut stream: TcpStream, peer: SocketAddr) {
    let (handle, mut service) = match shared.sessions.open(peer) {
        Ok(opened) => opened,
        Err(e) => {
            warn!(%peer, error = %e, "cannot open session");
            return;
        }
    };

    if stream.set_read_timeout(Some(POLL_INTERVAL)).is_err() {
        finish(shared, &handle, &mut service);
        return;
    }

    loop {
        if shared.is_shutdown() || handle.is_expired() {
            break;
        }

        // Wait for the first byte without consuming it, so a poll timeout
        // never splits a frame.
        let mut probe = [0u8; 1];
        match stream.peek(&mut probe) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(_) => break,
        }

        let frame = match transport::read_frame(&mut stream) {
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
                if let Err(e) = transport::write_frame(&mut stream, &reply) {
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

    finish(shared, &handle, &mut service);
}

pub(crate) fn finish(
    shared: &Shared,
    handle: &SessionHandle,
    service: &mut crate::service::TransferService,
) {
    service.shutdown();
    shared.sessions.close(handle.id);
}
