//! Shared helpers for integration tests.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use depot_core::config::{ServerConfig, Strategy};
use depot_core::server::FileServer;

/// A running server plus the directories it serves.
pub struct Harness {
    pub server: FileServer,
    pub addr: SocketAddr,
    pub root: PathBuf,
    pub temp: PathBuf,
    _dir: TempDir,
}

/// Start a server on an OS-assigned port.
pub fn start_server(strategy: Strategy, chunk_size: u32) -> Harness {
    let dir = TempDir::new().expect("create temp dir");
    let root = dir.path().join("root");
    let temp = dir.path().join("temp");

    let mut config = ServerConfig::new(&root, &temp);
    config.port = 0;
    config.strategy = strategy;
    config.chunk_size = chunk_size;

    let mut server = FileServer::new(config).expect("create server");
    server.start().expect("start server");
    let addr = server.local_addr().expect("bound address");

    Harness {
        server,
        addr,
        root,
        temp,
        _dir: dir,
    }
}

/// Write a file under `dir`, creating parents as needed.
pub fn create_test_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(&path, contents).expect("write test file");
    path
}

/// Assert two files hold identical bytes.
pub fn assert_files_equal(a: &Path, b: &Path) {
    let left = std::fs::read(a).expect("read first file");
    let right = std::fs::read(b).expect("read second file");
    assert_eq!(left, right, "{} != {}", a.display(), b.display());
}

/// Poll a condition until it holds or the timeout elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}
