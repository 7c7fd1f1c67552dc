//! `depot serve` - run a file transfer server.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use depot_core::config::{ServerConfig, Strategy};
use depot_core::server::FileServer;

/// Arguments for the serve command.
#[derive(Parser)]
pub struct Args {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind (0 lets the OS choose)
    #[arg(long, default_value_t = depot_core::config::DEFAULT_PORT)]
    pub port: u16,

    /// Directory of published files
    #[arg(long, value_name = "DIR")]
    pub root_dir: PathBuf,

    /// Staging directory for in-progress transfers
    #[arg(long, value_name = "DIR")]
    pub temp_dir: PathBuf,

    /// I/O strategy: blocking, threaded, readiness, or async
    #[arg(long, default_value = "threaded")]
    pub strategy: Strategy,
}

/// Run the server until interrupted.
pub async fn run(args: Args) -> Result<()> {
    let mut config = ServerConfig::new(args.root_dir, args.temp_dir);
    config.host = args.host;
    config.port = args.port;
    config.strategy = args.strategy;

    let mut server = FileServer::new(config).context("invalid server configuration")?;
    server.start().context("cannot start server")?;

    let status = server.status();
    println!(
        "depot serving on {}:{} ({} strategy), press Ctrl-C to stop",
        status.host, status.port, status.strategy
    );

    tokio::signal::ctrl_c()
        .await
        .context("cannot install signal handler")?;

    println!("shutting down...");
    server.stop().context("shutdown failed")?;
    Ok(())
}
