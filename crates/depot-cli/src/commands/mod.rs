//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod download;
pub mod list;
pub mod serve;
pub mod upload;

/// Bidirectional file transfer over a binary framing protocol.
#[derive(Parser)]
#[command(name = "depot", version, about, propagate_version = true)]
pub struct Cli {
    /// Write logs to a file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Run a file transfer server
    Serve(serve::Args),
    /// Upload a local file to a server
    Upload(upload::Args),
    /// Download a file from a server, resuming if interrupted
    Download(download::Args),
    /// List a directory on a server
    List(list::Args),
}

/// Connection options shared by the client subcommands.
#[derive(clap::Args)]
pub struct ConnectArgs {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port
    #[arg(long, default_value_t = depot_core::config::DEFAULT_PORT)]
    pub port: u16,
}

impl ConnectArgs {
    /// The server address in `host:port` form (hostnames resolve at connect).
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
