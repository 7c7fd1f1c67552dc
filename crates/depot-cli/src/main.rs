//! Depot CLI - bidirectional file transfer over a binary framing protocol
//!
//! ## Quick Start
//!
//! ```bash
//! # Serve a directory
//! depot serve --root-dir ./root --temp-dir ./temp
//!
//! # Upload and download (from another machine)
//! depot upload ./report.pdf reports/q3.pdf
//! depot download reports/q3.pdf ./q3.pdf
//! ```

#![allow(clippy::doc_markdown)]

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

mod commands;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    match cli.command {
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Upload(args) => commands::upload::run(&args),
        Command::Download(args) => commands::download::run(&args),
        Command::List(args) => commands::list::run(&args),
    }
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,depot=info,depot_core=info"));

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(Arc::new(file)).with_ansi(false))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false).without_time())
            .with(filter)
            .init();
    }
    Ok(())
}
