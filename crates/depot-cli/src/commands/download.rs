//! `depot download` - download a file, resuming if interrupted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use depot_core::client::{download_progress, FileClient};

use super::ConnectArgs;

/// Arguments for the download command.
#[derive(Parser)]
pub struct Args {
    /// Path under the server's root
    pub remote: String,

    /// Local target path
    pub local: PathBuf,

    #[command(flatten)]
    pub connect: ConnectArgs,
}

/// Download one file. An existing sidecar for the target resumes the
/// previous attempt instead of starting over.
pub fn run(args: &Args) -> Result<()> {
    if let Some(progress) = download_progress(&args.local) {
        println!(
            "resuming: {}/{} chunks already present",
            progress.received_chunks.len(),
            progress.total_chunks()
        );
    }

    let addr = args.connect.addr();
    let mut client = FileClient::connect(addr.as_str())
        .with_context(|| format!("cannot connect to {addr}"))?;

    let fetched = client.download(&args.remote, &args.local)?;
    client.close()?;
    println!("downloaded {} ({fetched} bytes)", args.local.display());
    Ok(())
}
