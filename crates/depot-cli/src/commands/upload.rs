//! `depot upload` - upload a local file to a server.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use depot_core::client::FileClient;

use super::ConnectArgs;

/// Arguments for the upload command.
#[derive(Parser)]
pub struct Args {
    /// Local file to send
    pub local: PathBuf,

    /// Destination path under the server's root
    pub remote: String,

    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Resume from a byte offset (must sit on a chunk boundary)
    #[arg(long)]
    pub offset: Option<u64>,
}

/// Upload one file.
pub fn run(args: &Args) -> Result<()> {
    let addr = args.connect.addr();
    let mut client = FileClient::connect(addr.as_str())
        .with_context(|| format!("cannot connect to {addr}"))?;

    let sent = match args.offset {
        Some(offset) => {
            let chunk_size = u64::from(depot_core::config::DEFAULT_CHUNK_SIZE);
            let chunk_number = u32::try_from(offset / chunk_size)?;
            client.resume_upload(&args.local, &args.remote, offset, chunk_number)?
        }
        None => client.upload(&args.local, &args.remote)?,
    };

    client.close()?;
    println!("uploaded {} ({sent} bytes)", args.remote);
    Ok(())
}
