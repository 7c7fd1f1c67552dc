//! `depot list` - list a directory on a server.

use anyhow::{Context, Result};
use clap::Parser;
use depot_core::client::FileClient;
use depot_core::message::ListFilter;

use super::ConnectArgs;

/// Arguments for the list command.
#[derive(Parser)]
pub struct Args {
    /// Directory under the server's root (defaults to the root itself)
    #[arg(default_value = "")]
    pub path: String,

    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Descend into subdirectories
    #[arg(long, short)]
    pub recursive: bool,

    /// Print names only
    #[arg(long)]
    pub names_only: bool,
}

/// List one directory.
pub fn run(args: &Args) -> Result<()> {
    let addr = args.connect.addr();
    let mut client = FileClient::connect(addr.as_str())
        .with_context(|| format!("cannot connect to {addr}"))?;

    if args.names_only {
        for name in client.nlst(&args.path, ListFilter::All)? {
            println!("{name}");
        }
    } else {
        for entry in client.list(&args.path, args.recursive)? {
            let kind = if entry.is_dir { "d" } else { "-" };
            println!("{kind} {:>12}  {}", entry.size, entry.name);
        }
    }

    client.close()?;
    Ok(())
}
