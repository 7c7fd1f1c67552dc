//! # Depot Core Library
//!
//! `depot-core` implements a bidirectional file transfer service on a custom
//! binary framing protocol (DBTP) over TCP: directory listings, chunked
//! uploads and downloads, resumable transfers, CRC32 integrity, and a server
//! that multiplexes many clients under one of four I/O strategies.
//!
//! ## Modules
//!
//! - [`frame`] - 32-byte header codec, message catalog, CRC32
//! - [`message`] - payload codecs for every message kind
//! - [`state`] - per-session protocol state machine
//! - [`transport`] - blocking, async, and readiness-buffered frame I/O
//! - [`store`] - root-confined file store and transfer staging
//! - [`tracker`] - chunk bookkeeping with JSON sidecars
//! - [`service`] - per-session request-to-reply engine
//! - [`session`] - session allocation, temp-subtree isolation, reaping
//! - [`server`] - dispatcher with pluggable back-ends
//! - [`client`] - synchronous client driver
//! - [`config`] - server configuration
//!
//! ## Example
//!
//! ```rust,ignore
//! use depot_core::{client::FileClient, config::ServerConfig, server::FileServer};
//!
//! let mut server = FileServer::new(ServerConfig::new("./root", "./temp"))?;
//! server.start()?;
//!
//! let mut client = FileClient::connect(server.local_addr().unwrap())?;
//! client.upload("./local.bin".as_ref(), "remote.bin")?;
//! client.close()?;
//! server.stop()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::doc_markdown)]

pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod message;
pub mod server;
pub mod service;
pub mod session;
pub mod state;
pub mod store;
pub mod tracker;
pub mod transport;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
