//! Error types for Depot.
//!
//! This module provides a unified error type for all Depot operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Depot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Depot.
#[derive(Error, Debug)]
pub enum Error {
    /// Frame began with something other than the protocol magic
    #[error("invalid protocol magic: {0:#06x}")]
    BadMagic(u16),

    /// Peer speaks a protocol version we do not support
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    /// Header shorter than the fixed 32 bytes
    #[error("truncated frame header: got {0} bytes")]
    TruncatedHeader(usize),

    /// Unknown message type code on the wire
    #[error("unknown message type: {0}")]
    UnknownMessageType(u32),

    /// Declared payload length exceeds the protocol maximum
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(u32),

    /// Frame payload does not hash to the header checksum
    #[error("frame checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    FrameChecksum {
        /// Checksum declared in the header
        expected: u32,
        /// Checksum computed over the received payload
        computed: u32,
    },

    /// Message kind is illegal in the current protocol state
    #[error("message {kind} not allowed in state {state}")]
    InvalidState {
        /// State the session was in
        state: String,
        /// Kind of the rejected message
        kind: String,
    },

    /// A peer-supplied path escapes the configured root
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// A peer-supplied path is malformed (bad UTF-8, empty, absolute)
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Requested file or directory does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Staging, publish, or read failure in the file store
    #[error("storage error: {0}")]
    Storage(String),

    /// Chunk index outside the live transfer's range
    #[error("chunk {chunk} out of range (total {total})")]
    ChunkOutOfRange {
        /// Offending chunk index
        chunk: u32,
        /// Total chunks of the live context
        total: u32,
    },

    /// Chunk payload larger than the expected size for its index
    #[error("chunk {chunk} oversized: {got} bytes, expected at most {expected}")]
    ChunkOversized {
        /// Offending chunk index
        chunk: u32,
        /// Received payload size
        got: usize,
        /// Maximum size for this chunk
        expected: u64,
    },

    /// No live transfer context for a data frame
    #[error("no active transfer")]
    NoActiveTransfer,

    /// Transfer size has not been declared yet
    #[error("transfer size not declared for '{0}'")]
    SizeNotDeclared(String),

    /// Assembled file hashes differently from the declared checksum
    #[error("checksum mismatch for '{file}': expected {expected:#010x}, computed {computed:#010x}")]
    IntegrityMismatch {
        /// File being verified
        file: String,
        /// Checksum the peer declared
        expected: u32,
        /// Checksum of the assembled content
        computed: u32,
    },

    /// Resume offset beyond the known file size
    #[error("invalid resume offset {offset} for file of {file_size} bytes")]
    InvalidOffset {
        /// Requested offset
        offset: u64,
        /// Known size of the file
        file_size: u64,
    },

    /// Peer replied with a protocol-level error message
    #[error("peer error: {0}")]
    Peer(String),

    /// Unexpected message type in a request/reply exchange
    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// Expected message kind
        expected: String,
        /// Actual message kind received
        actual: String,
    },

    /// Truncated or malformed message payload
    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload {
        /// Message kind being decoded
        kind: String,
        /// What went wrong
        reason: String,
    },

    /// Configuration file error
    #[error("configuration error: {0}")]
    Config(String),

    /// Server is already running or already stopped
    #[error("server lifecycle error: {0}")]
    Lifecycle(String),

    /// Peer closed the connection
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this error desynchronises the byte stream.
    ///
    /// Fatal errors terminate the connection without a reply; everything
    /// else is reported to the peer as an `Error` frame.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BadMagic(_)
                | Self::TruncatedHeader(_)
                | Self::PayloadTooLarge(_)
                | Self::FrameChecksum { .. }
                | Self::ConnectionClosed
                | Self::Io(_)
        )
    }

    /// Short wire-facing description, suitable for an `Error` frame payload.
    #[must_use]
    pub fn wire_message(&self) -> String {
        match self {
            Self::IntegrityMismatch { .. } => "Checksum mismatch".to_string(),
            Self::NoActiveTransfer => "No active transfer".to_string(),
            other => other.to_string(),
        }
    }
}
