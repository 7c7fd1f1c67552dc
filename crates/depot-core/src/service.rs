//! Per-session transfer service.
//!
//! A [`TransferService`] owns everything one connection is allowed to touch:
//! the protocol state, the file store scoped to the session's staging
//! subtree, and the reply builder. Every inbound frame goes through the same
//! pipeline — version gate, checksum gate, state gate, handler — and yields
//! at most one reply frame.
//!
//! Fatal framing errors (bad magic, checksum mismatch, unsupported header
//! version) bubble out as `Err` and the caller is expected to drop the
//! connection without replying; everything else is reported to the peer as
//! an `Error` (or `ListError`) frame and parks the session in the error
//! state, recoverable via `Close` or `Ack`.

use tracing::debug;

use crate::config::StorageMode;
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameBuilder, MessageType, PROTOCOL_VERSION};
use crate::message::{self, FileMetadata, ListRequest, NlstRequest, ResumeRequest};
use crate::state::{transition, ProtocolState};
use crate::store::FileStore;

/// Handles every frame of one session.
#[derive(Debug)]
pub struct TransferService {
    state: ProtocolState,
    store: FileStore,
    builder: FrameBuilder,
}

impl TransferService {
    /// Create a service around a session-scoped store.
    #[must_use]
    pub fn new(store: FileStore) -> Self {
        Self {
            state: ProtocolState::Init,
            store,
            builder: FrameBuilder::new(0),
        }
    }

    /// Convenience constructor building the store in one call.
    pub fn with_dirs(
        root: impl Into<std::path::PathBuf>,
        staging_dir: impl Into<std::path::PathBuf>,
        partial_dir: impl Into<std::path::PathBuf>,
        chunk_size: u32,
        storage_mode: StorageMode,
        max_memory_bytes: u64,
    ) -> Result<Self> {
        Ok(Self::new(FileStore::new(
            root,
            staging_dir,
            partial_dir,
            chunk_size,
            storage_mode,
            max_memory_bytes,
        )?))
    }

    /// Current protocol state.
    #[must_use]
    pub const fn state(&self) -> ProtocolState {
        self.state
    }

    /// Handle one frame, producing at most one reply.
    ///
    /// `Err` means the stream is desynchronised and the connection must be
    /// dropped. `Ok(None)` means the frame needs no reply (`Close`, inbound
    /// `Ack`, inbound error reports).
    pub fn handle(&mut self, frame: &Frame) -> Result<Option<Frame>> {
        let header = &frame.header;

        if header.version != PROTOCOL_VERSION {
            return Err(Error::UnsupportedVersion(header.version));
        }
        header.verify_checksum(&frame.payload)?;

        // Replies correlate to the peer's session.
        self.builder.set_session_id(header.session_id);

        let kind = header.msg_type;
        let Some(next) = transition(self.state, kind) else {
            let err = Error::InvalidState {
                state: self.state.to_string(),
                kind: kind.to_string(),
            };
            debug!(state = %self.state, %kind, "illegal frame");
            self.state = ProtocolState::Error;
            return Ok(Some(self.error_reply(kind, &err)));
        };

        match self.dispatch(frame) {
            Ok(reply) => {
                self.state = next;
                Ok(reply)
            }
            Err(e) => {
                // Filesystem failures inside a handler are storage errors,
                // not stream desynchronisation.
                let e = match e {
                    Error::Io(io) => Error::Storage(io.to_string()),
                    other => other,
                };
                if e.is_fatal() {
                    return Err(e);
                }
                debug!(%kind, error = %e, "request failed");
                self.state = ProtocolState::Error;
                Ok(Some(self.error_reply(kind, &e)))
            }
        }
    }

    /// Release the session's resources at teardown.
    ///
    /// An incomplete upload with received chunks is preserved for resume;
    /// everything else is discarded.
    pub fn shutdown(&mut self) {
        self.store.preserve_partial();
    }

    fn dispatch(&mut self, frame: &Frame) -> Result<Option<Frame>> {
        match frame.header.msg_type {
            MessageType::Handshake => self.on_handshake(&frame.payload),
            MessageType::FileRequest => self.on_file_request(&frame.payload),
            MessageType::FileMetadata => self.on_file_metadata(&frame.payload),
            MessageType::FileData => self.on_file_data(frame),
            MessageType::ChecksumVerify => self.on_checksum_verify(frame),
            MessageType::ResumeRequest => self.on_resume_request(&frame.payload),
            MessageType::ListRequest => self.on_list_request(&frame.payload),
            MessageType::NlstRequest => self.on_nlst_request(&frame.payload),
            MessageType::Close => self.on_close(),
            // Notifications: no reply.
            MessageType::Ack | MessageType::Error | MessageType::ListError => Ok(None),
            // Reply kinds never reach dispatch; the state gate rejects them.
            MessageType::ListResponse | MessageType::NlstResponse => {
                unreachable!("rejected by the state gate")
            }
        }
    }

    fn on_handshake(&mut self, payload: &[u8]) -> Result<Option<Frame>> {
        let version = message::decode_handshake(payload)?;
        if version != u32::from(PROTOCOL_VERSION) {
            return Err(Error::Peer(format!("Version mismatch: {version}")));
        }
        let reply = self
            .builder
            .build(MessageType::Handshake, message::encode_handshake(PROTOCOL_VERSION));
        Ok(Some(reply))
    }

    fn on_file_request(&mut self, payload: &[u8]) -> Result<Option<Frame>> {
        let filename = message::decode_file_request(payload)?;
        let existing = self.store.begin(&filename)?;

        let crc32 = match existing {
            Some(_) => self.store.published_crc32(&filename)?,
            None => 0,
        };
        let meta = FileMetadata {
            file_size: existing.unwrap_or(0),
            crc32,
            filename,
        };
        let reply = self
            .builder
            .build(MessageType::FileMetadata, message::encode_file_metadata(&meta));
        Ok(Some(reply))
    }

    fn on_file_metadata(&mut self, payload: &[u8]) -> Result<Option<Frame>> {
        let meta = message::decode_file_metadata(payload)?;
        self.store.declare_size(&meta.filename, meta.file_size)?;

        let echo = FileMetadata {
            file_size: meta.file_size,
            crc32: 0,
            filename: meta.filename,
        };
        let reply = self
            .builder
            .build(MessageType::FileMetadata, message::encode_file_metadata(&echo));
        Ok(Some(reply))
    }

    fn on_file_data(&mut self, frame: &Frame) -> Result<Option<Frame>> {
        let chunk = frame.header.chunk_number;

        if frame.payload.is_empty() {
            // Empty payload is a chunk read request.
            let context = self.store.context().ok_or(Error::NoActiveTransfer)?;
            let filename = context.filename.clone();
            let tracker = context
                .tracker()
                .ok_or_else(|| Error::SizeNotDeclared(filename.clone()))?;
            if chunk >= tracker.total_chunks() {
                return Err(Error::ChunkOutOfRange {
                    chunk,
                    total: tracker.total_chunks(),
                });
            }

            let data = self.store.read_chunk(&filename, chunk)?;
            let reply = self.builder.build_chunk(MessageType::FileData, data, chunk);
            return Ok(Some(reply));
        }

        self.store.write_chunk(chunk, &frame.payload)?;
        let reply = self.builder.build_chunk(
            MessageType::Ack,
            message::encode_ack(frame.header.sequence_number),
            chunk,
        );
        Ok(Some(reply))
    }

    fn on_checksum_verify(&mut self, frame: &Frame) -> Result<Option<Frame>> {
        let expected = message::decode_checksum_verify(&frame.payload)?;
        let computed = self.store.assembled_crc32()?;

        if computed != expected {
            let filename = self
                .store
                .context()
                .map_or_else(String::new, |c| c.filename.clone());
            return Err(Error::IntegrityMismatch {
                file: filename,
                expected,
                computed,
            });
        }

        self.store.publish()?;
        let reply = self.builder.build(
            MessageType::Ack,
            message::encode_ack(frame.header.sequence_number),
        );
        Ok(Some(reply))
    }

    fn on_resume_request(&mut self, payload: &[u8]) -> Result<Option<Frame>> {
        let request: ResumeRequest = message::decode_resume_request(payload)?;
        let file_size = self.store.begin_resume(&request.filename, request.offset)?;

        let crc32 = match self.store.published_size(&request.filename)? {
            Some(_) => self.store.published_crc32(&request.filename)?,
            None => 0,
        };
        let meta = FileMetadata {
            file_size,
            crc32,
            filename: request.filename,
        };
        let reply = self
            .builder
            .build(MessageType::FileMetadata, message::encode_file_metadata(&meta));
        Ok(Some(reply))
    }

    fn on_list_request(&mut self, payload: &[u8]) -> Result<Option<Frame>> {
        let request: ListRequest = message::decode_list_request(payload)?;
        let entries = self.store.list_entries(&request.path, request.filter)?;
        let reply = self.builder.build(
            MessageType::ListResponse,
            message::encode_list_response(request.format, &entries),
        );
        Ok(Some(reply))
    }

    fn on_nlst_request(&mut self, payload: &[u8]) -> Result<Option<Frame>> {
        let request: NlstRequest = message::decode_nlst_request(payload)?;
        let entries = self.store.list_entries(&request.path, request.filter)?;
        let names: Vec<String> = entries.into_iter().map(|e| e.name).collect();
        let reply = self
            .builder
            .build(MessageType::NlstResponse, message::encode_nlst_response(&names));
        Ok(Some(reply))
    }

    fn on_close(&mut self) -> Result<Option<Frame>> {
        self.store.preserve_partial();
        Ok(None)
    }

    fn error_reply(&mut self, inbound: MessageType, err: &Error) -> Frame {
        let kind = match inbound {
            MessageType::ListRequest | MessageType::NlstRequest => MessageType::ListError,
            _ => MessageType::Error,
        };
        self.builder
            .build(kind, message::encode_error(&err.wire_message()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StorageMode, DEFAULT_CHUNK_SIZE};
    use crate::frame::crc32;
    use crate::message::{ListEntry, ListFilter, ListFormat};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        service: TransferService,
        client: FrameBuilder,
        root: std::path::PathBuf,
    }

    fn fixture(chunk_size: u32) -> Fixture {
        let dir = TempDir::new().expect("create temp dir");
        let root = dir.path().join("root");
        let service = TransferService::with_dirs(
            &root,
            dir.path().join("temp/session-a"),
            dir.path().join("temp/partial"),
            chunk_size,
            StorageMode::Hybrid,
            1024 * 1024,
        )
        .expect("create service");
        Fixture {
            _dir: dir,
            service,
            client: FrameBuilder::new(0x1122_3344_5566_7788),
            root,
        }
    }

    fn handshake(f: &mut Fixture) {
        let frame = f
            .client
            .build(MessageType::Handshake, message::encode_handshake(1));
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::Handshake);
        assert_eq!(f.service.state(), ProtocolState::Connected);
    }

    fn expect_metadata(reply: &Frame) -> FileMetadata {
        assert_eq!(reply.header.msg_type, MessageType::FileMetadata);
        message::decode_file_metadata(&reply.payload).expect("metadata")
    }

    #[test]
    fn trivial_upload() {
        let mut f = fixture(DEFAULT_CHUNK_SIZE);
        handshake(&mut f);

        let frame = f.client.build(
            MessageType::FileRequest,
            message::encode_file_request("hello.txt"),
        );
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        let meta = expect_metadata(&reply);
        assert_eq!(meta.file_size, 0);
        assert_eq!(f.service.state(), ProtocolState::Transferring);

        // Declare the authoritative size.
        let frame = f.client.build(
            MessageType::FileMetadata,
            message::encode_file_metadata(&FileMetadata {
                file_size: 3,
                crc32: 0,
                filename: "hello.txt".to_string(),
            }),
        );
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        let echo = expect_metadata(&reply);
        assert_eq!(echo.file_size, 3);
        assert_eq!(echo.filename, "hello.txt");

        // One chunk.
        let frame = f
            .client
            .build_chunk(MessageType::FileData, b"Hi\n".to_vec(), 0);
        let seq = frame.header.sequence_number;
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::Ack);
        assert_eq!(reply.header.chunk_number, 0);
        assert_eq!(message::decode_ack(&reply.payload).expect("ack"), seq);

        // Verify and publish.
        let frame = f.client.build(
            MessageType::ChecksumVerify,
            message::encode_checksum_verify(0x97D0_5E3C),
        );
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::Ack);
        assert_eq!(f.service.state(), ProtocolState::Completed);

        assert_eq!(
            fs::read(f.root.join("hello.txt")).expect("read"),
            b"Hi\n"
        );
    }

    #[test]
    fn two_chunk_upload() {
        let mut f = fixture(8);
        handshake(&mut f);

        let frame = f
            .client
            .build(MessageType::FileRequest, message::encode_file_request("x"));
        f.service.handle(&frame).expect("handle").expect("reply");

        let frame = f.client.build(
            MessageType::FileMetadata,
            message::encode_file_metadata(&FileMetadata {
                file_size: 10,
                crc32: 0,
                filename: "x".to_string(),
            }),
        );
        f.service.handle(&frame).expect("handle").expect("reply");

        for (chunk, data) in [(0u32, &b"01234567"[..]), (1, &b"89"[..])] {
            let frame = f
                .client
                .build_chunk(MessageType::FileData, data.to_vec(), chunk);
            let reply = f.service.handle(&frame).expect("handle").expect("reply");
            assert_eq!(reply.header.msg_type, MessageType::Ack);
            assert_eq!(reply.header.chunk_number, chunk);
        }

        let frame = f.client.build(
            MessageType::ChecksumVerify,
            message::encode_checksum_verify(crc32(b"0123456789")),
        );
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::Ack);
        assert_eq!(fs::read(f.root.join("x")).expect("read"), b"0123456789");
    }

    #[test]
    fn integrity_failure_publishes_nothing() {
        let mut f = fixture(8);
        handshake(&mut f);

        let frame = f
            .client
            .build(MessageType::FileRequest, message::encode_file_request("bad"));
        f.service.handle(&frame).expect("handle").expect("reply");
        let frame = f.client.build(
            MessageType::FileMetadata,
            message::encode_file_metadata(&FileMetadata {
                file_size: 3,
                crc32: 0,
                filename: "bad".to_string(),
            }),
        );
        f.service.handle(&frame).expect("handle").expect("reply");
        let frame = f
            .client
            .build_chunk(MessageType::FileData, b"Hi\n".to_vec(), 0);
        f.service.handle(&frame).expect("handle").expect("reply");

        let frame = f.client.build(
            MessageType::ChecksumVerify,
            message::encode_checksum_verify(0xDEAD_BEEF),
        );
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::Error);
        assert_eq!(message::decode_error(&reply.payload), "Checksum mismatch");
        assert_eq!(f.service.state(), ProtocolState::Error);
        assert!(!f.root.join("bad").exists());
    }

    #[test]
    fn error_state_recovers_via_ack() {
        let mut f = fixture(8);
        handshake(&mut f);

        // Illegal in Connected.
        let frame = f
            .client
            .build_chunk(MessageType::FileData, b"zz".to_vec(), 0);
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::Error);
        assert_eq!(f.service.state(), ProtocolState::Error);

        // Everything but Close/Ack keeps failing.
        let frame = f
            .client
            .build(MessageType::FileRequest, message::encode_file_request("x"));
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::Error);

        // Ack recovers to Connected.
        let frame = f.client.build(MessageType::Ack, message::encode_ack(0));
        assert!(f.service.handle(&frame).expect("handle").is_none());
        assert_eq!(f.service.state(), ProtocolState::Connected);
    }

    #[test]
    fn close_resets_and_is_idempotent() {
        let mut f = fixture(8);
        handshake(&mut f);

        let frame = f.client.build(MessageType::Close, Vec::new());
        assert!(f.service.handle(&frame).expect("handle").is_none());
        assert_eq!(f.service.state(), ProtocolState::Init);

        let frame = f.client.build(MessageType::Close, Vec::new());
        assert!(f.service.handle(&frame).expect("handle").is_none());
        assert_eq!(f.service.state(), ProtocolState::Init);
    }

    #[test]
    fn listing_detail_and_names() {
        let mut f = fixture(8);
        fs::create_dir_all(&f.root).expect("mkdir");
        fs::write(f.root.join("a.txt"), b"abc").expect("write");
        fs::create_dir(f.root.join("sub")).expect("mkdir");
        fs::write(f.root.join("sub/b.txt"), b"defg").expect("write");
        handshake(&mut f);

        let frame = f.client.build(
            MessageType::ListRequest,
            message::encode_list_request(&ListRequest {
                format: ListFormat::Detail,
                filter: ListFilter::All,
                path: String::new(),
            }),
        );
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::ListResponse);
        let (_, entries) = message::decode_list_response(&reply.payload).expect("decode");
        assert_eq!(
            entries
                .iter()
                .map(|e| (e.name.as_str(), e.size, e.is_dir))
                .collect::<Vec<_>>(),
            vec![("a.txt", 3, false), ("sub", 0, true)]
        );
        assert_eq!(f.service.state(), ProtocolState::Connected);

        let frame = f.client.build(
            MessageType::NlstRequest,
            message::encode_nlst_request(&NlstRequest {
                filter: ListFilter::All,
                path: String::new(),
            }),
        );
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::NlstResponse);
        assert_eq!(
            message::decode_nlst_response(&reply.payload).expect("decode"),
            vec!["a.txt".to_string(), "sub".to_string()]
        );
    }

    #[test]
    fn listing_outside_root_is_list_error() {
        let mut f = fixture(8);
        handshake(&mut f);

        let frame = f.client.build(
            MessageType::ListRequest,
            message::encode_list_request(&ListRequest {
                format: ListFormat::Basic,
                filter: ListFilter::All,
                path: "../..".to_string(),
            }),
        );
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::ListError);
        assert_eq!(f.service.state(), ProtocolState::Error);
    }

    #[test]
    fn invalid_utf8_file_request_is_error() {
        let mut f = fixture(8);
        handshake(&mut f);

        let frame = f
            .client
            .build(MessageType::FileRequest, vec![0xff, 0xfe, 0xfd]);
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::Error);
        assert_eq!(f.service.state(), ProtocolState::Error);
    }

    #[test]
    fn path_escape_is_error() {
        let mut f = fixture(8);
        handshake(&mut f);

        let frame = f.client.build(
            MessageType::FileRequest,
            message::encode_file_request("../escape.txt"),
        );
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::Error);
    }

    #[test]
    fn handshake_version_mismatch() {
        let mut f = fixture(8);
        let frame = f
            .client
            .build(MessageType::Handshake, message::encode_handshake(2));
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::Error);
        assert!(message::decode_error(&reply.payload).contains("Version mismatch"));
        assert_eq!(f.service.state(), ProtocolState::Error);
    }

    #[test]
    fn unsupported_header_version_is_fatal() {
        let mut f = fixture(8);
        let mut frame = f
            .client
            .build(MessageType::Handshake, message::encode_handshake(1));
        frame.header.version = 9;
        let err = f.service.handle(&frame).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion(9)));
    }

    #[test]
    fn file_data_without_context_rejected() {
        let mut f = fixture(8);
        handshake(&mut f);
        // Move to Transferring with a request, then close the context by
        // superseding... instead simply send data in Connected: illegal state.
        let frame = f
            .client
            .build_chunk(MessageType::FileData, b"zz".to_vec(), 0);
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::Error);
    }

    #[test]
    fn empty_file_upload() {
        let mut f = fixture(8192);
        handshake(&mut f);

        let frame = f.client.build(
            MessageType::FileRequest,
            message::encode_file_request("empty.bin"),
        );
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        let meta = expect_metadata(&reply);
        assert_eq!(meta.file_size, 0);

        let frame = f.client.build(
            MessageType::FileMetadata,
            message::encode_file_metadata(&FileMetadata {
                file_size: 0,
                crc32: 0,
                filename: "empty.bin".to_string(),
            }),
        );
        f.service.handle(&frame).expect("handle").expect("reply");

        let frame = f.client.build(
            MessageType::ChecksumVerify,
            message::encode_checksum_verify(crc32(b"")),
        );
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::Ack);
        assert!(f.root.join("empty.bin").exists());
    }

    #[test]
    fn oversized_last_chunk_rejected() {
        let mut f = fixture(8);
        handshake(&mut f);

        let frame = f
            .client
            .build(MessageType::FileRequest, message::encode_file_request("x"));
        f.service.handle(&frame).expect("handle").expect("reply");
        let frame = f.client.build(
            MessageType::FileMetadata,
            message::encode_file_metadata(&FileMetadata {
                file_size: 10,
                crc32: 0,
                filename: "x".to_string(),
            }),
        );
        f.service.handle(&frame).expect("handle").expect("reply");

        let frame = f
            .client
            .build_chunk(MessageType::FileData, b"890".to_vec(), 1);
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::Error);
    }

    #[test]
    fn download_chunk_pull() {
        let mut f = fixture(8);
        fs::create_dir_all(&f.root).expect("mkdir");
        fs::write(f.root.join("data.bin"), b"0123456789").expect("write");
        handshake(&mut f);

        let frame = f.client.build(
            MessageType::FileRequest,
            message::encode_file_request("data.bin"),
        );
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        let meta = expect_metadata(&reply);
        assert_eq!(meta.file_size, 10);
        assert_eq!(meta.crc32, crc32(b"0123456789"));

        for (chunk, expected) in [(0u32, &b"01234567"[..]), (1, &b"89"[..])] {
            let frame = f
                .client
                .build_chunk(MessageType::FileData, Vec::new(), chunk);
            let reply = f.service.handle(&frame).expect("handle").expect("reply");
            assert_eq!(reply.header.msg_type, MessageType::FileData);
            assert_eq!(reply.header.chunk_number, chunk);
            assert_eq!(reply.payload, expected);
        }

        // Pull past the end: chunk error.
        let frame = f
            .client
            .build_chunk(MessageType::FileData, Vec::new(), 2);
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::Error);
    }

    #[test]
    fn resume_after_preserved_partial() {
        let dir = TempDir::new().expect("create temp dir");
        let root = dir.path().join("root");
        let partial = dir.path().join("temp/partial");

        // First session uploads chunk 0 of two, then disconnects.
        let mut first = TransferService::with_dirs(
            &root,
            dir.path().join("temp/session-1"),
            &partial,
            8,
            StorageMode::Hybrid,
            1024 * 1024,
        )
        .expect("service");
        let mut client = FrameBuilder::new(42);

        let frame = client.build(MessageType::Handshake, message::encode_handshake(1));
        first.handle(&frame).expect("handle").expect("reply");
        let frame = client.build(MessageType::FileRequest, message::encode_file_request("x"));
        first.handle(&frame).expect("handle").expect("reply");
        let frame = client.build(
            MessageType::FileMetadata,
            message::encode_file_metadata(&FileMetadata {
                file_size: 10,
                crc32: 0,
                filename: "x".to_string(),
            }),
        );
        first.handle(&frame).expect("handle").expect("reply");
        let frame = client.build_chunk(MessageType::FileData, b"01234567".to_vec(), 0);
        first.handle(&frame).expect("handle").expect("reply");
        first.shutdown();

        // Second session resumes at offset 8 and sends only chunk 1.
        let mut second = TransferService::with_dirs(
            &root,
            dir.path().join("temp/session-2"),
            &partial,
            8,
            StorageMode::Hybrid,
            1024 * 1024,
        )
        .expect("service");

        let frame = client.build(MessageType::Handshake, message::encode_handshake(1));
        second.handle(&frame).expect("handle").expect("reply");
        let frame = client.build(
            MessageType::ResumeRequest,
            message::encode_resume_request(&ResumeRequest {
                offset: 8,
                filename: "x".to_string(),
            }),
        );
        let reply = second.handle(&frame).expect("handle").expect("reply");
        let meta = expect_metadata(&reply);
        assert_eq!(meta.file_size, 10);

        let frame = client.build_chunk(MessageType::FileData, b"89".to_vec(), 1);
        let reply = second.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::Ack);

        let frame = client.build(
            MessageType::ChecksumVerify,
            message::encode_checksum_verify(crc32(b"0123456789")),
        );
        let reply = second.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.msg_type, MessageType::Ack);
        assert_eq!(fs::read(root.join("x")).expect("read"), b"0123456789");
    }

    #[test]
    fn replies_echo_session_id() {
        let mut f = fixture(8);
        let frame = f
            .client
            .build(MessageType::Handshake, message::encode_handshake(1));
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        assert_eq!(reply.header.session_id, 0x1122_3344_5566_7788);
    }

    #[test]
    fn list_entry_shape_matches_fs() {
        let mut f = fixture(8);
        fs::create_dir_all(&f.root).expect("mkdir");
        fs::write(f.root.join("only.txt"), b"1234").expect("write");
        handshake(&mut f);

        let frame = f.client.build(
            MessageType::ListRequest,
            message::encode_list_request(&ListRequest {
                format: ListFormat::Detail,
                filter: ListFilter::FilesOnly,
                path: String::new(),
            }),
        );
        let reply = f.service.handle(&frame).expect("handle").expect("reply");
        let (_, entries) = message::decode_list_response(&reply.payload).expect("decode");
        let expected_mtime = fs::metadata(f.root.join("only.txt"))
            .expect("metadata")
            .modified()
            .expect("mtime")
            .duration_since(std::time::UNIX_EPOCH)
            .expect("epoch")
            .as_secs();
        assert_eq!(
            entries,
            vec![ListEntry {
                name: "only.txt".to_string(),
                size: 4,
                mtime: expected_mtime,
                is_dir: false,
            }]
        );
    }
}
