//! Programmatic client for the DBTP file transfer protocol.
//!
//! The client is synchronous: one request, one reply, in lockstep over a
//! blocking TCP stream. Uploads send chunks sequentially and wait for each
//! ack; downloads pull chunks with empty `FileData` requests and keep a
//! tracker sidecar (`<local>.state`) next to the target file, so an
//! interrupted download resumes by re-running [`FileClient::download`] with
//! the same local path.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::{Error, Result};
use crate::frame::{crc32, Frame, FrameBuilder, MessageType, PROTOCOL_VERSION};
use crate::message::{
    self, FileMetadata, ListEntry, ListFilter, ListFormat, ListRequest, NlstRequest,
    ResumeRequest,
};
use crate::tracker::{sidecar_path, ChunkTracker};
use crate::transport;

/// A connected, handshaken client session.
#[derive(Debug)]
pub struct FileClient {
    stream: TcpStream,
    builder: FrameBuilder,
    chunk_size: u32,
}

impl FileClient {
    /// Connect and perform the version handshake.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        Self::connect_with_chunk_size(addr, DEFAULT_CHUNK_SIZE)
    }

    /// Connect with a non-default chunk size.
    ///
    /// The chunk size must match the server's for chunk numbering to agree.
    pub fn connect_with_chunk_size<A: ToSocketAddrs>(addr: A, chunk_size: u32) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        let _ = stream.set_nodelay(true);

        let session_id = Uuid::new_v4().as_u64_pair().0;
        let mut client = Self {
            stream,
            builder: FrameBuilder::new(session_id),
            chunk_size,
        };
        client.handshake()?;
        Ok(client)
    }

    fn handshake(&mut self) -> Result<()> {
        let frame = self.builder.build(
            MessageType::Handshake,
            message::encode_handshake(PROTOCOL_VERSION),
        );
        let reply = self.exchange(&frame)?;
        if reply.header.msg_type != MessageType::Handshake {
            return Err(unexpected("Handshake", &reply));
        }
        debug!(session = self.builder.session_id(), "handshake complete");
        Ok(())
    }

    /// Send one frame and read the reply.
    fn exchange(&mut self, frame: &Frame) -> Result<Frame> {
        transport::write_frame(&mut self.stream, frame)?;
        let reply = transport::read_frame(&mut self.stream)?;
        match reply.header.msg_type {
            MessageType::Error | MessageType::ListError => {
                Err(Error::Peer(message::decode_error(&reply.payload)))
            }
            _ => Ok(reply),
        }
    }

    /// List a directory under the server's root.
    ///
    /// With `recursive`, directory entries are descended and nested names
    /// come back slash-joined (`sub/b.txt`).
    pub fn list(&mut self, path: &str, recursive: bool) -> Result<Vec<ListEntry>> {
        let request = ListRequest {
            format: ListFormat::Detail,
            filter: ListFilter::All,
            path: path.to_string(),
        };
        let frame = self.builder.build(
            MessageType::ListRequest,
            message::encode_list_request(&request),
        );
        let reply = self.exchange(&frame)?;
        if reply.header.msg_type != MessageType::ListResponse {
            return Err(unexpected("ListResponse", &reply));
        }

        let (_, mut entries) = message::decode_list_response(&reply.payload)?;
        if recursive {
            let mut nested = Vec::new();
            for entry in &entries {
                if entry.is_dir {
                    let sub_path = join_path(path, &entry.name);
                    for mut sub in self.list(&sub_path, true)? {
                        sub.name = format!("{}/{}", entry.name, sub.name);
                        nested.push(sub);
                    }
                }
            }
            entries.extend(nested);
        }
        Ok(entries)
    }

    /// Names-only listing of a directory under the server's root.
    pub fn nlst(&mut self, path: &str, filter: ListFilter) -> Result<Vec<String>> {
        let request = NlstRequest {
            filter,
            path: path.to_string(),
        };
        let frame = self.builder.build(
            MessageType::NlstRequest,
            message::encode_nlst_request(&request),
        );
        let reply = self.exchange(&frame)?;
        if reply.header.msg_type != MessageType::NlstResponse {
            return Err(unexpected("NlstResponse", &reply));
        }
        message::decode_nlst_response(&reply.payload)
    }

    /// Upload a local file to `remote` under the server's root.
    ///
    /// Chunks go out sequentially; every chunk is acked before the next is
    /// sent, and the transfer finishes with a checksum verification.
    /// Returns the number of bytes sent.
    pub fn upload(&mut self, local: &Path, remote: &str) -> Result<u64> {
        let mut file = File::open(local)?;
        let file_size = file.metadata()?.len();

        self.open_transfer(remote)?;
        self.declare_size(remote, file_size)?;
        let sent = self.send_chunks(&mut file, 0, 0)?;
        self.verify_upload(local)?;

        info!(remote, bytes = sent, "upload complete");
        Ok(sent)
    }

    /// Resume an interrupted upload from `offset`.
    ///
    /// Chunks are numbered from `chunk_number`; `offset` should sit on a
    /// chunk boundary of the original transfer.
    pub fn resume_upload(
        &mut self,
        local: &Path,
        remote: &str,
        offset: u64,
        chunk_number: u32,
    ) -> Result<u64> {
        let mut file = File::open(local)?;

        let request = ResumeRequest {
            offset,
            filename: remote.to_string(),
        };
        let frame = self.builder.build(
            MessageType::ResumeRequest,
            message::encode_resume_request(&request),
        );
        let reply = self.exchange(&frame)?;
        if reply.header.msg_type != MessageType::FileMetadata {
            return Err(unexpected("FileMetadata", &reply));
        }

        let sent = self.send_chunks(&mut file, offset, chunk_number)?;
        self.verify_upload(local)?;

        info!(remote, offset, bytes = sent, "resumed upload complete");
        Ok(sent)
    }

    /// Download `remote` into `local`, resuming from the sidecar if one is
    /// present.
    ///
    /// Progress is persisted to `<local>.state` after every chunk; the
    /// sidecar is removed once the assembled file verifies against the
    /// server's checksum. Returns the number of bytes fetched this call.
    pub fn download(&mut self, remote: &str, local: &Path) -> Result<u64> {
        let meta = self.open_transfer(remote)?;

        let sidecar = sidecar_path(local);
        let mut tracker = match ChunkTracker::load(&sidecar) {
            Ok(existing)
                if existing.file_size == meta.file_size
                    && existing.chunk_size == self.chunk_size =>
            {
                debug!(remote, resumed = existing.received_chunks.len(), "resuming download");
                existing
            }
            _ => ChunkTracker::new(meta.file_size, self.chunk_size),
        };

        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(local)?;

        let mut fetched = 0u64;
        for chunk in tracker.missing() {
            let request = self
                .builder
                .build_chunk(MessageType::FileData, Vec::new(), chunk);
            let reply = self.exchange(&request)?;
            if reply.header.msg_type != MessageType::FileData {
                return Err(unexpected("FileData", &reply));
            }
            if reply.header.chunk_number != chunk {
                return Err(Error::Peer(format!(
                    "chunk mismatch: asked for {chunk}, got {}",
                    reply.header.chunk_number
                )));
            }

            file.seek(SeekFrom::Start(
                u64::from(chunk) * u64::from(self.chunk_size),
            ))?;
            file.write_all(&reply.payload)?;
            fetched += reply.payload.len() as u64;

            // Persist before recording, so the sidecar never overstates.
            file.flush()?;
            tracker.mark(chunk)?;
            tracker.save(&sidecar)?;
        }

        file.set_len(meta.file_size)?;
        file.flush()?;
        drop(file);

        let content = fs::read(local)?;
        let computed = crc32(&content);
        if meta.crc32 != 0 && computed != meta.crc32 {
            return Err(Error::IntegrityMismatch {
                file: remote.to_string(),
                expected: meta.crc32,
                computed,
            });
        }

        if let Err(e) = fs::remove_file(&sidecar) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(error = %e, "sidecar cleanup failed");
            }
        }

        info!(remote, bytes = fetched, "download complete");
        Ok(fetched)
    }

    /// Close the session.
    ///
    /// Sends the reset frame (no reply expected) and drops the connection.
    pub fn close(mut self) -> Result<()> {
        let frame = self.builder.build(MessageType::Close, Vec::new());
        transport::write_frame(&mut self.stream, &frame)?;
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        Ok(())
    }

    fn open_transfer(&mut self, remote: &str) -> Result<FileMetadata> {
        let frame = self
            .builder
            .build(MessageType::FileRequest, message::encode_file_request(remote));
        let reply = self.exchange(&frame)?;
        if reply.header.msg_type != MessageType::FileMetadata {
            return Err(unexpected("FileMetadata", &reply));
        }
        message::decode_file_metadata(&reply.payload)
    }

    fn declare_size(&mut self, remote: &str, file_size: u64) -> Result<()> {
        let meta = FileMetadata {
            file_size,
            crc32: 0,
            filename: remote.to_string(),
        };
        let frame = self.builder.build(
            MessageType::FileMetadata,
            message::encode_file_metadata(&meta),
        );
        let reply = self.exchange(&frame)?;
        if reply.header.msg_type != MessageType::FileMetadata {
            return Err(unexpected("FileMetadata", &reply));
        }
        let echo = message::decode_file_metadata(&reply.payload)?;
        if echo.file_size != file_size {
            return Err(Error::Peer(format!(
                "size not accepted: declared {file_size}, echoed {}",
                echo.file_size
            )));
        }
        Ok(())
    }

    /// Stream chunks from `offset` onward, numbered from `first_chunk`.
    fn send_chunks(&mut self, file: &mut File, offset: u64, first_chunk: u32) -> Result<u64> {
        file.seek(SeekFrom::Start(offset))?;

        let mut chunk = first_chunk;
        let mut sent = 0u64;
        let mut buf = vec![0u8; self.chunk_size as usize];
        loop {
            let mut filled = 0;
            while filled < buf.len() {
                let n = file.read(&mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }

            let frame =
                self.builder
                    .build_chunk(MessageType::FileData, buf[..filled].to_vec(), chunk);
            let sequence = frame.header.sequence_number;
            let reply = self.exchange(&frame)?;
            if reply.header.msg_type != MessageType::Ack {
                return Err(unexpected("Ack", &reply));
            }
            if reply.header.chunk_number != chunk
                || message::decode_ack(&reply.payload)? != sequence
            {
                return Err(Error::Peer(format!("misdirected ack for chunk {chunk}")));
            }

            sent += filled as u64;
            chunk += 1;
            if filled < buf.len() {
                break;
            }
        }
        Ok(sent)
    }

    fn verify_upload(&mut self, local: &Path) -> Result<()> {
        let content = fs::read(local)?;
        let frame = self.builder.build(
            MessageType::ChecksumVerify,
            message::encode_checksum_verify(crc32(&content)),
        );
        let reply = self.exchange(&frame)?;
        if reply.header.msg_type != MessageType::Ack {
            return Err(unexpected("Ack", &reply));
        }
        Ok(())
    }
}

/// Read the download progress sidecar for a local target, if present.
pub fn download_progress(local: &Path) -> Option<ChunkTracker> {
    ChunkTracker::load(&sidecar_path(local)).ok()
}

fn unexpected(expected: &str, reply: &Frame) -> Error {
    Error::UnexpectedMessage {
        expected: expected.to_string(),
        actual: reply.header.msg_type.to_string(),
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{name}", base.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_path_handles_empty_base() {
        assert_eq!(join_path("", "sub"), "sub");
        assert_eq!(join_path("a", "b"), "a/b");
        assert_eq!(join_path("a/", "b"), "a/b");
    }
}
