//! Length-delimited frame transport.
//!
//! Three ways to move frames over a byte stream, one per family of server
//! back-end:
//!
//! - [`read_frame`] / [`write_frame`] — blocking, over any `Read`/`Write`
//!   (the blocking and thread-per-connection back-ends, and the client).
//! - [`async_read_frame`] / [`async_write_frame`] — cooperative, over tokio
//!   streams; suspension points sit exactly at the read-exactly and
//!   write-all boundaries.
//! - [`FrameAccumulator`] — incremental, for readiness-polled connections
//!   that receive arbitrary byte slices and must buffer partial frames.
//!
//! All inbound paths verify the payload checksum; a mismatch is fatal and
//! the connection is expected to be dropped without a reply.

use std::io::{Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::frame::{Frame, FrameHeader, HEADER_SIZE};

fn map_eof(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        Error::Io(err)
    }
}

/// Read one complete frame from a blocking stream.
///
/// Blocks until the header and the declared payload have arrived. A clean
/// EOF at a frame boundary maps to [`Error::ConnectionClosed`].
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf).map_err(map_eof)?;

    let header = FrameHeader::decode(&header_buf)?;

    let mut payload = vec![0u8; header.payload_length as usize];
    if !payload.is_empty() {
        reader.read_exact(&mut payload).map_err(map_eof)?;
    }

    header.verify_checksum(&payload)?;
    Ok(Frame { header, payload })
}

/// Write one complete frame to a blocking stream.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    writer.write_all(&frame.header.encode())?;
    if !frame.payload.is_empty() {
        writer.write_all(&frame.payload)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read one complete frame from an async stream.
pub async fn async_read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf).await.map_err(map_eof)?;

    let header = FrameHeader::decode(&header_buf)?;

    let mut payload = vec![0u8; header.payload_length as usize];
    if !payload.is_empty() {
        reader.read_exact(&mut payload).await.map_err(map_eof)?;
    }

    header.verify_checksum(&payload)?;
    Ok(Frame { header, payload })
}

/// Write one complete frame to an async stream.
pub async fn async_write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.header.encode()).await?;
    if !frame.payload.is_empty() {
        writer.write_all(&frame.payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Buffers bytes from a readiness-polled socket and yields complete frames.
///
/// The readiness loop feeds whatever `read` returned into [`push`] and then
/// drains [`next_frame`] until it reports `None`; a partial frame stays
/// buffered until the socket becomes readable again.
///
/// [`push`]: FrameAccumulator::push
/// [`next_frame`]: FrameAccumulator::next_frame
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buf: Vec<u8>,
}

impl FrameAccumulator {
    /// Create an empty accumulator.
    #[must_use]
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append bytes received from the socket.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, if one is fully buffered.
    ///
    /// Returns `Ok(None)` while the header or payload is still partial.
    /// Decode and checksum failures are fatal for the connection.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = FrameHeader::decode(&self.buf[..HEADER_SIZE])?;
        let frame_len = HEADER_SIZE + header.payload_length as usize;
        if self.buf.len() < frame_len {
            return Ok(None);
        }

        let payload = self.buf[HEADER_SIZE..frame_len].to_vec();
        self.buf.drain(..frame_len);

        header.verify_checksum(&payload)?;
        Ok(Some(Frame { header, payload }))
    }
}
