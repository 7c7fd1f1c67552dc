//! DBTP (Depot Binary Transfer Protocol) frame layer.
//!
//! Every exchange on the wire is a frame: a fixed 32-byte header followed by
//! an opaque payload whose length the header declares.
//!
//! ## Frame Format
//!
//! ```text
//! ┌─────────┬─────────┬──────────┬────────────────┬──────────────┐
//! │  Magic  │ Version │ MsgType  │ Payload length │  Sequence    │
//! │ 2 bytes │ 2 bytes │ 4 bytes  │    4 bytes     │   4 bytes    │
//! ├─────────┴─────────┴──────────┼────────────────┼──────────────┤
//! │   Checksum    │ Chunk number │          Session id           │
//! │   4 bytes     │   4 bytes    │            8 bytes            │
//! ├───────────────┴──────────────┴───────────────────────────────┤
//! │                      Payload (variable)                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. The checksum is CRC32 (IEEE) over the payload
//! bytes; a zero checksum is accepted for an empty payload, and for control
//! frames other than `FileData` it is treated as "not computed".

use crate::error::{Error, Result};

/// Protocol magic, the ASCII bytes "DB".
pub const MAGIC: u16 = 0x4442;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 32;

/// Protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: u16 = 1;

/// Maximum payload size (16 MB). Frames declaring more are rejected outright.
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Message types in the DBTP protocol. Numeric codes are wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Version negotiation; first frame of every session
    Handshake = 1,
    /// Open a transfer for a relative path
    FileRequest = 2,
    /// File size, checksum, and name for the live transfer
    FileMetadata = 3,
    /// One chunk of file content (empty payload = chunk read request)
    FileData = 4,
    /// Declare the CRC32 of the fully assembled file
    ChecksumVerify = 5,
    /// Human-readable failure report
    Error = 6,
    /// Acknowledge a received frame
    Ack = 7,
    /// Re-open an interrupted transfer at an offset
    ResumeRequest = 8,
    /// Reset the session toward its initial state
    Close = 9,
    /// Request a directory listing
    ListRequest = 10,
    /// Directory listing records
    ListResponse = 11,
    /// Request a names-only listing
    NlstRequest = 12,
    /// Newline-joined names
    NlstResponse = 13,
    /// Listing-specific failure report
    ListError = 14,
}

impl MessageType {
    /// Parse a message type from its wire code.
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Handshake),
            2 => Some(Self::FileRequest),
            3 => Some(Self::FileMetadata),
            4 => Some(Self::FileData),
            5 => Some(Self::ChecksumVerify),
            6 => Some(Self::Error),
            7 => Some(Self::Ack),
            8 => Some(Self::ResumeRequest),
            9 => Some(Self::Close),
            10 => Some(Self::ListRequest),
            11 => Some(Self::ListResponse),
            12 => Some(Self::NlstRequest),
            13 => Some(Self::NlstResponse),
            14 => Some(Self::ListError),
            _ => None,
        }
    }
}

impl TryFrom<u32> for MessageType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Self::from_code(value).ok_or(Error::UnknownMessageType(value))
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A protocol frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version
    pub version: u16,
    /// Message type
    pub msg_type: MessageType,
    /// Payload length in bytes
    pub payload_length: u32,
    /// Monotonic per-sender counter
    pub sequence_number: u32,
    /// CRC32 of the payload
    pub checksum: u32,
    /// Chunk index for data frames and their acks, 0 otherwise
    pub chunk_number: u32,
    /// Opaque identifier tying related frames to one logical session
    pub session_id: u64,
}

impl FrameHeader {
    /// Encode the header to its 32-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&MAGIC.to_be_bytes());
        buf[2..4].copy_from_slice(&self.version.to_be_bytes());
        buf[4..8].copy_from_slice(&(self.msg_type as u32).to_be_bytes());
        buf[8..12].copy_from_slice(&self.payload_length.to_be_bytes());
        buf[12..16].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[16..20].copy_from_slice(&self.checksum.to_be_bytes());
        buf[20..24].copy_from_slice(&self.chunk_number.to_be_bytes());
        buf[24..32].copy_from_slice(&self.session_id.to_be_bytes());
        buf
    }

    /// Decode a header from bytes.
    ///
    /// Fails on a short slice, a bad magic, or an unknown message type.
    /// The checksum is not validated here; the payload has not been read yet.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::TruncatedHeader(buf.len()));
        }

        let magic = u16::from_be_bytes([buf[0], buf[1]]);
        if magic != MAGIC {
            return Err(Error::BadMagic(magic));
        }

        let version = u16::from_be_bytes([buf[2], buf[3]]);
        let msg_type =
            MessageType::try_from(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]))?;
        let payload_length = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        if payload_length > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge(payload_length));
        }

        Ok(Self {
            version,
            msg_type,
            payload_length,
            sequence_number: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
            checksum: u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]),
            chunk_number: u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]),
            session_id: u64::from_be_bytes([
                buf[24], buf[25], buf[26], buf[27], buf[28], buf[29], buf[30], buf[31],
            ]),
        })
    }

    /// Verify the header checksum against the received payload.
    ///
    /// A zero checksum passes for an empty payload, and for any message kind
    /// other than `FileData` (treated as "not computed").
    pub fn verify_checksum(&self, payload: &[u8]) -> Result<()> {
        if self.checksum == 0 && (payload.is_empty() || self.msg_type != MessageType::FileData) {
            return Ok(());
        }

        let computed = crc32(payload);
        if computed == self.checksum {
            Ok(())
        } else {
            Err(Error::FrameChecksum {
                expected: self.checksum,
                computed,
            })
        }
    }
}

/// A complete frame: header plus payload.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame header
    pub header: FrameHeader,
    /// Payload bytes; length matches `header.payload_length`
    pub payload: Vec<u8>,
}

impl Frame {
    /// Serialize header and payload into one buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Compute the CRC32 (IEEE) of a byte slice.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Builds outbound frames for one endpoint of a session.
///
/// Owns the monotonic sequence counter and stamps every frame with the
/// session identifier and a freshly computed payload checksum.
#[derive(Debug)]
pub struct FrameBuilder {
    version: u16,
    session_id: u64,
    sequence: u32,
}

impl FrameBuilder {
    /// Create a builder for the given session identifier.
    #[must_use]
    pub const fn new(session_id: u64) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            session_id,
            sequence: 0,
        }
    }

    /// The session identifier stamped on outbound frames.
    #[must_use]
    pub const fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Change the session identifier (a server echoes the peer's).
    pub fn set_session_id(&mut self, session_id: u64) {
        self.session_id = session_id;
    }

    /// Next sequence number that will be assigned.
    #[must_use]
    pub const fn next_sequence(&self) -> u32 {
        self.sequence
    }

    /// Build a frame, consuming one sequence number.
    pub fn build(&mut self, msg_type: MessageType, payload: Vec<u8>) -> Frame {
        self.build_chunk(msg_type, payload, 0)
    }

    /// Build a frame carrying a chunk number (data frames and their acks).
    #[allow(clippy::cast_possible_truncation)]
    pub fn build_chunk(&mut self, msg_type: MessageType, payload: Vec<u8>, chunk: u32) -> Frame {
        let header = FrameHeader {
            version: self.version,
            msg_type,
            payload_length: payload.len() as u32,
            sequence_number: self.sequence,
            checksum: crc32(&payload),
            chunk_number: chunk,
            session_id: self.session_id,
        };
        self.sequence = self.sequence.wrapping_add(1);
        Frame { header, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> FrameHeader {
        FrameHeader {
            version: PROTOCOL_VERSION,
            msg_type: MessageType::FileData,
            payload_length: 3,
            sequence_number: 42,
            checksum: crc32(b"Hi\n"),
            chunk_number: 7,
            session_id: 0xDEAD_BEEF_CAFE_F00D,
        }
    }

    #[test]
    fn header_round_trip() {
        let header = sample_header();
        let encoded = header.encode();
        assert_eq!(encoded.len(), HEADER_SIZE);

        let decoded = FrameHeader::decode(&encoded).expect("decode");
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut encoded = sample_header().encode();
        encoded[0] = 0x00;
        let err = FrameHeader::decode(&encoded).unwrap_err();
        assert!(matches!(err, Error::BadMagic(_)));
    }

    #[test]
    fn header_rejects_short_input() {
        let encoded = sample_header().encode();
        let err = FrameHeader::decode(&encoded[..31]).unwrap_err();
        assert!(matches!(err, Error::TruncatedHeader(31)));
    }

    #[test]
    fn header_rejects_unknown_type() {
        let mut encoded = sample_header().encode();
        encoded[4..8].copy_from_slice(&99u32.to_be_bytes());
        let err = FrameHeader::decode(&encoded).unwrap_err();
        assert!(matches!(err, Error::UnknownMessageType(99)));
    }

    #[test]
    fn header_rejects_oversized_payload() {
        let mut encoded = sample_header().encode();
        encoded[8..12].copy_from_slice(&(MAX_PAYLOAD_SIZE + 1).to_be_bytes());
        let err = FrameHeader::decode(&encoded).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge(_)));
    }

    #[test]
    fn checksum_verification() {
        let header = sample_header();
        assert!(header.verify_checksum(b"Hi\n").is_ok());
        assert!(header.verify_checksum(b"hi\n").is_err());
    }

    #[test]
    fn zero_checksum_valid_for_empty_payload() {
        let mut header = sample_header();
        header.checksum = 0;
        header.payload_length = 0;
        assert!(header.verify_checksum(b"").is_ok());
    }

    #[test]
    fn zero_checksum_valid_for_control_frames() {
        let mut header = sample_header();
        header.msg_type = MessageType::Handshake;
        header.checksum = 0;
        assert!(header.verify_checksum(&1u32.to_be_bytes()).is_ok());
    }

    #[test]
    fn zero_checksum_invalid_for_nonempty_data() {
        let mut header = sample_header();
        header.checksum = 0;
        assert!(header.verify_checksum(b"Hi\n").is_err());
    }

    #[test]
    fn known_crc32_value() {
        // CRC32("Hi\n") pinned by the protocol conformance suite.
        assert_eq!(crc32(b"Hi\n"), 0x97D0_5E3C);
    }

    #[test]
    fn message_type_codes_are_contract() {
        for (code, expected) in [
            (1, MessageType::Handshake),
            (2, MessageType::FileRequest),
            (3, MessageType::FileMetadata),
            (4, MessageType::FileData),
            (5, MessageType::ChecksumVerify),
            (6, MessageType::Error),
            (7, MessageType::Ack),
            (8, MessageType::ResumeRequest),
            (9, MessageType::Close),
            (10, MessageType::ListRequest),
            (11, MessageType::ListResponse),
            (12, MessageType::NlstRequest),
            (13, MessageType::NlstResponse),
            (14, MessageType::ListError),
        ] {
            assert_eq!(MessageType::from_code(code), Some(expected));
            assert_eq!(expected as u32, code);
        }
        assert_eq!(MessageType::from_code(0), None);
        assert_eq!(MessageType::from_code(15), None);
    }

    #[test]
    fn builder_assigns_monotonic_sequence() {
        let mut builder = FrameBuilder::new(9);
        let a = builder.build(MessageType::Handshake, vec![0, 0, 0, 1]);
        let b = builder.build(MessageType::Close, Vec::new());
        assert_eq!(a.header.sequence_number, 0);
        assert_eq!(b.header.sequence_number, 1);
        assert_eq!(a.header.session_id, 9);
        assert_eq!(a.header.checksum, crc32(&[0, 0, 0, 1]));
        assert_eq!(b.header.payload_length, 0);
    }

    #[test]
    fn frame_to_bytes_concatenates() {
        let mut builder = FrameBuilder::new(1);
        let frame = builder.build_chunk(MessageType::FileData, b"89".to_vec(), 1);
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE + 2);
        assert_eq!(&bytes[HEADER_SIZE..], b"89");
        let decoded = FrameHeader::decode(&bytes).expect("decode");
        assert_eq!(decoded.chunk_number, 1);
    }
}
