//! Payload codecs for every DBTP message kind.
//!
//! Payload shapes are wire contract:
//!
//! - Handshake: `version:u32`
//! - FileRequest: UTF-8 relative path
//! - FileMetadata: `file_size:u64, crc32:u32, filename:utf8`
//! - FileData: raw chunk bytes (empty payload = chunk read request)
//! - Ack: `acked_sequence:u32`
//! - ChecksumVerify: `crc32:u32`
//! - ResumeRequest: `offset:u64, filename:utf8`
//! - ListRequest: `format:u32, filter:u32, path:utf8`
//! - ListResponse: `format:u32` then records
//!   `{is_dir:u8, size:u64, mtime:u64, name_len:u16, name:utf8}`
//! - NlstRequest: `filter:u32, path:utf8`
//! - NlstResponse: names joined by `\n`
//! - Error / ListError: UTF-8 message
//! - Close: empty

use crate::error::{Error, Result};

/// Listing output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ListFormat {
    /// Names only
    Basic = 1,
    /// Names with size and mtime
    Detail = 2,
}

impl TryFrom<u32> for ListFormat {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(Self::Basic),
            2 => Ok(Self::Detail),
            other => Err(Error::MalformedPayload {
                kind: "ListRequest".to_string(),
                reason: format!("unknown list format {other}"),
            }),
        }
    }
}

/// Listing entry filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ListFilter {
    /// Files and directories
    All = 0,
    /// Regular files only
    FilesOnly = 1,
    /// Directories only
    DirsOnly = 2,
}

impl TryFrom<u32> for ListFilter {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::All),
            1 => Ok(Self::FilesOnly),
            2 => Ok(Self::DirsOnly),
            other => Err(Error::MalformedPayload {
                kind: "ListRequest".to_string(),
                reason: format!("unknown list filter {other}"),
            }),
        }
    }
}

/// One record of a detail listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Entry name (no path separators for a single-level listing)
    pub name: String,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Modification time, seconds since the Unix epoch
    pub mtime: u64,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

/// File size, checksum, and name for the live transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Authoritative size of the file
    pub file_size: u64,
    /// CRC32 of the published content, or 0 when not yet known
    pub crc32: u32,
    /// File name relative to the root
    pub filename: String,
}

/// Re-open an interrupted transfer at a byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeRequest {
    /// Byte offset the sender wants to continue from
    pub offset: u64,
    /// File name relative to the root
    pub filename: String,
}

/// Request a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    /// Output format
    pub format: ListFormat,
    /// Entry filter
    pub filter: ListFilter,
    /// Directory path relative to the root; empty for the root itself
    pub path: String,
}

/// Request a names-only listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NlstRequest {
    /// Entry filter
    pub filter: ListFilter,
    /// Directory path relative to the root
    pub path: String,
}

fn need(data: &[u8], len: usize, kind: &str) -> Result<()> {
    if data.len() < len {
        return Err(Error::MalformedPayload {
            kind: kind.to_string(),
            reason: format!("need {len} bytes, got {}", data.len()),
        });
    }
    Ok(())
}

fn utf8(data: &[u8], kind: &str) -> Result<String> {
    String::from_utf8(data.to_vec()).map_err(|_| Error::MalformedPayload {
        kind: kind.to_string(),
        reason: "invalid UTF-8".to_string(),
    })
}

fn u32_at(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn u64_at(data: &[u8], at: usize) -> u64 {
    u64::from_be_bytes([
        data[at],
        data[at + 1],
        data[at + 2],
        data[at + 3],
        data[at + 4],
        data[at + 5],
        data[at + 6],
        data[at + 7],
    ])
}

/// Encode a handshake payload.
#[must_use]
pub fn encode_handshake(version: u16) -> Vec<u8> {
    u32::from(version).to_be_bytes().to_vec()
}

/// Decode a handshake payload.
pub fn decode_handshake(data: &[u8]) -> Result<u32> {
    need(data, 4, "Handshake")?;
    Ok(u32_at(data, 0))
}

/// Encode a file request payload.
#[must_use]
pub fn encode_file_request(path: &str) -> Vec<u8> {
    path.as_bytes().to_vec()
}

/// Decode a file request payload.
pub fn decode_file_request(data: &[u8]) -> Result<String> {
    utf8(data, "FileRequest")
}

/// Encode a file metadata payload.
#[must_use]
pub fn encode_file_metadata(meta: &FileMetadata) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12 + meta.filename.len());
    buf.extend_from_slice(&meta.file_size.to_be_bytes());
    buf.extend_from_slice(&meta.crc32.to_be_bytes());
    buf.extend_from_slice(meta.filename.as_bytes());
    buf
}

/// Decode a file metadata payload.
pub fn decode_file_metadata(data: &[u8]) -> Result<FileMetadata> {
    need(data, 12, "FileMetadata")?;
    Ok(FileMetadata {
        file_size: u64_at(data, 0),
        crc32: u32_at(data, 8),
        filename: utf8(&data[12..], "FileMetadata")?,
    })
}

/// Encode an ack payload.
#[must_use]
pub fn encode_ack(acked_sequence: u32) -> Vec<u8> {
    acked_sequence.to_be_bytes().to_vec()
}

/// Decode an ack payload.
pub fn decode_ack(data: &[u8]) -> Result<u32> {
    need(data, 4, "Ack")?;
    Ok(u32_at(data, 0))
}

/// Encode a checksum-verify payload.
#[must_use]
pub fn encode_checksum_verify(crc32: u32) -> Vec<u8> {
    crc32.to_be_bytes().to_vec()
}

/// Decode a checksum-verify payload.
pub fn decode_checksum_verify(data: &[u8]) -> Result<u32> {
    need(data, 4, "ChecksumVerify")?;
    Ok(u32_at(data, 0))
}

/// Encode a resume request payload.
#[must_use]
pub fn encode_resume_request(req: &ResumeRequest) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + req.filename.len());
    buf.extend_from_slice(&req.offset.to_be_bytes());
    buf.extend_from_slice(req.filename.as_bytes());
    buf
}

/// Decode a resume request payload.
pub fn decode_resume_request(data: &[u8]) -> Result<ResumeRequest> {
    need(data, 8, "ResumeRequest")?;
    Ok(ResumeRequest {
        offset: u64_at(data, 0),
        filename: utf8(&data[8..], "ResumeRequest")?,
    })
}

/// Encode a list request payload.
#[must_use]
pub fn encode_list_request(req: &ListRequest) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + req.path.len());
    buf.extend_from_slice(&(req.format as u32).to_be_bytes());
    buf.extend_from_slice(&(req.filter as u32).to_be_bytes());
    buf.extend_from_slice(req.path.as_bytes());
    buf
}

/// Decode a list request payload.
pub fn decode_list_request(data: &[u8]) -> Result<ListRequest> {
    need(data, 8, "ListRequest")?;
    Ok(ListRequest {
        format: ListFormat::try_from(u32_at(data, 0))?,
        filter: ListFilter::try_from(u32_at(data, 4))?,
        path: utf8(&data[8..], "ListRequest")?,
    })
}

/// Encode a list response payload.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_list_response(format: ListFormat, entries: &[ListEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + entries.len() * 32);
    buf.extend_from_slice(&(format as u32).to_be_bytes());
    for entry in entries {
        buf.push(u8::from(entry.is_dir));
        buf.extend_from_slice(&entry.size.to_be_bytes());
        buf.extend_from_slice(&entry.mtime.to_be_bytes());
        let name = entry.name.as_bytes();
        buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
        buf.extend_from_slice(name);
    }
    buf
}

/// Decode a list response payload.
pub fn decode_list_response(data: &[u8]) -> Result<(ListFormat, Vec<ListEntry>)> {
    need(data, 4, "ListResponse")?;
    let format = ListFormat::try_from(u32_at(data, 0))?;

    let mut entries = Vec::new();
    let mut offset = 4;
    while offset < data.len() {
        need(data, offset + 19, "ListResponse")?;
        let is_dir = data[offset] != 0;
        let size = u64_at(data, offset + 1);
        let mtime = u64_at(data, offset + 9);
        let name_len = usize::from(u16::from_be_bytes([data[offset + 17], data[offset + 18]]));
        offset += 19;

        need(data, offset + name_len, "ListResponse")?;
        let name = utf8(&data[offset..offset + name_len], "ListResponse")?;
        offset += name_len;

        entries.push(ListEntry {
            name,
            size,
            mtime,
            is_dir,
        });
    }

    Ok((format, entries))
}

/// Encode an nlst request payload.
#[must_use]
pub fn encode_nlst_request(req: &NlstRequest) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + req.path.len());
    buf.extend_from_slice(&(req.filter as u32).to_be_bytes());
    buf.extend_from_slice(req.path.as_bytes());
    buf
}

/// Decode an nlst request payload.
pub fn decode_nlst_request(data: &[u8]) -> Result<NlstRequest> {
    need(data, 4, "NlstRequest")?;
    Ok(NlstRequest {
        filter: ListFilter::try_from(u32_at(data, 0))?,
        path: utf8(&data[4..], "NlstRequest")?,
    })
}

/// Encode an nlst response payload.
#[must_use]
pub fn encode_nlst_response(names: &[String]) -> Vec<u8> {
    names.join("\n").into_bytes()
}

/// Decode an nlst response payload.
pub fn decode_nlst_response(data: &[u8]) -> Result<Vec<String>> {
    let joined = utf8(data, "NlstResponse")?;
    if joined.is_empty() {
        return Ok(Vec::new());
    }
    Ok(joined.split('\n').map(str::to_string).collect())
}

/// Encode an error payload.
#[must_use]
pub fn encode_error(message: &str) -> Vec<u8> {
    message.as_bytes().to_vec()
}

/// Decode an error payload.
#[must_use]
pub fn decode_error(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_round_trip() {
        let encoded = encode_handshake(1);
        assert_eq!(encoded, vec![0, 0, 0, 1]);
        assert_eq!(decode_handshake(&encoded).unwrap(), 1);
    }

    #[test]
    fn handshake_rejects_short_payload() {
        assert!(decode_handshake(&[0, 0]).is_err());
    }

    #[test]
    fn file_metadata_round_trip() {
        let meta = FileMetadata {
            file_size: 3,
            crc32: 0x97D0_5E3C,
            filename: "hello.txt".to_string(),
        };
        let decoded = decode_file_metadata(&encode_file_metadata(&meta)).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn file_request_rejects_invalid_utf8() {
        let err = decode_file_request(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
    }

    #[test]
    fn resume_request_round_trip() {
        let req = ResumeRequest {
            offset: 8,
            filename: "x".to_string(),
        };
        let encoded = encode_resume_request(&req);
        assert_eq!(encoded.len(), 9);
        assert_eq!(decode_resume_request(&encoded).unwrap(), req);
    }

    #[test]
    fn list_request_round_trip() {
        let req = ListRequest {
            format: ListFormat::Detail,
            filter: ListFilter::All,
            path: "sub/dir".to_string(),
        };
        assert_eq!(decode_list_request(&encode_list_request(&req)).unwrap(), req);
    }

    #[test]
    fn list_request_rejects_unknown_format() {
        let mut encoded = encode_list_request(&ListRequest {
            format: ListFormat::Basic,
            filter: ListFilter::All,
            path: String::new(),
        });
        encoded[0..4].copy_from_slice(&7u32.to_be_bytes());
        assert!(decode_list_request(&encoded).is_err());
    }

    #[test]
    fn list_response_round_trip() {
        let entries = vec![
            ListEntry {
                name: "a.txt".to_string(),
                size: 3,
                mtime: 1_700_000_000,
                is_dir: false,
            },
            ListEntry {
                name: "sub".to_string(),
                size: 0,
                mtime: 1_700_000_001,
                is_dir: true,
            },
        ];
        let encoded = encode_list_response(ListFormat::Detail, &entries);
        let (format, decoded) = decode_list_response(&encoded).unwrap();
        assert_eq!(format, ListFormat::Detail);
        assert_eq!(decoded, entries);
    }

    #[test]
    fn list_response_empty() {
        let encoded = encode_list_response(ListFormat::Basic, &[]);
        let (format, decoded) = decode_list_response(&encoded).unwrap();
        assert_eq!(format, ListFormat::Basic);
        assert!(decoded.is_empty());
    }

    #[test]
    fn list_response_rejects_truncated_record() {
        let encoded = encode_list_response(
            ListFormat::Detail,
            &[ListEntry {
                name: "a.txt".to_string(),
                size: 3,
                mtime: 0,
                is_dir: false,
            }],
        );
        assert!(decode_list_response(&encoded[..encoded.len() - 2]).is_err());
    }

    #[test]
    fn nlst_round_trip() {
        let names = vec!["a.txt".to_string(), "sub".to_string()];
        assert_eq!(decode_nlst_response(&encode_nlst_response(&names)).unwrap(), names);
        assert!(decode_nlst_response(&[]).unwrap().is_empty());
    }

    #[test]
    fn nlst_request_round_trip() {
        let req = NlstRequest {
            filter: ListFilter::FilesOnly,
            path: String::new(),
        };
        assert_eq!(decode_nlst_request(&encode_nlst_request(&req)).unwrap(), req);
    }

    #[test]
    fn filter_codes_are_contract() {
        assert_eq!(ListFilter::try_from(0).unwrap(), ListFilter::All);
        assert_eq!(ListFilter::try_from(1).unwrap(), ListFilter::FilesOnly);
        assert_eq!(ListFilter::try_from(2).unwrap(), ListFilter::DirsOnly);
        assert!(ListFilter::try_from(3).is_err());
        assert_eq!(ListFormat::try_from(1).unwrap(), ListFormat::Basic);
        assert_eq!(ListFormat::try_from(2).unwrap(), ListFormat::Detail);
        assert!(ListFormat::try_from(0).is_err());
    }

    #[test]
    fn error_payload_is_lossy_utf8() {
        assert_eq!(decode_error(b"Checksum mismatch"), "Checksum mismatch");
        assert_eq!(decode_error(&[0xff]), "\u{fffd}");
    }
}
