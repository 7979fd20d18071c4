//! Git pkt-line framing.
//!
//! Each line is prefixed with a 4-character lowercase hex length that counts
//! the prefix itself, or is the bare flush marker "0000". The HTTP layer only
//! ever frames the short `# service=...` announcement; everything after it is
//! produced by git.

use crate::{GitError, Result, Service};
use std::io::Read;

/// The flush packet.
pub const FLUSH_MARKER: &[u8; 4] = b"0000";

/// Largest encoded pkt-line length (prefix included) that fits in 4 hex digits.
pub const MAX_PKT_LEN: usize = 0xFFFF;

const PREFIX_LEN: usize = 4;

/// A pkt-line packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data line with content.
    Data(Vec<u8>),
    /// Flush packet (0000).
    Flush,
}

impl PktLine {
    /// Creates a data packet from a string slice.
    pub fn from_string(s: &str) -> Self {
        Self::Data(s.as_bytes().to_vec())
    }

    /// Encodes the packet, rejecting payloads that do not fit the length prefix.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Data(data) => encode_line(data),
            Self::Flush => Ok(FLUSH_MARKER.to_vec()),
        }
    }

    /// Returns true if this is a flush packet.
    pub fn is_flush(&self) -> bool {
        matches!(self, Self::Flush)
    }

    /// Returns the data content, or None for a flush packet.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            Self::Flush => None,
        }
    }
}

/// Frames `payload` as a single pkt-line.
pub fn encode_line(payload: &[u8]) -> Result<Vec<u8>> {
    let len = payload.len() + PREFIX_LEN;
    if len > MAX_PKT_LEN {
        return Err(GitError::PktLineTooLong(payload.len()));
    }

    let mut line = format!("{:04x}", len).into_bytes();
    line.extend_from_slice(payload);
    Ok(line)
}

/// Returns the flush marker.
pub fn flush_marker() -> &'static [u8] {
    FLUSH_MARKER
}

/// Builds the smart-protocol preamble for a ref advertisement: the
/// `# service=git-<rpc>` line followed by a flush, as one contiguous buffer.
pub fn service_announcement(service: Service) -> Vec<u8> {
    let text = format!("# service={}\n", service.service_name());
    let mut out = Vec::with_capacity(text.len() + 2 * PREFIX_LEN);
    out.extend_from_slice(format!("{:04x}", text.len() + PREFIX_LEN).as_bytes());
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(FLUSH_MARKER);
    out
}

/// Reader for pkt-line format.
pub struct PktLineReader<R> {
    reader: R,
}

impl<R: Read> PktLineReader<R> {
    /// Creates a new pkt-line reader.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next packet, or `None` at a clean end of input.
    pub fn read(&mut self) -> Result<Option<PktLine>> {
        let mut len_buf = [0u8; PREFIX_LEN];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        if &len_buf == FLUSH_MARKER {
            return Ok(Some(PktLine::Flush));
        }

        let len_str = std::str::from_utf8(&len_buf)
            .map_err(|_| GitError::InvalidPktLine("invalid length prefix".to_string()))?;
        let len = usize::from_str_radix(len_str, 16)
            .map_err(|_| GitError::InvalidPktLine(format!("invalid length {len_str:?}")))?;

        if len < PREFIX_LEN {
            return Err(GitError::InvalidPktLine("length too small".to_string()));
        }

        let mut data = vec![0u8; len - PREFIX_LEN];
        self.reader.read_exact(&mut data)?;

        Ok(Some(PktLine::Data(data)))
    }

    /// Reads all packets until a flush packet or end of input.
    pub fn read_until_flush(&mut self) -> Result<Vec<PktLine>> {
        let mut packets = Vec::new();
        loop {
            match self.read()? {
                Some(PktLine::Flush) | None => break,
                Some(pkt) => packets.push(pkt),
            }
        }
        Ok(packets)
    }

    /// Consumes the reader and returns the inner reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}
