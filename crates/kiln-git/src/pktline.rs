//! Git pkt-line framing and sideband multiplexing.
//!
//! Each line is prefixed with a 4-character hex length that counts the
//! prefix itself. `0000` is a flush, `0001` a delimiter and `0002` a
//! response end; lengths 1 through 3 are never valid.

use crate::{GitError, Result};
use std::io::{Read, Write};

/// Largest encoded packet, prefix included.
pub const MAX_PKT_LEN: usize = 65520;

/// Largest payload a single data packet can carry.
pub const MAX_PKT_DATA: usize = MAX_PKT_LEN - 4;

/// Largest sideband payload per packet; the band byte takes one of
/// [`MAX_PKT_DATA`] bytes.
pub const MAX_SIDEBAND_DATA: usize = MAX_PKT_DATA - 1;

/// A pkt-line packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data line with content.
    Data(Vec<u8>),
    /// Flush packet (0000).
    Flush,
    /// Delimiter packet (0001).
    Delimiter,
    /// Response-end packet (0002).
    ResponseEnd,
}

impl PktLine {
    /// Creates a data packet from a string slice.
    pub fn from_string(s: &str) -> Self {
        Self::Data(s.as_bytes().to_vec())
    }

    /// Creates a data packet from bytes.
    pub fn from_bytes(b: impl Into<Vec<u8>>) -> Self {
        Self::Data(b.into())
    }

    /// Encodes the packet to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Data(data) => {
                if data.len() > MAX_PKT_DATA {
                    return Err(GitError::InvalidPktLine(format!(
                        "payload of {} bytes exceeds {}",
                        data.len(),
                        MAX_PKT_DATA
                    )));
                }
                let mut result = format!("{:04x}", data.len() + 4).into_bytes();
                result.extend_from_slice(data);
                Ok(result)
            }
            Self::Flush => Ok(b"0000".to_vec()),
            Self::Delimiter => Ok(b"0001".to_vec()),
            Self::ResponseEnd => Ok(b"0002".to_vec()),
        }
    }

    /// Returns true if this is a flush packet.
    pub fn is_flush(&self) -> bool {
        matches!(self, Self::Flush)
    }

    /// Returns the data content, or None for special packets.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the data as a string, trimming any trailing newline.
    pub fn as_str(&self) -> Option<&str> {
        self.data()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.trim_end_matches('\n'))
    }
}

/// Sideband channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Band {
    /// Pack data.
    Data = 1,
    /// Progress messages for the client's stderr.
    Progress = 2,
    /// Fatal error message.
    Error = 3,
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
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len_str = std::str::from_utf8(&len_buf)
            .map_err(|_| GitError::InvalidPktLine("invalid length prefix".to_string()))?;
        let len = usize::from_str_radix(len_str, 16)
            .map_err(|_| GitError::InvalidPktLine(format!("invalid length {:?}", len_str)))?;

        match len {
            0 => Ok(Some(PktLine::Flush)),
            1 => Ok(Some(PktLine::Delimiter)),
            2 => Ok(Some(PktLine::ResponseEnd)),
            3 => Err(GitError::InvalidPktLine("length 3 is reserved".to_string())),
            len if len > MAX_PKT_LEN => Err(GitError::InvalidPktLine(format!(
                "length {} exceeds {}",
                len, MAX_PKT_LEN
            ))),
            len => {
                let mut data = vec![0u8; len - 4];
                self.reader.read_exact(&mut data).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        GitError::InvalidPktLine(format!("truncated packet of length {}", len))
                    } else {
                        e.into()
                    }
                })?;
                Ok(Some(PktLine::Data(data)))
            }
        }
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

    /// Returns a mutable reference to the inner reader.
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consumes the reader and returns the inner reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writer for pkt-line format.
pub struct PktLineWriter<W> {
    writer: W,
}

impl<W: Write> PktLineWriter<W> {
    /// Creates a new pkt-line writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a packet.
    pub fn write(&mut self, pkt: &PktLine) -> Result<()> {
        self.writer.write_all(&pkt.encode()?)?;
        Ok(())
    }

    /// Writes a data line.
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.write(&PktLine::Data(data.to_vec()))
    }

    /// Writes a string line (with newline).
    pub fn write_line(&mut self, s: &str) -> Result<()> {
        let mut data = s.as_bytes().to_vec();
        if !s.ends_with('\n') {
            data.push(b'\n');
        }
        self.write(&PktLine::Data(data))
    }

    /// Writes `data` on a sideband channel, split into maximal packets.
    pub fn write_sideband(&mut self, band: Band, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(MAX_SIDEBAND_DATA) {
            let mut payload = Vec::with_capacity(chunk.len() + 1);
            payload.push(band as u8);
            payload.extend_from_slice(chunk);
            self.write(&PktLine::Data(payload))?;
        }
        Ok(())
    }

    /// Writes a flush packet.
    pub fn flush_pkt(&mut self) -> Result<()> {
        self.write(&PktLine::Flush)
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Collects the data channel of a sideband stream up to the next flush.
///
/// Progress packets are ignored; an error packet becomes a
/// [`GitError::Protocol`].
pub fn read_sideband<R: Read>(reader: &mut PktLineReader<R>) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    for pkt in reader.read_until_flush()? {
        let Some(payload) = pkt.data() else {
            continue;
        };
        match payload.split_first() {
            Some((1, rest)) => data.extend_from_slice(rest),
            Some((2, _)) => {}
            Some((3, rest)) => {
                return Err(GitError::Protocol(
                    String::from_utf8_lossy(rest).trim_end().to_string(),
                ))
            }
            _ => {
                return Err(GitError::InvalidPktLine(
                    "sideband packet without a valid band".to_string(),
                ))
            }
        }
    }
    Ok(data)
}
