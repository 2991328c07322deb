//! Pkt-line framing.
//!
//! Every frame opens with four hex digits giving the total frame length
//! (header included). `0000` is FLUSH (end of section), `0001` is DELIM.
//! The largest frame is 65520 bytes, leaving 65516 for payload.

use std::io::{Read, Write};

use crate::ProtocolError;

/// Maximum payload bytes in one frame.
pub const MAX_PKT_DATA_LEN: usize = 65516;
/// Maximum frame length including the 4-byte header.
pub const MAX_PKT_LEN: usize = 65520;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    Data(Vec<u8>),
    /// `0000` — end of section.
    Flush,
    /// `0001` — section separator.
    Delim,
}

/// Frame reader over any byte source.
pub struct PktReader<R> {
    inner: R,
}

impl<R: Read> PktReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Read one frame.
    pub fn read_pkt(&mut self) -> Result<PktLine, ProtocolError> {
        let mut header = [0u8; 4];
        self.inner.read_exact(&mut header).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ProtocolError::Truncated("eof reading pkt-line header".into())
            } else {
                ProtocolError::Io(e)
            }
        })?;

        let header_str = std::str::from_utf8(&header)
            .map_err(|_| ProtocolError::MalformedPktLine(format!("non-hex header {header:?}")))?;
        let len = usize::from_str_radix(header_str, 16).map_err(|_| {
            ProtocolError::MalformedPktLine(format!("non-hex header {header_str:?}"))
        })?;

        match len {
            0 => Ok(PktLine::Flush),
            1 => Ok(PktLine::Delim),
            2 | 3 => Err(ProtocolError::MalformedPktLine(format!(
                "reserved pkt-line length {len}"
            ))),
            _ if len > MAX_PKT_LEN => Err(ProtocolError::MalformedPktLine(format!(
                "pkt-line length {len} exceeds {MAX_PKT_LEN}"
            ))),
            _ => {
                let mut payload = vec![0u8; len - 4];
                self.inner.read_exact(&mut payload).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        ProtocolError::Truncated("eof inside pkt-line payload".into())
                    } else {
                        ProtocolError::Io(e)
                    }
                })?;
                Ok(PktLine::Data(payload))
            }
        }
    }

    /// Read data frames until a FLUSH (or DELIM).
    pub fn read_section(&mut self) -> Result<Vec<Vec<u8>>, ProtocolError> {
        let mut lines = Vec::new();
        loop {
            match self.read_pkt()? {
                PktLine::Data(data) => lines.push(data),
                PktLine::Flush | PktLine::Delim => return Ok(lines),
            }
        }
    }
}

/// Frame writer over any byte sink.
pub struct PktWriter<W> {
    inner: W,
}

impl<W: Write> PktWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Write one data frame. The payload must fit a single frame.
    pub fn write_pkt(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        if payload.len() > MAX_PKT_DATA_LEN {
            return Err(ProtocolError::MalformedPktLine(format!(
                "payload of {} exceeds the {MAX_PKT_DATA_LEN}-byte frame limit",
                payload.len()
            )));
        }
        write!(self.inner, "{:04x}", payload.len() + 4)?;
        self.inner.write_all(payload)?;
        Ok(())
    }

    /// Write arbitrary bytes, splitting across frames as needed.
    pub fn write_chunked(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        for chunk in data.chunks(MAX_PKT_DATA_LEN) {
            self.write_pkt(chunk)?;
        }
        Ok(())
    }

    /// Write a text frame, ensuring the trailing newline.
    pub fn write_text(&mut self, text: &str) -> Result<(), ProtocolError> {
        if text.ends_with('\n') {
            self.write_pkt(text.as_bytes())
        } else {
            let mut line = text.as_bytes().to_vec();
            line.push(b'\n');
            self.write_pkt(&line)
        }
    }

    pub fn write_flush(&mut self) -> Result<(), ProtocolError> {
        self.inner.write_all(b"0000")?;
        Ok(())
    }

    pub fn write_delim(&mut self) -> Result<(), ProtocolError> {
        self.inner.write_all(b"0001")?;
        Ok(())
    }
}

/// Encode one payload as a standalone pkt-line.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(payload.len() + 4);
    PktWriter::new(&mut buf).write_pkt(payload)?;
    Ok(buf)
}
