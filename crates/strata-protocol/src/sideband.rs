//! Side-band multiplexing: pack data, progress, and errors on one stream.

use std::io::{Read, Write};

use crate::pktline::{PktLine, PktReader, PktWriter, MAX_PKT_DATA_LEN};
use crate::ProtocolError;

/// Side-band channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    /// Channel 1: pack data.
    Data = 1,
    /// Channel 2: progress text; informational.
    Progress = 2,
    /// Channel 3: fatal error text.
    Error = 3,
}

/// Optional sink for progress text.
pub type ProgressSink<'a> = &'a mut dyn FnMut(&[u8]);

/// Write `data` on a side-band channel, split across frames. Each frame
/// spends one byte on the channel marker.
pub fn write_band<W: Write>(
    writer: &mut PktWriter<W>,
    band: Band,
    data: &[u8],
) -> Result<(), ProtocolError> {
    for chunk in data.chunks(MAX_PKT_DATA_LEN - 1) {
        let mut frame = Vec::with_capacity(chunk.len() + 1);
        frame.push(band as u8);
        frame.extend_from_slice(chunk);
        writer.write_pkt(&frame)?;
    }
    Ok(())
}

/// Demultiplex a side-band section: concatenate channel 1, forward channel
/// 2 to `progress`, and raise channel 3. Stops at FLUSH.
pub fn read_banded<R: Read>(
    reader: &mut PktReader<R>,
    mut progress: Option<ProgressSink<'_>>,
) -> Result<Vec<u8>, ProtocolError> {
    let mut data = Vec::new();
    loop {
        match reader.read_pkt()? {
            PktLine::Flush | PktLine::Delim => return Ok(data),
            PktLine::Data(frame) => {
                let Some((&channel, payload)) = frame.split_first() else {
                    continue;
                };
                match channel {
                    1 => data.extend_from_slice(payload),
                    2 => {
                        if let Some(sink) = progress.as_mut() {
                            sink(payload);
                        }
                    }
                    3 => {
                        return Err(ProtocolError::Remote(
                            String::from_utf8_lossy(payload).trim_end().to_string(),
                        ))
                    }
                    other => {
                        return Err(ProtocolError::Protocol(format!(
                            "unknown side-band channel {other}"
                        )))
                    }
                }
            }
        }
    }
}
