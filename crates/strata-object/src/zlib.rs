//! zlib wrapping for stored object bodies.
//!
//! Objects at rest are `"<type> <size>\0<body>"` run through zlib
//! (`cmf`/`flg` pair, deflate stream, adler32 trailer). Inflation
//! first sanity-checks the two-byte header: the compression method
//! must be deflate and `(cmf * 256 + flg)` must be divisible by 31.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::ObjectError;

/// Compress bytes into a zlib stream.
pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writing to a Vec cannot fail.
    encoder.write_all(data).unwrap_or_default();
    encoder.finish().unwrap_or_default()
}

/// Validate the zlib header without inflating.
pub fn check_header(data: &[u8]) -> Result<(), ObjectError> {
    if data.len() < 2 {
        return Err(ObjectError::ZlibInvalidHeader("stream shorter than 2 bytes".into()));
    }
    let cmf = data[0];
    let flg = data[1];
    if cmf & 0x0f != 8 {
        return Err(ObjectError::ZlibInvalidHeader(format!(
            "compression method {} is not deflate",
            cmf & 0x0f
        )));
    }
    if (u32::from(cmf) * 256 + u32::from(flg)) % 31 != 0 {
        return Err(ObjectError::ZlibInvalidHeader(format!(
            "cmf/flg checksum failed: {cmf:#04x}/{flg:#04x}"
        )));
    }
    Ok(())
}

/// Decompress a full zlib stream.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>, ObjectError> {
    check_header(data)?;
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| ObjectError::ZlibInflate(e.to_string()))?;
    Ok(out)
}
