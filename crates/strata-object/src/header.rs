//! The `"<type> <size>\0"` framing that prefixes every stored object.

use crate::{ObjectError, ObjectType};

/// Parse a frame header. Returns `(type, body_size, header_length)`,
/// where `header_length` includes the NUL terminator.
pub fn parse(data: &[u8]) -> Result<(ObjectType, usize, usize), ObjectError> {
    let nul = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ObjectError::MalformedHeader("missing NUL terminator".into()))?;
    let header = &data[..nul];

    let space = header
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| ObjectError::MalformedHeader("missing space".into()))?;

    let obj_type = ObjectType::from_bytes(&header[..space])?;
    let size_str = std::str::from_utf8(&header[space + 1..])
        .map_err(|_| ObjectError::MalformedHeader("non-ASCII size".into()))?;
    let size = size_str
        .parse::<usize>()
        .map_err(|_| ObjectError::MalformedHeader(format!("bad size: {size_str:?}")))?;

    Ok((obj_type, size, nul + 1))
}

/// Render a frame header.
pub fn write(obj_type: ObjectType, body_size: usize) -> Vec<u8> {
    format!("{} {}\0", obj_type, body_size).into_bytes()
}
