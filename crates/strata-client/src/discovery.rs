//! Parsing the ref advertisement a remote returns from `info/refs`.

use std::collections::HashMap;
use std::io::Cursor;

use strata_hash::ObjectId;
use strata_protocol::capability::Capabilities;
use strata_protocol::pktline::{PktLine, PktReader};

use crate::ClientError;

/// What the remote advertised.
#[derive(Debug, Clone, Default)]
pub struct RemoteRefs {
    /// `(name, id)` in advertisement order; empty for an empty repository.
    pub refs: Vec<(String, ObjectId)>,
    /// Peeled targets of annotated tags, keyed by the tag ref name.
    pub peeled: HashMap<String, ObjectId>,
    pub capabilities: Capabilities,
    /// The branch `HEAD` points at, from `symref=HEAD:<ref>`.
    pub head_symref: Option<String>,
}

impl RemoteRefs {
    pub fn get(&self, name: &str) -> Option<ObjectId> {
        self.refs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }
}

/// Parse a smart advertisement body for the given service.
pub fn parse_advertisement(body: &[u8], service: &str) -> Result<RemoteRefs, ClientError> {
    let mut reader = PktReader::new(Cursor::new(body));

    // Service banner, then a flush.
    match reader.read_pkt().map_err(ClientError::Protocol)? {
        PktLine::Data(line) => {
            let text = String::from_utf8_lossy(&line);
            let expected = format!("# service={service}");
            if text.trim_end() != expected {
                return Err(ClientError::MalformedAdvertisement(format!(
                    "banner {text:?}, expected {expected:?}"
                )));
            }
        }
        other => {
            return Err(ClientError::MalformedAdvertisement(format!(
                "expected banner, got {other:?}"
            )))
        }
    }
    match reader.read_pkt().map_err(ClientError::Protocol)? {
        PktLine::Flush => {}
        other => {
            return Err(ClientError::MalformedAdvertisement(format!(
                "expected flush after banner, got {other:?}"
            )))
        }
    }

    let mut out = RemoteRefs::default();
    let mut first = true;
    loop {
        match reader.read_pkt().map_err(ClientError::Protocol)? {
            PktLine::Flush => break,
            PktLine::Delim => continue,
            PktLine::Data(line) => {
                let (ref_part, caps_part) = split_nul(&line);
                if first {
                    first = false;
                    if let Some(caps) = caps_part {
                        let caps = Capabilities::parse(&String::from_utf8_lossy(caps));
                        out.head_symref = caps
                            .get_all("symref")
                            .iter()
                            .find_map(|s| s.strip_prefix("HEAD:"))
                            .map(String::from);
                        out.capabilities = caps;
                    }
                }

                let text = String::from_utf8_lossy(ref_part);
                let text = text.trim_end();
                let Some((sha, name)) = text.split_once(' ') else {
                    return Err(ClientError::MalformedAdvertisement(format!(
                        "ref line {text:?}"
                    )));
                };
                let id = ObjectId::from_hex(sha).map_err(|_| {
                    ClientError::MalformedAdvertisement(format!("bad id {sha:?}"))
                })?;

                if name == "capabilities^{}" {
                    // Empty repository: capabilities with no refs.
                    continue;
                }
                match name.strip_suffix("^{}") {
                    Some(tag_name) => {
                        out.peeled.insert(tag_name.to_string(), id);
                    }
                    None => out.refs.push((name.to_string(), id)),
                }
            }
        }
    }
    Ok(out)
}

fn split_nul(line: &[u8]) -> (&[u8], Option<&[u8]>) {
    match line.iter().position(|&b| b == 0) {
        Some(at) => (&line[..at], Some(&line[at + 1..])),
        None => (line, None),
    }
}
