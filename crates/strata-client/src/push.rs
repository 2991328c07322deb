//! Push (send-pack): ref commands plus the pack the remote lacks.

use std::collections::HashSet;
use std::io::Cursor;

use strata_hash::ObjectId;
use strata_odb::TieredStore;
use strata_protocol::pktline::{PktLine, PktReader, PktWriter};
use strata_protocol::upload_pack::enumerate_closure;
use strata_protocol::ZERO_SHA_HEX;
use strata_transport::HttpTransport;
use tracing::info;

use crate::discovery::parse_advertisement;
use crate::ClientError;

const PUSH_CAPS: &str = "report-status side-band-64k agent=gitstrata/0.2";

/// One ref the caller wants to change on the remote.
#[derive(Debug, Clone)]
pub struct PushUpdate {
    pub ref_name: String,
    /// `None` deletes the remote ref.
    pub new: Option<ObjectId>,
    pub force: bool,
}

/// Per-ref result of a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub ref_name: String,
    pub accepted: bool,
    pub reason: Option<String>,
}

/// Render the send-pack body: commands, flush, pack.
pub fn build_push_body(
    commands: &[(ObjectId, ObjectId, String)],
    pack: &[u8],
) -> Result<Vec<u8>, ClientError> {
    let mut body = Vec::new();
    {
        let mut writer = PktWriter::new(&mut body);
        for (i, (old, new, name)) in commands.iter().enumerate() {
            let line = if i == 0 {
                format!("{old} {new} {name}\0{PUSH_CAPS}")
            } else {
                format!("{old} {new} {name}")
            };
            writer.write_text(&line)?;
        }
        writer.write_flush()?;
    }
    body.extend_from_slice(pack);
    Ok(body)
}

/// Parse the remote's report-status response (possibly side-band wrapped).
pub fn parse_report(response: &[u8]) -> Result<Vec<PushOutcome>, ClientError> {
    let report = match unwrap_sideband(response)? {
        Some(unwrapped) => unwrapped,
        None => response.to_vec(),
    };

    let mut outcomes = Vec::new();
    let mut reader = PktReader::new(Cursor::new(report.as_slice()));
    loop {
        match reader.read_pkt() {
            Ok(PktLine::Data(line)) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end();
                if let Some(rest) = text.strip_prefix("ok ") {
                    outcomes.push(PushOutcome {
                        ref_name: rest.to_string(),
                        accepted: true,
                        reason: None,
                    });
                } else if let Some(rest) = text.strip_prefix("ng ") {
                    let (name, reason) = rest.split_once(' ').unwrap_or((rest, "rejected"));
                    outcomes.push(PushOutcome {
                        ref_name: name.to_string(),
                        accepted: false,
                        reason: Some(reason.to_string()),
                    });
                } else if let Some(rest) = text.strip_prefix("unpack ") {
                    if rest != "ok" {
                        return Err(ClientError::Protocol(
                            strata_protocol::ProtocolError::Remote(format!(
                                "remote unpack failed: {rest}"
                            )),
                        ));
                    }
                }
            }
            _ => break,
        }
    }
    Ok(outcomes)
}

/// Concatenate side-band channel 1, or `None` when the stream is not
/// banded. Channel 3 raises.
fn unwrap_sideband(response: &[u8]) -> Result<Option<Vec<u8>>, ClientError> {
    let mut reader = PktReader::new(Cursor::new(response));
    let banded = match reader.read_pkt() {
        Ok(PktLine::Data(line)) => matches!(line.first().copied(), Some(1..=3)),
        _ => false,
    };
    if !banded {
        return Ok(None);
    }

    let mut report = Vec::new();
    let mut reader = PktReader::new(Cursor::new(response));
    loop {
        match reader.read_pkt() {
            Ok(PktLine::Data(line)) => match line.split_first() {
                Some((&1, payload)) => report.extend_from_slice(payload),
                Some((&2, _)) => continue,
                Some((&3, payload)) => {
                    return Err(ClientError::Protocol(
                        strata_protocol::ProtocolError::Remote(
                            String::from_utf8_lossy(payload).trim_end().to_string(),
                        ),
                    ))
                }
                _ => break,
            },
            _ => break,
        }
    }
    Ok(Some(report))
}

/// Push `updates` to the remote behind `transport`.
pub async fn push(
    store: &TieredStore,
    transport: &HttpTransport,
    updates: &[PushUpdate],
) -> Result<Vec<PushOutcome>, ClientError> {
    let advertisement = transport.info_refs("git-receive-pack").await?;
    let remote = parse_advertisement(&advertisement, "git-receive-pack")?;

    let zero = ObjectId::from_hex(ZERO_SHA_HEX)?;
    let mut commands = Vec::new();
    let mut new_tips = Vec::new();
    for update in updates {
        let old = remote.get(&update.ref_name).unwrap_or(zero);
        let new = update.new.unwrap_or(zero);
        if old == new {
            continue;
        }
        if let Some(new) = update.new {
            new_tips.push(new);
        }
        commands.push((old, new, update.ref_name.clone()));
    }
    if commands.is_empty() {
        return Ok(Vec::new());
    }

    // Objects the remote lacks: the closure of our new tips minus the
    // closure of every tip the remote advertised.
    let remote_tips: Vec<ObjectId> = remote.refs.iter().map(|(_, id)| *id).collect();
    let mut boundary = HashSet::new();
    for (id, _, _) in enumerate_closure(store, &remote_tips, &HashSet::new()).await? {
        boundary.insert(id);
    }
    let objects = enumerate_closure(store, &new_tips, &boundary).await?;

    let mut writer = strata_pack::PackWriter::new(objects.len() as u32);
    for (_, ty, data) in &objects {
        writer.add_object(*ty, data)?;
    }
    let (pack, _) = writer.finish()?;

    let body = build_push_body(&commands, &pack)?;
    let response = transport.service_request("git-receive-pack", body).await?;
    let outcomes = parse_report(&response)?;
    info!(
        commands = commands.len(),
        objects = objects.len(),
        accepted = outcomes.iter().filter(|o| o.accepted).count(),
        "push complete"
    );
    Ok(outcomes)
}
