//! The upload-pack (fetch) engine.
//!
//! Parses a `git-upload-pack` request body, negotiates haves, enumerates
//! the object closure the client lacks, and renders the response: ACK/NAK
//! then the pack, side-band wrapped when negotiated.

use std::collections::HashSet;
use std::io::Cursor;

use strata_hash::ObjectId;
use strata_object::Object;
use strata_odb::TieredStore;
use strata_pack::PackWriter;
use tracing::{debug, info};

use crate::capability::Capabilities;
use crate::negotiation::NegotiationContext;
use crate::pktline::{PktReader, PktWriter};
use crate::sideband::{write_band, Band};
use crate::ProtocolError;

/// A parsed upload-pack request.
#[derive(Debug, Default)]
pub struct UploadPackRequest {
    pub wants: Vec<ObjectId>,
    pub haves: Vec<ObjectId>,
    pub capabilities: Capabilities,
    pub done: bool,
    pub deepen: Option<u32>,
}

/// Parse the request body, enforcing the context's limits on every line.
pub fn parse_request(
    body: &[u8],
    ctx: &mut NegotiationContext,
) -> Result<UploadPackRequest, ProtocolError> {
    let mut reader = PktReader::new(Cursor::new(body));
    let mut request = UploadPackRequest::default();

    ctx.validate_round()?;

    // Section 1: wants (capabilities ride the first want), shallow/deepen.
    for line in reader.read_section()? {
        ctx.validate_line_length(&line)?;
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches('\n');

        if let Some(rest) = text.strip_prefix("want ") {
            let (sha, caps) = match rest.split_once(' ') {
                Some((sha, caps)) => (sha, Some(caps)),
                None => (rest, None),
            };
            request.wants.push(ctx.record_want(sha)?);
            if let Some(caps) = caps {
                for token in caps.split_whitespace() {
                    ctx.record_capability(token)?;
                }
                request.capabilities = Capabilities::parse(caps).intersect_server();
            }
        } else if let Some(depth) = text.strip_prefix("deepen ") {
            request.deepen = depth.parse().ok();
        } else if text.starts_with("shallow ")
            || text.starts_with("deepen-since ")
            || text.starts_with("deepen-not ")
            || text.starts_with("filter ")
        {
            // Recognized but not constraining here.
        } else if !text.is_empty() {
            return Err(ProtocolError::Protocol(format!(
                "unexpected upload-pack line {text:?}"
            )));
        }
    }

    // Section 2: haves, then done.
    loop {
        match reader.read_pkt() {
            Ok(crate::pktline::PktLine::Data(line)) => {
                ctx.validate_line_length(&line)?;
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end_matches('\n');
                if let Some(sha) = text.strip_prefix("have ") {
                    request.haves.push(ctx.record_have(sha)?);
                } else if text == "done" {
                    request.done = true;
                    break;
                }
            }
            Ok(_) => continue, // flush between have batches
            Err(ProtocolError::Truncated(_)) => break,
            Err(e) => return Err(e),
        }
    }

    debug!(
        wants = request.wants.len(),
        haves = request.haves.len(),
        done = request.done,
        "parsed upload-pack request"
    );
    Ok(request)
}

/// Objects reachable from `tips`, stopping at anything in `boundary`.
pub async fn enumerate_closure(
    store: &TieredStore,
    tips: &[ObjectId],
    boundary: &HashSet<ObjectId>,
) -> Result<Vec<(ObjectId, strata_object::ObjectType, Vec<u8>)>, ProtocolError> {
    let mut visited: HashSet<ObjectId> = HashSet::new();
    let mut out = Vec::new();
    let mut queue: Vec<ObjectId> = tips.to_vec();

    while let Some(id) = queue.pop() {
        if boundary.contains(&id) || !visited.insert(id) {
            continue;
        }
        let Some((obj_type, content)) = store.get(&id).await? else {
            continue;
        };
        match Object::parse_body(obj_type, &content)? {
            Object::Commit(commit) => {
                queue.push(commit.tree);
                queue.extend(commit.parents);
            }
            Object::Tree(tree) => queue.extend(tree.entries.iter().map(|e| e.id)),
            Object::Tag(tag) => queue.push(tag.target),
            Object::Blob(_) => {}
        }
        out.push((id, obj_type, content));
    }
    Ok(out)
}

/// The closure of everything reachable from `tips` (used as a boundary).
async fn reachable_set(
    store: &TieredStore,
    tips: &[ObjectId],
) -> Result<HashSet<ObjectId>, ProtocolError> {
    let objects = enumerate_closure(store, tips, &HashSet::new()).await?;
    Ok(objects.into_iter().map(|(id, _, _)| id).collect())
}

/// Run upload-pack over a parsed request and render the response body.
pub async fn respond(
    store: &TieredStore,
    request: &UploadPackRequest,
) -> Result<Vec<u8>, ProtocolError> {
    // Common base: haves the server actually holds, expanded to their closure.
    let mut common: Vec<ObjectId> = Vec::new();
    for have in &request.haves {
        if store.contains(have).await? {
            common.push(*have);
        }
    }
    let boundary = reachable_set(store, &common).await?;
    let objects = enumerate_closure(store, &request.wants, &boundary).await?;

    let mut writer = PackWriter::new(objects.len() as u32);
    for (_, obj_type, content) in &objects {
        writer.add_object(*obj_type, content)?;
    }
    let (pack, _) = writer.finish()?;
    info!(
        objects = objects.len(),
        pack_bytes = pack.len(),
        common = common.len(),
        "upload-pack produced pack"
    );

    let mut body = Vec::new();
    let mut pkt = PktWriter::new(&mut body);
    match common.last() {
        Some(last) => pkt.write_text(&format!("ACK {last}"))?,
        None => pkt.write_text("NAK")?,
    }

    let use_sideband = request.capabilities.has("side-band-64k")
        || request.capabilities.has("side-band");
    if use_sideband {
        if !request.capabilities.has("no-progress") {
            write_band(
                &mut pkt,
                Band::Progress,
                format!("Enumerated {} objects\n", objects.len()).as_bytes(),
            )?;
        }
        write_band(&mut pkt, Band::Data, &pack)?;
        pkt.write_flush()?;
    } else {
        // Raw pack follows the NAK/ACK line directly.
        body.extend_from_slice(&pack);
    }
    Ok(body)
}
