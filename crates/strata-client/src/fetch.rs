//! Fetch: want/have negotiation, pack extraction, unpack into the store.

use std::io::Cursor;

use strata_hash::ObjectId;
use strata_odb::TieredStore;
use strata_protocol::pktline::{PktLine, PktReader, PktWriter};
use strata_protocol::receive_pack::unpack_objects;
use strata_transport::HttpTransport;
use tracing::{debug, info};

use crate::discovery::{parse_advertisement, RemoteRefs};
use crate::ClientError;

/// Capabilities this client asks for on the first want line.
const CLIENT_CAPS: &str = "multi_ack side-band-64k thin-pack ofs-delta agent=gitstrata/0.2";

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Restrict to these ref names; empty fetches every advertised ref.
    pub ref_names: Vec<String>,
    /// Shallow fetch depth (`deepen <n>`).
    pub depth: Option<u32>,
}

/// What a fetch did.
#[derive(Debug)]
pub struct FetchOutcome {
    pub remote: RemoteRefs,
    /// Refs that were fetched (wanted and not already present).
    pub fetched: Vec<(String, ObjectId)>,
    pub objects_fetched: usize,
}

/// Render the upload-pack request body.
pub fn build_fetch_body(
    wants: &[ObjectId],
    haves: &[ObjectId],
    depth: Option<u32>,
) -> Result<Vec<u8>, ClientError> {
    let mut body = Vec::new();
    let mut writer = PktWriter::new(&mut body);
    for (i, want) in wants.iter().enumerate() {
        if i == 0 {
            writer.write_text(&format!("want {want} {CLIENT_CAPS}"))?;
        } else {
            writer.write_text(&format!("want {want}"))?;
        }
    }
    if let Some(depth) = depth {
        writer.write_text(&format!("deepen {depth}"))?;
    }
    writer.write_flush()?;
    for have in haves {
        writer.write_text(&format!("have {have}"))?;
    }
    writer.write_text("done")?;
    Ok(body)
}

/// Pull the pack bytes out of an upload-pack response.
///
/// The prefix is NAK/ACK (and possibly shallow) pkt-lines; the pack then
/// arrives either raw or wrapped in side-band frames. Channel 2 is
/// progress, channel 3 raises.
pub fn extract_pack(response: &[u8]) -> Result<Vec<u8>, ClientError> {
    let mut pack = Vec::new();
    let mut cursor = Cursor::new(response);

    loop {
        let at = cursor.position() as usize;
        let rest = &response[at..];
        if rest.is_empty() {
            break;
        }
        if rest.starts_with(b"PACK") {
            pack.extend_from_slice(rest);
            break;
        }

        let mut reader = PktReader::new(&mut cursor);
        match reader.read_pkt().map_err(ClientError::Protocol)? {
            PktLine::Flush | PktLine::Delim => continue,
            PktLine::Data(line) => {
                if line.starts_with(b"NAK")
                    || line.starts_with(b"ACK")
                    || line.starts_with(b"shallow")
                    || line.starts_with(b"unshallow")
                {
                    continue;
                }
                match line.split_first() {
                    Some((&1, payload)) => pack.extend_from_slice(payload),
                    Some((&2, payload)) => {
                        debug!(progress = %String::from_utf8_lossy(payload).trim_end(), "remote");
                    }
                    Some((&3, payload)) => {
                        return Err(ClientError::Protocol(
                            strata_protocol::ProtocolError::Remote(
                                String::from_utf8_lossy(payload).trim_end().to_string(),
                            ),
                        ))
                    }
                    _ => {
                        return Err(ClientError::Protocol(
                            strata_protocol::ProtocolError::Protocol(format!(
                                "unexpected line in fetch response: {:?}",
                                String::from_utf8_lossy(&line)
                            )),
                        ))
                    }
                }
            }
        }
    }
    Ok(pack)
}

/// Fetch from a remote into the store. Local refs are left to the caller
/// (clone and mirror decide the namespace they update).
pub async fn fetch(
    store: &TieredStore,
    transport: &HttpTransport,
    opts: &FetchOptions,
) -> Result<FetchOutcome, ClientError> {
    let advertisement = transport.info_refs("git-upload-pack").await?;
    let remote = parse_advertisement(&advertisement, "git-upload-pack")?;

    let mut fetched = Vec::new();
    let mut wants = Vec::new();
    for (name, id) in &remote.refs {
        if !opts.ref_names.is_empty() && !opts.ref_names.contains(name) {
            continue;
        }
        fetched.push((name.clone(), *id));
        if !store.contains(id).await? {
            wants.push(*id);
        }
    }

    if wants.is_empty() {
        info!("fetch: already up to date");
        return Ok(FetchOutcome {
            remote,
            fetched,
            objects_fetched: 0,
        });
    }

    // Advertise our tips as haves so the server can trim the pack.
    let haves: Vec<ObjectId> = collect_local_tips(store).await?;
    let body = build_fetch_body(&wants, &haves, opts.depth)?;
    let response = transport
        .service_request("git-upload-pack", body)
        .await?;
    let pack = extract_pack(&response)?;
    let objects_fetched = unpack_objects(store, &pack).await?;
    store.flush().await?;

    info!(objects = objects_fetched, refs = fetched.len(), "fetch complete");
    Ok(FetchOutcome {
        remote,
        fetched,
        objects_fetched,
    })
}

/// Commit tips the store already holds, to send as haves. Drawn from the
/// location index rather than refs so detached objects still count.
async fn collect_local_tips(store: &TieredStore) -> Result<Vec<ObjectId>, ClientError> {
    let mut tips = Vec::new();
    for loc in store.index().all().await? {
        if loc.obj_type == Some(strata_object::ObjectType::Commit) {
            tips.push(loc.sha);
            if tips.len() >= 64 {
                break;
            }
        }
    }
    Ok(tips)
}
