//! The receive-pack (push) engine.
//!
//! Parses ref commands and the trailing pack, unpacks objects through the
//! tiered store, applies the ref updates with CAS (all-or-nothing when the
//! client asked for `atomic`), and renders the report-status response.

use std::collections::HashMap;
use std::io::Cursor;

use strata_hash::ObjectId;
use strata_object::ObjectType;
use strata_odb::TieredStore;
use strata_pack::{resolve, PackReader};
use strata_ref::{RefKind, RefStore};
use tracing::{info, warn};

use crate::capability::Capabilities;
use crate::negotiation::{parse_wire_sha, NegotiationContext};
use crate::pktline::{PktLine, PktReader, PktWriter};
use crate::sideband::{write_band, Band};
use crate::ProtocolError;

/// One ref command from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefCommand {
    pub old: ObjectId,
    pub new: ObjectId,
    pub name: String,
}

impl RefCommand {
    pub fn is_create(&self) -> bool {
        self.old.is_zero() && !self.new.is_zero()
    }

    pub fn is_delete(&self) -> bool {
        self.new.is_zero()
    }
}

/// A parsed receive-pack request.
#[derive(Debug)]
pub struct ReceivePackRequest {
    pub commands: Vec<RefCommand>,
    pub capabilities: Capabilities,
    pub pack: Vec<u8>,
}

/// Parse command lines, capabilities, and the pack bytes that follow.
pub fn parse_request(
    body: &[u8],
    ctx: &mut NegotiationContext,
) -> Result<ReceivePackRequest, ProtocolError> {
    let mut reader = PktReader::new(Cursor::new(body));
    let mut commands = Vec::new();
    let mut capabilities = Capabilities::default();

    ctx.validate_round()?;
    loop {
        match reader.read_pkt()? {
            PktLine::Flush => break,
            PktLine::Delim => continue,
            PktLine::Data(line) => {
                ctx.validate_line_length(&line)?;
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end_matches('\n');

                // Capabilities ride the first command after a NUL.
                let (command_part, caps_part) = match text.split_once('\0') {
                    Some((cmd, caps)) => (cmd, Some(caps)),
                    None => (text, None),
                };
                if let Some(caps) = caps_part {
                    for token in caps.split_whitespace() {
                        ctx.record_capability(token)?;
                    }
                    capabilities = Capabilities::parse(caps).intersect_server();
                }

                let mut parts = command_part.splitn(3, ' ');
                let (old, new, name) = match (parts.next(), parts.next(), parts.next()) {
                    (Some(old), Some(new), Some(name)) if !name.is_empty() => (old, new, name),
                    _ => {
                        return Err(ProtocolError::Protocol(format!(
                            "malformed ref command {command_part:?}"
                        )))
                    }
                };
                commands.push(RefCommand {
                    old: parse_wire_sha(old)?,
                    new: parse_wire_sha(new)?,
                    name: name.to_string(),
                });
            }
        }
    }

    // Everything after the flush is the pack (may be absent for deletes).
    let position = reader.into_inner().position() as usize;
    let pack = body[position..].to_vec();

    Ok(ReceivePackRequest {
        commands,
        capabilities,
        pack,
    })
}

/// Unpack the request's pack into the store. Thin packs are completed
/// against objects the store already holds; completed objects are written
/// back so the repository is self-contained.
pub async fn unpack_objects(
    store: &TieredStore,
    pack: &[u8],
) -> Result<usize, ProtocolError> {
    if pack.is_empty() {
        return Ok(0);
    }
    let reader = PackReader::new(pack)?;
    let entries = reader.entries()?;

    let mut known: HashMap<ObjectId, (ObjectType, Vec<u8>)> = HashMap::new();
    loop {
        let resolution = resolve(&entries, &known)?;
        if resolution.is_complete() {
            let count = resolution.objects.len();
            for object in resolution.objects {
                store.put(object.obj_type, &object.data).await?;
            }
            return Ok(count);
        }
        let mut progressed = false;
        for base_id in &resolution.missing_bases {
            if known.contains_key(base_id) {
                continue;
            }
            match store.get(base_id).await? {
                Some((obj_type, content)) => {
                    known.insert(*base_id, (obj_type, content));
                    progressed = true;
                }
                None => {
                    return Err(ProtocolError::Pack(
                        strata_pack::PackError::ThinPackMissingBase(*base_id),
                    ))
                }
            }
        }
        if !progressed {
            let missing = resolution.missing_bases[0];
            return Err(ProtocolError::Pack(
                strata_pack::PackError::ThinPackMissingBase(missing),
            ));
        }
    }
}

/// Per-ref application outcome, for the report.
#[derive(Debug)]
enum CommandOutcome {
    Ok,
    Failed(String),
}

/// Apply parsed commands and render the report-status body.
pub async fn respond(
    store: &TieredStore,
    refs: &RefStore,
    request: &ReceivePackRequest,
) -> Result<Vec<u8>, ProtocolError> {
    let atomic = request.capabilities.has("atomic");

    let unpack_result = unpack_objects(store, &request.pack).await;
    let unpack_line = match &unpack_result {
        Ok(count) => {
            info!(objects = count, commands = request.commands.len(), "receive-pack unpacked");
            "unpack ok".to_string()
        }
        Err(e) => format!("unpack {e}"),
    };

    let mut outcomes: Vec<(String, CommandOutcome)> = Vec::new();
    if unpack_result.is_ok() {
        // Track prior states for atomic rollback.
        let mut applied: Vec<(RefCommand, Option<strata_ref::Reference>)> = Vec::new();
        let mut failed = false;

        for command in &request.commands {
            if failed && atomic {
                outcomes.push((
                    command.name.clone(),
                    CommandOutcome::Failed("atomic push aborted".into()),
                ));
                continue;
            }
            let prior = refs.read(&command.name).await?;
            let result = apply_command(store, refs, command).await;
            match result {
                Ok(()) => {
                    applied.push((command.clone(), prior));
                    outcomes.push((command.name.clone(), CommandOutcome::Ok));
                }
                Err(reason) => {
                    failed = true;
                    outcomes.push((command.name.clone(), CommandOutcome::Failed(reason)));
                }
            }
        }

        if failed && atomic {
            rollback(refs, applied).await;
            for outcome in outcomes.iter_mut() {
                if matches!(outcome.1, CommandOutcome::Ok) {
                    outcome.1 = CommandOutcome::Failed("atomic push aborted".into());
                }
            }
        }
    } else {
        for command in &request.commands {
            outcomes.push((
                command.name.clone(),
                CommandOutcome::Failed("unpack failed".into()),
            ));
        }
    }

    render_report(&unpack_line, &outcomes, &request.capabilities)
}

async fn apply_command(
    store: &TieredStore,
    refs: &RefStore,
    command: &RefCommand,
) -> Result<(), String> {
    if command.is_delete() {
        return match refs.delete_ref(&command.name, Some(&command.old)).await {
            Ok(true) => Ok(()),
            Ok(false) => Err("no such ref".into()),
            Err(e) => Err(e.to_string()),
        };
    }

    // Never advance a ref to an object the store does not hold durably.
    match store.contains(&command.new).await {
        Ok(true) => {}
        Ok(false) => return Err(format!("missing object {}", command.new)),
        Err(e) => return Err(e.to_string()),
    }

    refs.set_ref(&command.name, &command.new, Some(&command.old))
        .await
        .map_err(|e| match e {
            strata_ref::RefError::RefLockConflict { .. } => "non-fast-forward".to_string(),
            other => other.to_string(),
        })
}

/// Undo applied ref updates in reverse order. Object writes stay; anything
/// unreferenced ages out through the garbage collector.
async fn rollback(refs: &RefStore, applied: Vec<(RefCommand, Option<strata_ref::Reference>)>) {
    for (command, prior) in applied.into_iter().rev() {
        let result = match prior {
            None => refs.delete_ref(&command.name, None).await.map(|_| ()),
            Some(reference) => match reference.kind {
                RefKind::Direct => match reference.direct_target() {
                    Some(target) => refs.set_ref(&command.name, &target, None).await,
                    None => Ok(()),
                },
                RefKind::Symbolic => refs.set_symbolic(&command.name, &reference.target).await,
            },
        };
        if let Err(e) = result {
            warn!(name = command.name, error = %e, "rollback of ref failed");
        }
    }
}

fn render_report(
    unpack_line: &str,
    outcomes: &[(String, CommandOutcome)],
    capabilities: &Capabilities,
) -> Result<Vec<u8>, ProtocolError> {
    let mut report = Vec::new();
    {
        let mut writer = PktWriter::new(&mut report);
        writer.write_text(unpack_line)?;
        for (name, outcome) in outcomes {
            match outcome {
                CommandOutcome::Ok => writer.write_text(&format!("ok {name}"))?,
                CommandOutcome::Failed(reason) => {
                    writer.write_text(&format!("ng {name} {reason}"))?
                }
            }
        }
        writer.write_flush()?;
    }

    if capabilities.has("side-band-64k") || capabilities.has("side-band") {
        let mut body = Vec::new();
        let mut writer = PktWriter::new(&mut body);
        write_band(&mut writer, Band::Data, &report)?;
        writer.write_flush()?;
        Ok(body)
    } else {
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::NegotiationLimits;
    use crate::ZERO_SHA_HEX;

    const SHA_A: &str = "ce013625030ba8dba906f756967f9e9ca394464a";

    fn command_body(lines: &[String], pack: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        {
            let mut writer = PktWriter::new(&mut body);
            for line in lines {
                writer.write_text(line).unwrap();
            }
            writer.write_flush().unwrap();
        }
        body.extend_from_slice(pack);
        body
    }

    #[test]
    fn parse_create_update_delete() {
        let lines = vec![
            format!("{ZERO_SHA_HEX} {SHA_A} refs/heads/new\0report-status atomic"),
            format!("{SHA_A} {SHA_A} refs/heads/update"),
            format!("{SHA_A} {ZERO_SHA_HEX} refs/heads/dead"),
        ];
        let body = command_body(&lines, b"");
        let mut ctx = NegotiationContext::new(NegotiationLimits::default());
        let request = parse_request(&body, &mut ctx).unwrap();

        assert_eq!(request.commands.len(), 3);
        assert!(request.commands[0].is_create());
        assert!(!request.commands[1].is_create());
        assert!(!request.commands[1].is_delete());
        assert!(request.commands[2].is_delete());
        assert!(request.capabilities.has("atomic"));
        assert!(request.pack.is_empty());
    }

    #[test]
    fn pack_bytes_follow_flush() {
        let lines = vec![format!("{ZERO_SHA_HEX} {SHA_A} refs/heads/x")];
        let body = command_body(&lines, b"PACKDATA");
        let mut ctx = NegotiationContext::new(NegotiationLimits::default());
        let request = parse_request(&body, &mut ctx).unwrap();
        assert_eq!(request.pack, b"PACKDATA");
    }

    #[test]
    fn malformed_command_rejected() {
        let lines = vec!["just one token".to_string()];
        let body = command_body(&lines, b"");
        let mut ctx = NegotiationContext::new(NegotiationLimits::default());
        assert!(parse_request(&body, &mut ctx).is_err());
    }
}
