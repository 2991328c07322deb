//! Ref advertisement for `GET /info/refs`.

use strata_hash::ObjectId;

use crate::capability::advertised;
use crate::pktline::PktWriter;
use crate::{ProtocolError, ZERO_SHA_HEX};

/// One advertised ref, with the peeled target for annotated tags.
#[derive(Debug, Clone)]
pub struct AdvertisedRef {
    pub name: String,
    pub id: ObjectId,
    /// The commit an annotated tag ultimately names; advertised as `^{}`.
    pub peeled: Option<ObjectId>,
}

/// Render the advertisement body for a smart service.
///
/// Layout: the service banner, a FLUSH, the first ref carrying the
/// capability list after a NUL, remaining refs (peeled lines following
/// their tag), and a closing FLUSH. An empty repository advertises the
/// zero id under `capabilities^{}` so clients still learn the caps.
pub fn advertisement(
    service: &str,
    refs: &[AdvertisedRef],
    object_format: &str,
) -> Result<Vec<u8>, ProtocolError> {
    let mut body = Vec::new();
    let mut writer = PktWriter::new(&mut body);
    writer.write_text(&format!("# service={service}"))?;
    writer.write_flush()?;

    let caps = advertised(object_format);
    match refs.first() {
        None => {
            writer.write_text(&format!("{ZERO_SHA_HEX} capabilities^{{}}\0{caps}"))?;
        }
        Some(first) => {
            writer.write_text(&format!("{} {}\0{caps}", first.id.to_hex(), first.name))?;
            if let Some(peeled) = &first.peeled {
                writer.write_text(&format!("{} {}^{{}}", peeled.to_hex(), first.name))?;
            }
            for r in &refs[1..] {
                writer.write_text(&format!("{} {}", r.id.to_hex(), r.name))?;
                if let Some(peeled) = &r.peeled {
                    writer.write_text(&format!("{} {}^{{}}", peeled.to_hex(), r.name))?;
                }
            }
        }
    }
    writer.write_flush()?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> ObjectId {
        let mut d = [0u8; 20];
        d[19] = n;
        ObjectId::Sha1(d)
    }

    #[test]
    fn banner_and_flush_prefix() {
        let body = advertisement("git-upload-pack", &[], "sha1").unwrap();
        // "# service=git-upload-pack\n" is 26 bytes + 4 = 0x1e.
        assert!(body.starts_with(b"001e# service=git-upload-pack\n0000"));
    }

    #[test]
    fn empty_repo_advertises_capabilities_ref() {
        let body = advertisement("git-receive-pack", &[], "sha1").unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains(&format!("{ZERO_SHA_HEX} capabilities^{{}}")));
        assert!(text.contains("report-status"));
        assert!(body.ends_with(b"0000"));
    }

    #[test]
    fn caps_only_on_first_ref() {
        let refs = vec![
            AdvertisedRef {
                name: "refs/heads/main".into(),
                id: id(1),
                peeled: None,
            },
            AdvertisedRef {
                name: "refs/tags/v1".into(),
                id: id(2),
                peeled: Some(id(3)),
            },
        ];
        let body = advertisement("git-upload-pack", &refs, "sha1").unwrap();
        let text = String::from_utf8_lossy(&body);
        let nul_count = body.iter().filter(|&&b| b == 0).count();
        assert_eq!(nul_count, 1);
        assert!(text.contains("refs/heads/main\0"));
        assert!(text.contains(&format!("{} refs/tags/v1\n", id(2).to_hex())));
        assert!(text.contains(&format!("{} refs/tags/v1^{{}}\n", id(3).to_hex())));
    }

    #[test]
    fn object_format_is_advertised() {
        let body = advertisement("git-upload-pack", &[], "sha256").unwrap();
        assert!(String::from_utf8_lossy(&body).contains("object-format=sha256"));
    }
}
