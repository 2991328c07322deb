use bstr::{BStr, BString, ByteSlice};
use strata_hash::ObjectId;

use crate::ident::Ident;
use crate::{ObjectError, ObjectType};

/// An annotated tag object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// The tagged object.
    pub target: ObjectId,
    /// Type of the tagged object (tags can point at tags).
    pub target_type: ObjectType,
    pub name: BString,
    pub tagger: Option<Ident>,
    pub message: BString,
    /// Armored PGP block appended after the message, when present.
    pub signature: Option<BString>,
}

impl Tag {
    /// Parse a tag body (no frame header).
    pub fn parse(body: &[u8]) -> Result<Self, ObjectError> {
        let mut target = None;
        let mut target_type = None;
        let mut name = None;
        let mut tagger = None;

        let mut pos = 0;
        while pos < body.len() {
            if body[pos] == b'\n' {
                pos += 1;
                break;
            }
            let line_end = body[pos..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|p| p + pos)
                .unwrap_or(body.len());
            let line = &body[pos..line_end];

            if let Some(space) = line.iter().position(|&b| b == b' ') {
                let (key, value) = (&line[..space], &line[space + 1..]);
                match key {
                    b"object" => {
                        let hex = std::str::from_utf8(value).map_err(|_| {
                            ObjectError::MalformedHeader("non-UTF8 target id".into())
                        })?;
                        target = Some(ObjectId::from_hex(hex)?);
                    }
                    b"type" => target_type = Some(ObjectType::from_bytes(value)?),
                    b"tag" => name = Some(BString::from(value)),
                    b"tagger" => tagger = Some(Ident::parse(BStr::new(value))?),
                    _ => {}
                }
            }
            pos = line_end + 1;
        }

        let rest = &body[pos.min(body.len())..];
        let (message, signature) = match rest.find(b"-----BEGIN PGP SIGNATURE-----") {
            Some(at) => (
                BString::from(&rest[..at]),
                Some(BString::from(&rest[at..])),
            ),
            None => (BString::from(rest), None),
        };

        Ok(Self {
            target: target.ok_or(ObjectError::MissingTagHeader("object"))?,
            target_type: target_type.ok_or(ObjectError::MissingTagHeader("type"))?,
            name: name.ok_or(ObjectError::MissingTagHeader("tag"))?,
            tagger,
            message,
            signature,
        })
    }

    /// Serialize a tag body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"object ");
        out.extend_from_slice(self.target.to_hex().as_bytes());
        out.push(b'\n');
        out.extend_from_slice(b"type ");
        out.extend_from_slice(self.target_type.as_str().as_bytes());
        out.push(b'\n');
        out.extend_from_slice(b"tag ");
        out.extend_from_slice(&self.name);
        out.push(b'\n');
        if let Some(tagger) = &self.tagger {
            out.extend_from_slice(b"tagger ");
            out.extend_from_slice(&tagger.to_bytes());
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        if let Some(sig) = &self.signature {
            out.extend_from_slice(sig);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: &str = "ce013625030ba8dba906f756967f9e9ca394464a";

    fn sample() -> Tag {
        Tag {
            target: ObjectId::from_hex(TARGET).unwrap(),
            target_type: ObjectType::Commit,
            name: BString::from("v1.0.0"),
            tagger: Some(Ident::new("Rel Bot", "rel@example.com", 1_700_000_000)),
            message: BString::from("release 1.0.0\n"),
            signature: None,
        }
    }

    #[test]
    fn roundtrip() {
        let tag = sample();
        assert_eq!(Tag::parse(&tag.to_bytes()).unwrap(), tag);
    }

    #[test]
    fn signature_split_from_message() {
        let mut tag = sample();
        tag.signature = Some(BString::from(
            "-----BEGIN PGP SIGNATURE-----\nxyz\n-----END PGP SIGNATURE-----\n",
        ));
        let parsed = Tag::parse(&tag.to_bytes()).unwrap();
        assert_eq!(parsed.message, "release 1.0.0\n");
        assert_eq!(parsed.signature, tag.signature);
    }

    #[test]
    fn tag_of_tag_allowed() {
        let mut tag = sample();
        tag.target_type = ObjectType::Tag;
        let parsed = Tag::parse(&tag.to_bytes()).unwrap();
        assert_eq!(parsed.target_type, ObjectType::Tag);
    }

    #[test]
    fn tagger_optional() {
        let mut tag = sample();
        tag.tagger = None;
        let parsed = Tag::parse(&tag.to_bytes()).unwrap();
        assert!(parsed.tagger.is_none());
    }

    #[test]
    fn missing_headers_rejected() {
        assert!(matches!(
            Tag::parse(b"type commit\ntag v1\n\nmsg").unwrap_err(),
            ObjectError::MissingTagHeader("object")
        ));
        let body = format!("object {TARGET}\ntag v1\n\nmsg");
        assert!(matches!(
            Tag::parse(body.as_bytes()).unwrap_err(),
            ObjectError::MissingTagHeader("type")
        ));
    }
}
