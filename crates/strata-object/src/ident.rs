//! Identity lines: `Name <email> <unix-seconds> <tz>`.

use bstr::{BStr, BString, ByteSlice};

use crate::ObjectError;

/// An author/committer/tagger line.
///
/// The timezone is kept as the raw `+hhmm`/`-hhmm` token so that
/// re-serialization is byte-exact even for nonstandard offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub name: BString,
    pub email: BString,
    pub timestamp: i64,
    pub tz: BString,
}

impl Ident {
    pub fn new(name: impl Into<BString>, email: impl Into<BString>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            timestamp,
            tz: BString::from("+0000"),
        }
    }

    /// Parse an identity line.
    pub fn parse(input: &BStr) -> Result<Self, ObjectError> {
        let bytes = input.as_bytes();

        let gt = bytes
            .iter()
            .rposition(|&b| b == b'>')
            .ok_or_else(|| ObjectError::MalformedIdent("missing '>'".into()))?;
        let lt = bytes[..gt]
            .iter()
            .rposition(|&b| b == b'<')
            .ok_or_else(|| ObjectError::MalformedIdent("missing '<'".into()))?;

        let name = bytes[..lt].trim();
        let email = &bytes[lt + 1..gt];

        let tail = bytes[gt + 1..].trim();
        let mut parts = tail.split_str(b" ").filter(|p| !p.is_empty());
        let ts_part = parts
            .next()
            .ok_or_else(|| ObjectError::MalformedIdent("missing timestamp".into()))?;
        let tz_part = parts.next().unwrap_or(b"+0000");

        let timestamp = std::str::from_utf8(ts_part)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| {
                ObjectError::MalformedIdent(format!(
                    "bad timestamp {:?}",
                    ts_part.as_bstr()
                ))
            })?;

        Ok(Self {
            name: BString::from(name),
            email: BString::from(email),
            timestamp,
            tz: BString::from(tz_part),
        })
    }

    /// Render in git's canonical form.
    pub fn to_bytes(&self) -> BString {
        let mut out = BString::from(Vec::new());
        out.extend_from_slice(&self.name);
        out.extend_from_slice(b" <");
        out.extend_from_slice(&self.email);
        out.extend_from_slice(b"> ");
        out.extend_from_slice(self.timestamp.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(&self.tz);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_canonical() {
        let id = Ident::parse(BStr::new("Ada Lovelace <ada@example.com> 1700000000 +0100")).unwrap();
        assert_eq!(id.name, "Ada Lovelace");
        assert_eq!(id.email, "ada@example.com");
        assert_eq!(id.timestamp, 1_700_000_000);
        assert_eq!(id.tz, "+0100");
    }

    #[test]
    fn roundtrip() {
        let line = "Ada Lovelace <ada@example.com> 1700000000 -0530";
        let id = Ident::parse(BStr::new(line)).unwrap();
        assert_eq!(id.to_bytes(), line);
    }

    #[test]
    fn empty_name() {
        let id = Ident::parse(BStr::new("<bot@ci> 0 +0000")).unwrap();
        assert!(id.name.is_empty());
        assert_eq!(id.email, "bot@ci");
    }

    #[test]
    fn missing_tz_defaults_utc() {
        let id = Ident::parse(BStr::new("A <a@b> 42")).unwrap();
        assert_eq!(id.tz, "+0000");
    }

    #[test]
    fn negative_timestamp() {
        let id = Ident::parse(BStr::new("A <a@b> -100 +0000")).unwrap();
        assert_eq!(id.timestamp, -100);
    }

    #[test]
    fn rejects_garbage() {
        assert!(Ident::parse(BStr::new("no brackets here")).is_err());
        assert!(Ident::parse(BStr::new("A <a@b> notanumber +0000")).is_err());
    }
}
