//! Capability advertisement, parsing, and validation.

use crate::ProtocolError;

/// Version string advertised in the `agent` capability.
pub const AGENT: &str = "gitstrata/0.2";

/// Boolean capabilities this server supports.
pub const SERVER_CAPS: &[&str] = &[
    "multi_ack",
    "multi_ack_detailed",
    "thin-pack",
    "side-band",
    "side-band-64k",
    "ofs-delta",
    "shallow",
    "deepen-since",
    "deepen-not",
    "deepen-relative",
    "no-progress",
    "include-tag",
    "report-status",
    "report-status-v2",
    "delete-refs",
    "quiet",
    "atomic",
    "push-options",
    "allow-tip-sha1-in-want",
    "allow-reachable-sha1-in-want",
    "filter",
];

/// The full advertisement string: boolean caps plus agent and object-format.
pub fn advertised(object_format: &str) -> String {
    let mut caps = SERVER_CAPS.join(" ");
    caps.push_str(&format!(" agent={AGENT} object-format={object_format}"));
    caps
}

/// A parsed capability list (from a first ref line or a request).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    entries: Vec<(String, Option<String>)>,
}

impl Capabilities {
    /// Parse a space-separated capability string.
    pub fn parse(raw: &str) -> Self {
        let entries = raw
            .split_whitespace()
            .map(|token| match token.split_once('=') {
                Some((name, value)) => (name.to_string(), Some(value.to_string())),
                None => (token.to_string(), None),
            })
            .collect();
        Self { entries }
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// All values of a repeatable capability (`symref` appears per ref).
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n == name)
            .filter_map(|(_, v)| v.as_deref())
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only capabilities this server understands.
    pub fn intersect_server(&self) -> Capabilities {
        let entries = self
            .entries
            .iter()
            .filter(|(n, _)| {
                SERVER_CAPS.contains(&n.as_str()) || n == "agent" || n == "object-format"
            })
            .cloned()
            .collect();
        Capabilities { entries }
    }
}

/// Validate one capability token: printable `[A-Za-z0-9_-]` name, optional
/// value with no control bytes. Returns whether the name is known.
pub fn validate_capability(token: &str, strict: bool) -> Result<bool, ProtocolError> {
    let (name, value) = match token.split_once('=') {
        Some((n, v)) => (n, Some(v)),
        None => (token, None),
    };
    if name.is_empty()
        || !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(ProtocolError::InvalidCapability(format!(
            "bad capability name {name:?}"
        )));
    }
    if let Some(value) = value {
        if value.bytes().any(|b| b < 0x20 || b == 0x7f) {
            return Err(ProtocolError::InvalidCapability(format!(
                "control bytes in value of {name}"
            )));
        }
    }
    let known = SERVER_CAPS.contains(&name)
        || matches!(name, "agent" | "object-format" | "symref" | "no-done");
    if !known && strict {
        return Err(ProtocolError::InvalidCapability(format!(
            "unknown capability {name:?}"
        )));
    }
    Ok(known)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_query() {
        let caps = Capabilities::parse(
            "multi_ack thin-pack side-band-64k agent=git/2.39.0 symref=HEAD:refs/heads/main",
        );
        assert!(caps.has("multi_ack"));
        assert!(!caps.has("atomic"));
        assert_eq!(caps.get("agent"), Some("git/2.39.0"));
        assert_eq!(caps.get_all("symref"), vec!["HEAD:refs/heads/main"]);
        assert_eq!(caps.len(), 5);
    }

    #[test]
    fn advertised_includes_format_and_agent() {
        let adv = advertised("sha1");
        assert!(adv.contains("side-band-64k"));
        assert!(adv.contains("object-format=sha1"));
        assert!(adv.contains("agent=gitstrata/"));
        assert!(adv.contains("report-status-v2"));
    }

    #[test]
    fn intersect_drops_unknown() {
        let caps = Capabilities::parse("thin-pack bogus-cap agent=x");
        let kept = caps.intersect_server();
        assert!(kept.has("thin-pack"));
        assert!(kept.has("agent"));
        assert!(!kept.has("bogus-cap"));
    }

    #[test]
    fn validation_charset() {
        assert!(validate_capability("side-band-64k", true).unwrap());
        assert!(validate_capability("agent=git/2.39", true).unwrap());
        assert!(!validate_capability("not-a-real-cap", false).unwrap());
        assert!(validate_capability("not-a-real-cap", true).is_err());
        assert!(validate_capability("bad name", false).is_err());
        assert!(validate_capability("bad\x01", false).is_err());
        assert!(validate_capability("agent=\x07bell", false).is_err());
        assert!(validate_capability("", false).is_err());
    }
}
