//! Validation of user-supplied ref name components.
//!
//! These rules gate what callers may name a branch, tag, or remote ref.
//! Internal full names (`refs/heads/…`, `HEAD`) are composed from already
//! validated components and never pass through here.

use crate::RefError;

const FORBIDDEN: &[u8] = b" ~^:\\?*[";

/// Validate a user-supplied name (branch, tag, or remote-ref component).
pub fn validate_name(name: &str) -> Result<(), RefError> {
    let fail = |reason: &str| {
        Err(RefError::InvalidRefName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() {
        return fail("empty name");
    }
    if name.len() > 255 {
        return fail("longer than 255 bytes");
    }
    if !name.is_ascii() {
        return fail("contains non-ASCII bytes");
    }
    for &b in name.as_bytes() {
        if b < 0x20 || b == 0x7f {
            return fail("contains a control character");
        }
        if FORBIDDEN.contains(&b) {
            return fail("contains a forbidden character");
        }
    }
    if name.starts_with('-') {
        return fail("starts with '-'");
    }
    if name.ends_with('/') {
        return fail("ends with '/'");
    }
    if name.ends_with('.') {
        return fail("ends with '.'");
    }
    if name.ends_with(".lock") {
        return fail("ends with '.lock'");
    }
    if name.contains("..") {
        return fail("contains '..'");
    }
    if name.contains("//") {
        return fail("contains '//'");
    }
    if name.contains("@{") {
        return fail("contains '@{'");
    }
    if name == "HEAD" {
        return fail("'HEAD' is reserved");
    }
    if name.starts_with("refs/") {
        return fail("user names must not carry the 'refs/' prefix");
    }
    Ok(())
}

/// The short name of a full ref (`main` for `refs/heads/main`).
pub fn short_name(full: &str) -> &str {
    full.strip_prefix("refs/heads/")
        .or_else(|| full.strip_prefix("refs/tags/"))
        .or_else(|| full.strip_prefix("refs/remotes/"))
        .unwrap_or(full)
}
