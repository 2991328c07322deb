//! Glob pathspec filtering.
//!
//! `*` matches within one path component, `**` spans components, `?`
//! matches one non-slash character. Patterns prefixed with `!` exclude;
//! an exclusion always wins over an inclusion. With no include patterns,
//! every path not excluded is included.

use crate::DiffError;

/// A compiled set of include/exclude patterns.
#[derive(Debug, Clone, Default)]
pub struct Pathspec {
    includes: Vec<String>,
    excludes: Vec<String>,
}

impl Pathspec {
    /// Compile patterns; `!`-prefixed ones exclude.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, DiffError> {
        let mut spec = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            if pattern.is_empty() || pattern == "!" {
                return Err(DiffError::BadPattern(
                    pattern.to_string(),
                    "empty pattern".into(),
                ));
            }
            match pattern.strip_prefix('!') {
                Some(rest) => spec.excludes.push(rest.to_string()),
                None => spec.includes.push(pattern.to_string()),
            }
        }
        Ok(spec)
    }

    /// Whether `path` passes the filter.
    pub fn matches(&self, path: &str) -> bool {
        if self.excludes.iter().any(|p| glob_match(p, path)) {
            return false;
        }
        if self.includes.is_empty() {
            return true;
        }
        self.includes.iter().any(|p| glob_match(p, path))
    }
}

/// Match `pattern` against the whole of `path`.
fn glob_match(pattern: &str, path: &str) -> bool {
    match_from(pattern.as_bytes(), path.as_bytes())
}

fn match_from(pattern: &[u8], path: &[u8]) -> bool {
    match pattern.first() {
        None => path.is_empty(),
        Some(&b'*') => {
            if pattern.get(1) == Some(&b'*') {
                // `**` crosses slashes. Also swallow a following slash so
                // "a/**/b" matches "a/b".
                let rest = if pattern.get(2) == Some(&b'/') {
                    &pattern[3..]
                } else {
                    &pattern[2..]
                };
                (0..=path.len()).any(|skip| match_from(rest, &path[skip..]))
                    || (pattern.get(2) == Some(&b'/') && match_from(&pattern[2..], path))
            } else {
                // `*` stays within a component.
                let rest = &pattern[1..];
                for skip in 0..=path.len() {
                    if match_from(rest, &path[skip..]) {
                        return true;
                    }
                    if skip < path.len() && path[skip] == b'/' {
                        break;
                    }
                }
                false
            }
        }
        Some(&b'?') => match path.first() {
            Some(&c) if c != b'/' => match_from(&pattern[1..], &path[1..]),
            _ => false,
        },
        Some(&c) => match path.first() {
            Some(&p) if p == c => match_from(&pattern[1..], &path[1..]),
            _ => false,
        },
    }
}
