//! Authentication: header parsing, providers, constant-time comparison.

use async_trait::async_trait;
use base64::Engine;

/// Parsed client credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { username: String, password: String },
    Bearer { token: String },
    Anonymous,
}

/// Parse an `Authorization` header. Anything unparseable is anonymous.
pub fn parse_authorization(header: Option<&str>) -> Credentials {
    let Some(header) = header else {
        return Credentials::Anonymous;
    };
    if let Some(encoded) = header.strip_prefix("Basic ") {
        let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
            return Credentials::Anonymous;
        };
        let Ok(text) = String::from_utf8(decoded) else {
            return Credentials::Anonymous;
        };
        // Split at the first colon; passwords may contain more of them.
        let (username, password) = match text.split_once(':') {
            Some((u, p)) => (u.to_string(), p.to_string()),
            None => (text, String::new()),
        };
        return Credentials::Basic { username, password };
    }
    if let Some(token) = header.strip_prefix("Bearer ") {
        return Credentials::Bearer {
            token: token.trim().to_string(),
        };
    }
    Credentials::Anonymous
}

/// Constant-time byte comparison: XOR-accumulate over the full length of
/// both inputs so timing does not leak the first differing position.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut acc = (a.len() ^ b.len()) as u8;
    let longest = a.len().max(b.len());
    for i in 0..longest {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        acc |= x ^ y;
    }
    acc == 0
}

/// Request context handed to the provider.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub repo: String,
    pub service: String,
    pub path: String,
    pub method: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Provider verdict.
#[derive(Debug, Clone, Default)]
pub struct AuthResult {
    pub valid: bool,
    pub reason: Option<String>,
    pub user: Option<String>,
    pub scopes: Vec<String>,
}

impl AuthResult {
    pub fn allow(user: Option<&str>) -> Self {
        Self {
            valid: true,
            user: user.map(String::from),
            ..Self::default()
        }
    }

    pub fn deny(reason: &str) -> Self {
        Self {
            valid: false,
            reason: Some(reason.to_string()),
            ..Self::default()
        }
    }
}

/// The pluggable authentication backend.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn validate(&self, credentials: &Credentials, context: &AuthContext) -> AuthResult;
}

/// Accepts everyone, including anonymous. For open repositories and tests.
pub struct AllowAll;

#[async_trait]
impl AuthProvider for AllowAll {
    async fn validate(&self, credentials: &Credentials, _context: &AuthContext) -> AuthResult {
        let user = match credentials {
            Credentials::Basic { username, .. } => Some(username.as_str()),
            _ => None,
        };
        AuthResult::allow(user)
    }
}

/// A single shared bearer token, compared in constant time.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn validate(&self, credentials: &Credentials, _context: &AuthContext) -> AuthResult {
        match credentials {
            Credentials::Bearer { token } if constant_time_eq(token.as_bytes(), self.token.as_bytes()) => {
                AuthResult::allow(None)
            }
            Credentials::Bearer { .. } => AuthResult::deny("invalid token"),
            _ => AuthResult::deny("bearer token required"),
        }
    }
}
