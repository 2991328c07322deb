//! The smart HTTP server surface.
//!
//! Framework-agnostic request/response structs (the embedding HTTP stack
//! is external) wired to the protocol engines, with authentication and a
//! rate-limiter hook in front of every endpoint.

pub mod auth;
pub mod handlers;
pub mod limits;

pub use auth::{AuthContext, AuthProvider, AuthResult, Credentials};
pub use handlers::SmartHttpServer;
pub use limits::{FixedWindowLimiter, RateDecision, RateLimiter};

/// An incoming smart HTTP request, already routed to a repository.
#[derive(Debug, Clone, Default)]
pub struct SmartRequest {
    pub method: String,
    /// The `service` query parameter (info/refs only).
    pub service: Option<String>,
    pub content_type: Option<String>,
    pub authorization: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub body: Vec<u8>,
}

/// The response handed back to the embedding HTTP stack.
#[derive(Debug, Clone)]
pub struct SmartResponse {
    pub status: u16,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl SmartResponse {
    pub fn new(status: u16, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn text(status: u16, message: &str) -> Self {
        Self::new(status, "text/plain", message.as_bytes().to_vec())
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}
