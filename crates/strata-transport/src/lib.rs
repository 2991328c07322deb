//! Client-side transport: URL parsing and smart HTTP requests.

pub mod http;
pub mod url;

pub use http::HttpTransport;
pub use url::{GitUrl, Scheme};

/// Errors produced by transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("transport scheme {0} is not supported")]
    UnsupportedScheme(&'static str),

    #[error("http request failed: {0}")]
    Http(String),

    #[error("remote returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("remote sent unexpected content type {0:?}")]
    UnexpectedContentType(String),
}
