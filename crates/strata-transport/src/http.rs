//! Smart HTTP client: ref discovery GET plus the service POST.

use tracing::debug;

use crate::url::GitUrl;
use crate::TransportError;

/// Stateless smart HTTP transport for one remote.
pub struct HttpTransport {
    client: reqwest::Client,
    base: String,
    basic_auth: Option<(String, Option<String>)>,
}

impl HttpTransport {
    pub fn new(url: &GitUrl) -> Result<Self, TransportError> {
        let base = url.http_base()?;
        let basic_auth = url
            .user
            .clone()
            .map(|user| (user, url.password.clone()));
        Ok(Self {
            client: reqwest::Client::new(),
            base,
            basic_auth,
        })
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.basic_auth {
            Some((user, password)) => request.basic_auth(user, password.as_deref()),
            None => request,
        }
    }

    /// `GET /info/refs?service=<svc>` — the ref advertisement.
    pub async fn info_refs(&self, service: &str) -> Result<Vec<u8>, TransportError> {
        let url = format!("{}/info/refs?service={service}", self.base);
        debug!(url, "ref discovery");
        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(TransportError::Status { status, url });
        }
        let expected = format!("application/x-{service}-advertisement");
        check_content_type(&response, &expected)?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| TransportError::Http(e.to_string()))
    }

    /// `POST /<svc>` with a request body; returns the result body.
    pub async fn service_request(
        &self,
        service: &str,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError> {
        let url = format!("{}/{service}", self.base);
        debug!(url, bytes = body.len(), "service request");
        let response = self
            .with_auth(self.client.post(&url))
            .header("Content-Type", format!("application/x-{service}-request"))
            .header("Accept", format!("application/x-{service}-result"))
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(TransportError::Status { status, url });
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| TransportError::Http(e.to_string()))
    }
}

fn check_content_type(
    response: &reqwest::Response,
    expected: &str,
) -> Result<(), TransportError> {
    let actual = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if actual != expected {
        return Err(TransportError::UnexpectedContentType(actual.to_string()));
    }
    Ok(())
}
