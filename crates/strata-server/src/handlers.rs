//! The three smart HTTP endpoints.

use std::sync::Arc;

use strata_hash::ObjectId;
use strata_object::Object;
use strata_odb::TieredStore;
use strata_protocol::advertise::{advertisement, AdvertisedRef};
use strata_protocol::negotiation::{NegotiationContext, NegotiationLimits};
use strata_protocol::pktline::PktWriter;
use strata_protocol::{receive_pack, upload_pack, ProtocolError};
use strata_ref::RefStore;
use tracing::{info, warn};

use crate::auth::{parse_authorization, AuthContext, AuthProvider};
use crate::limits::RateLimiter;
use crate::{SmartRequest, SmartResponse};

const UPLOAD_PACK: &str = "git-upload-pack";
const RECEIVE_PACK: &str = "git-receive-pack";

/// The server: auth in front, limits threaded through, engines behind.
pub struct SmartHttpServer {
    auth: Arc<dyn AuthProvider>,
    limiter: Option<Arc<dyn RateLimiter>>,
    limits: NegotiationLimits,
}

impl SmartHttpServer {
    pub fn new(auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            auth,
            limiter: None,
            limits: NegotiationLimits::default(),
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_limits(mut self, limits: NegotiationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// `GET /info/refs?service=…`
    pub async fn info_refs(
        &self,
        store: &TieredStore,
        refs: &RefStore,
        request: &SmartRequest,
    ) -> SmartResponse {
        let Some(service) = request.service.as_deref() else {
            return SmartResponse::text(400, "dumb http protocol is not supported");
        };
        if service != UPLOAD_PACK && service != RECEIVE_PACK {
            return SmartResponse::text(400, &format!("unknown service {service}"));
        }
        if let Some(denied) = self.gate(request, service).await {
            return denied;
        }

        let advertised = match self.advertised_refs(store, refs).await {
            Ok(refs) => refs,
            Err(e) => {
                warn!(error = %e, "advertisement failed");
                return SmartResponse::text(500, "internal error");
            }
        };
        match advertisement(service, &advertised, "sha1") {
            Ok(body) => SmartResponse::new(
                200,
                &format!("application/x-{service}-advertisement"),
                body,
            )
            .with_header("Cache-Control", "no-cache"),
            Err(e) => {
                warn!(error = %e, "advertisement encoding failed");
                SmartResponse::text(500, "internal error")
            }
        }
    }

    /// `POST /git-upload-pack`
    pub async fn upload_pack(
        &self,
        store: &TieredStore,
        request: &SmartRequest,
    ) -> SmartResponse {
        if let Some(response) = check_content_type(request, UPLOAD_PACK) {
            return response;
        }
        if let Some(denied) = self.gate(request, UPLOAD_PACK).await {
            return denied;
        }

        let mut ctx = NegotiationContext::new(self.limits.clone());
        let parsed = match upload_pack::parse_request(&request.body, &mut ctx) {
            Ok(parsed) => parsed,
            Err(e) => return protocol_error_response(UPLOAD_PACK, &e),
        };
        match with_deadline(self.limits.timeout_ms, upload_pack::respond(store, &parsed)).await {
            Ok(body) => SmartResponse::new(
                200,
                &format!("application/x-{UPLOAD_PACK}-result"),
                body,
            ),
            Err(e) => protocol_error_response(UPLOAD_PACK, &e),
        }
    }

    /// `POST /git-receive-pack`
    pub async fn receive_pack(
        &self,
        store: &TieredStore,
        refs: &RefStore,
        request: &SmartRequest,
    ) -> SmartResponse {
        if let Some(response) = check_content_type(request, RECEIVE_PACK) {
            return response;
        }
        if let Some(denied) = self.gate(request, RECEIVE_PACK).await {
            return denied;
        }

        let mut ctx = NegotiationContext::new(self.limits.clone());
        let parsed = match receive_pack::parse_request(&request.body, &mut ctx) {
            Ok(parsed) => parsed,
            Err(e) => return protocol_error_response(RECEIVE_PACK, &e),
        };
        match with_deadline(
            self.limits.timeout_ms,
            receive_pack::respond(store, refs, &parsed),
        )
        .await
        {
            Ok(body) => SmartResponse::new(
                200,
                &format!("application/x-{RECEIVE_PACK}-result"),
                body,
            ),
            Err(e) => protocol_error_response(RECEIVE_PACK, &e),
        }
    }

    /// Rate limit, then authenticate. `None` means the request may proceed.
    async fn gate(&self, request: &SmartRequest, service: &str) -> Option<SmartResponse> {
        if let Some(limiter) = &self.limiter {
            let key = request.ip.clone().unwrap_or_else(|| "anonymous".into());
            let decision = limiter.before_request(&key).await;
            if !decision.allowed {
                let retry = decision.retry_after.unwrap_or(1);
                return Some(
                    SmartResponse::text(429, "rate limited")
                        .with_header("Retry-After", &retry.to_string()),
                );
            }
        }

        let credentials = parse_authorization(request.authorization.as_deref());
        let context = AuthContext {
            service: service.to_string(),
            method: request.method.clone(),
            ip: request.ip.clone(),
            user_agent: request.user_agent.clone(),
            ..AuthContext::default()
        };
        let verdict = self.auth.validate(&credentials, &context).await;
        if !verdict.valid {
            info!(service, reason = ?verdict.reason, "request denied");
            return Some(
                SmartResponse::text(401, "authentication required").with_header(
                    "WWW-Authenticate",
                    "Basic realm=\"gitstrata\", Bearer realm=\"gitstrata\"",
                ),
            );
        }
        None
    }

    /// Every ref for the advertisement: `refs/*` in byte order, with
    /// annotated tags peeled. HEAD's branch travels in the `symref`
    /// capability on the client side, not as a ref line.
    async fn advertised_refs(
        &self,
        store: &TieredStore,
        refs: &RefStore,
    ) -> Result<Vec<AdvertisedRef>, ProtocolError> {
        let mut out = Vec::new();
        for (name, id) in refs.list(Some("refs/")).await? {
            // Worktree HEADs are repository-internal state.
            if name.starts_with("refs/worktrees/") {
                continue;
            }
            let peeled = if name.starts_with("refs/tags/") {
                peel_to_non_tag(store, &id).await?
            } else {
                None
            };
            out.push(AdvertisedRef { name, id, peeled });
        }
        Ok(out)
    }
}

/// Follow tag objects to the first non-tag target. `None` for lightweight
/// tags (nothing to peel).
async fn peel_to_non_tag(
    store: &TieredStore,
    id: &ObjectId,
) -> Result<Option<ObjectId>, ProtocolError> {
    let mut current = *id;
    let mut peeled = false;
    for _ in 0..50 {
        match store.get_object(&current).await? {
            Some(Object::Tag(tag)) => {
                current = tag.target;
                peeled = true;
            }
            _ => break,
        }
    }
    Ok(peeled.then_some(current))
}

/// Race an engine future against the negotiation timeout. A request that
/// outlives the deadline stops issuing work and reports `Timeout`.
async fn with_deadline<F>(timeout_ms: u64, future: F) -> Result<Vec<u8>, ProtocolError>
where
    F: std::future::Future<Output = Result<Vec<u8>, ProtocolError>>,
{
    match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

fn check_content_type(request: &SmartRequest, service: &str) -> Option<SmartResponse> {
    let expected = format!("application/x-{service}-request");
    match request.content_type.as_deref() {
        Some(actual) if actual == expected => None,
        other => Some(SmartResponse::text(
            415,
            &format!("expected {expected}, got {other:?}"),
        )),
    }
}

/// Map engine errors to wire responses: an `ERR` pkt-line body with the
/// status the failure class calls for.
fn protocol_error_response(service: &str, error: &ProtocolError) -> SmartResponse {
    let status = match error {
        ProtocolError::Timeout => 408,
        ProtocolError::LimitExceeded(_)
        | ProtocolError::InvalidSha(_)
        | ProtocolError::InvalidCapability(_)
        | ProtocolError::RefLineTooLong(_)
        | ProtocolError::MalformedPktLine(_)
        | ProtocolError::Truncated(_)
        | ProtocolError::Protocol(_)
        | ProtocolError::Pack(_) => 400,
        _ => 500,
    };
    let mut body = Vec::new();
    let mut writer = PktWriter::new(&mut body);
    let message = match error {
        ProtocolError::LimitExceeded(code) => (*code).to_string(),
        other => other.to_string(),
    };
    // Channel-3 semantics are carried by the ERR prefix at this stage; the
    // stream is not yet side-band framed.
    let _ = writer.write_text(&format!("ERR {message}"));
    warn!(service, status, error = %error, "request failed");
    SmartResponse::new(status, &format!("application/x-{service}-result"), body)
}
