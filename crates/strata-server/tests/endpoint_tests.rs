//! Endpoint behavior: advertisement bytes, hardening, auth, rate limits.

use std::sync::Arc;

use bstr::BString;
use strata_hash::ObjectId;
use strata_object::{Commit, Ident, Object, ObjectType};
use strata_odb::db::open_in_memory;
use strata_odb::{MemoryStore, StoreConfig, TieredStore};
use strata_protocol::negotiation::NegotiationLimits;
use strata_protocol::pktline::PktWriter;
use strata_ref::{RefStore, Tags};
use strata_server::auth::{AllowAll, StaticTokenProvider};
use strata_server::{FixedWindowLimiter, SmartHttpServer, SmartRequest};

struct Fixture {
    store: TieredStore,
    refs: RefStore,
}

async fn fixture() -> Fixture {
    let pool = open_in_memory().await.unwrap();
    let store = TieredStore::open(
        Arc::new(MemoryStore::new()),
        pool.clone(),
        StoreConfig::default(),
    )
    .await
    .unwrap();
    let refs = RefStore::open(pool).await.unwrap();
    Fixture { store, refs }
}

async fn seed_commit(store: &TieredStore, msg: &str) -> ObjectId {
    let tree = store.put(ObjectType::Tree, b"").await.unwrap();
    store
        .put_object(&Object::Commit(Commit {
            tree,
            parents: Vec::new(),
            author: Ident::new("S", "s@example.com", 1),
            committer: Ident::new("S", "s@example.com", 1),
            gpgsig: None,
            message: BString::from(msg),
        }))
        .await
        .unwrap()
}

fn server() -> SmartHttpServer {
    SmartHttpServer::new(Arc::new(AllowAll))
}

fn info_refs_request(service: &str) -> SmartRequest {
    SmartRequest {
        method: "GET".into(),
        service: Some(service.into()),
        ..SmartRequest::default()
    }
}

#[tokio::test]
async fn advertisement_shape_with_peeled_tag() {
    let fx = fixture().await;
    let commit = seed_commit(&fx.store, "main tip\n").await;
    fx.refs.set_ref("refs/heads/main", &commit, None).await.unwrap();
    fx.refs.set_head_branch("refs/heads/main").await.unwrap();

    let tags = Tags::new(&fx.refs, &fx.store);
    let tag_id = tags
        .create_annotated("v1", &commit, Ident::new("R", "r@example.com", 2), "v1\n", None, false)
        .await
        .unwrap();

    let response = server()
        .info_refs(&fx.store, &fx.refs, &info_refs_request("git-upload-pack"))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(
        response.content_type,
        "application/x-git-upload-pack-advertisement"
    );

    let text = String::from_utf8_lossy(&response.body);
    assert!(response
        .body
        .starts_with(b"001e# service=git-upload-pack\n0000"));
    // First ref carries the capability list after a NUL.
    assert!(text.contains(&format!("{} refs/heads/main\0", commit.to_hex())));
    assert!(text.contains(&format!("{} refs/tags/v1\n", tag_id.to_hex())));
    assert!(text.contains(&format!("{} refs/tags/v1^{{}}\n", commit.to_hex())));
    assert!(text.ends_with("0000"));
}

#[tokio::test]
async fn empty_repo_advertises_zero_capabilities() {
    let fx = fixture().await;
    let response = server()
        .info_refs(&fx.store, &fx.refs, &info_refs_request("git-receive-pack"))
        .await;
    assert_eq!(response.status, 200);
    let text = String::from_utf8_lossy(&response.body);
    assert!(text.contains("capabilities^{}"));
}

#[tokio::test]
async fn unknown_service_rejected() {
    let fx = fixture().await;
    let response = server()
        .info_refs(&fx.store, &fx.refs, &info_refs_request("git-evil-pack"))
        .await;
    assert_eq!(response.status, 400);

    let no_service = SmartRequest {
        method: "GET".into(),
        ..SmartRequest::default()
    };
    let response = server().info_refs(&fx.store, &fx.refs, &no_service).await;
    assert_eq!(response.status, 400);
}

#[tokio::test]
async fn upload_pack_wrong_content_type_is_415() {
    let fx = fixture().await;
    let request = SmartRequest {
        method: "POST".into(),
        content_type: Some("text/plain".into()),
        ..SmartRequest::default()
    };
    let response = server().upload_pack(&fx.store, &request).await;
    assert_eq!(response.status, 415);
}

#[tokio::test]
async fn max_wants_violation_yields_err_pkt_and_400() {
    let fx = fixture().await;
    let commit = seed_commit(&fx.store, "x\n").await;

    let mut body = Vec::new();
    {
        let mut writer = PktWriter::new(&mut body);
        for _ in 0..3 {
            writer.write_text(&format!("want {commit}")).unwrap();
        }
        writer.write_flush().unwrap();
        writer.write_text("done").unwrap();
    }
    let request = SmartRequest {
        method: "POST".into(),
        content_type: Some("application/x-git-upload-pack-request".into()),
        body,
        ..SmartRequest::default()
    };

    let server = server().with_limits(NegotiationLimits {
        max_wants: 2,
        ..NegotiationLimits::default()
    });
    let response = server.upload_pack(&fx.store, &request).await;
    assert_eq!(response.status, 400);
    assert!(String::from_utf8_lossy(&response.body).contains("ERR MAX_WANTS_EXCEEDED"));
}

#[tokio::test]
async fn upload_pack_round_trip_through_handler() {
    let fx = fixture().await;
    let commit = seed_commit(&fx.store, "served\n").await;

    let mut body = Vec::new();
    {
        let mut writer = PktWriter::new(&mut body);
        writer.write_text(&format!("want {commit}")).unwrap();
        writer.write_flush().unwrap();
        writer.write_text("done").unwrap();
    }
    let request = SmartRequest {
        method: "POST".into(),
        content_type: Some("application/x-git-upload-pack-request".into()),
        body,
        ..SmartRequest::default()
    };
    let response = server().upload_pack(&fx.store, &request).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type, "application/x-git-upload-pack-result");
    // NAK then a raw pack.
    assert!(response.body.starts_with(b"0008NAK\n"));
    assert!(response.body[8..].starts_with(b"PACK"));
}

#[tokio::test]
async fn bearer_auth_gates_requests() {
    let fx = fixture().await;
    let server = SmartHttpServer::new(Arc::new(StaticTokenProvider::new("sesame")));

    let mut request = info_refs_request("git-upload-pack");
    let response = server.info_refs(&fx.store, &fx.refs, &request).await;
    assert_eq!(response.status, 401);
    assert!(response
        .headers
        .iter()
        .any(|(name, value)| name == "WWW-Authenticate" && value.contains("Basic realm")));

    request.authorization = Some("Bearer sesame".into());
    let response = server.info_refs(&fx.store, &fx.refs, &request).await;
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn rate_limit_yields_429_with_retry_after() {
    let fx = fixture().await;
    let server = server().with_limiter(Arc::new(FixedWindowLimiter::new(1, 60_000)));

    let request = info_refs_request("git-upload-pack");
    assert_eq!(server.info_refs(&fx.store, &fx.refs, &request).await.status, 200);

    let denied = server.info_refs(&fx.store, &fx.refs, &request).await;
    assert_eq!(denied.status, 429);
    assert!(denied.headers.iter().any(|(name, _)| name == "Retry-After"));
}
