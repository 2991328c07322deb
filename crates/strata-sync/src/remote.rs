//! The remote side of a mirror, abstracted for transport independence.

use async_trait::async_trait;
use strata_hash::ObjectId;
use strata_odb::TieredStore;
use strata_protocol::receive_pack::unpack_objects;
use strata_transport::HttpTransport;

use strata_client::fetch::{build_fetch_body, extract_pack};
use strata_client::push::PushUpdate;
use strata_client::{parse_advertisement, PushOutcome};

use crate::SyncError;

/// What the mirror needs from a remote: discovery, one-round object
/// fetch, and ref pushes.
#[async_trait]
pub trait MirrorRemote: Send + Sync {
    async fn discover(&self) -> Result<Vec<(String, ObjectId)>, SyncError>;

    /// Fetch the closure of `wants` into `store`. Returns objects received.
    async fn fetch_missing(
        &self,
        store: &TieredStore,
        wants: &[ObjectId],
    ) -> Result<usize, SyncError>;

    async fn push_refs(
        &self,
        store: &TieredStore,
        updates: &[PushUpdate],
    ) -> Result<Vec<PushOutcome>, SyncError>;
}

/// A mirror remote over smart HTTP.
pub struct HttpRemote {
    transport: HttpTransport,
}

impl HttpRemote {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl MirrorRemote for HttpRemote {
    async fn discover(&self) -> Result<Vec<(String, ObjectId)>, SyncError> {
        let body = self.transport.info_refs("git-upload-pack").await?;
        let remote = parse_advertisement(&body, "git-upload-pack")?;
        Ok(remote.refs)
    }

    async fn fetch_missing(
        &self,
        store: &TieredStore,
        wants: &[ObjectId],
    ) -> Result<usize, SyncError> {
        if wants.is_empty() {
            return Ok(0);
        }
        let body = build_fetch_body(wants, &[], None)?;
        let response = self
            .transport
            .service_request("git-upload-pack", body)
            .await?;
        let pack = extract_pack(&response)?;
        let count = unpack_objects(store, &pack).await?;
        store.flush().await?;
        Ok(count)
    }

    async fn push_refs(
        &self,
        store: &TieredStore,
        updates: &[PushUpdate],
    ) -> Result<Vec<PushOutcome>, SyncError> {
        Ok(strata_client::push::push(store, &self.transport, updates).await?)
    }
}
