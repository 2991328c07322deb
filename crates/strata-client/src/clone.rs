//! Clone: fetch everything and set up local refs plus HEAD.

use strata_odb::TieredStore;
use strata_ref::RefStore;
use strata_transport::{GitUrl, HttpTransport};
use tracing::info;

use crate::fetch::{fetch, FetchOptions, FetchOutcome};
use crate::ClientError;

/// Clone `url` into an empty repository: all branches and tags, tracking
/// refs under `refs/remotes/<remote>/`, and HEAD attached to the remote's
/// default branch.
pub async fn clone(
    store: &TieredStore,
    refs: &RefStore,
    url: &GitUrl,
    remote_name: &str,
) -> Result<FetchOutcome, ClientError> {
    let transport = HttpTransport::new(url)?;
    let outcome = fetch(store, &transport, &FetchOptions::default()).await?;

    for (name, id) in &outcome.fetched {
        refs.set_ref(name, id, None).await?;
        if let Some(branch) = name.strip_prefix("refs/heads/") {
            refs.set_ref(&format!("refs/remotes/{remote_name}/{branch}"), id, None)
                .await?;
        }
    }

    match &outcome.remote.head_symref {
        Some(default_branch) => refs.set_head_branch(default_branch).await?,
        None => {
            // No symref advertised: fall back to main, then the first branch.
            let fallback = outcome
                .fetched
                .iter()
                .map(|(name, _)| name.as_str())
                .find(|n| *n == "refs/heads/main")
                .or_else(|| {
                    outcome
                        .fetched
                        .iter()
                        .map(|(name, _)| name.as_str())
                        .find(|n| n.starts_with("refs/heads/"))
                });
            if let Some(branch) = fallback {
                refs.set_head_branch(branch).await?;
            }
        }
    }

    info!(
        refs = outcome.fetched.len(),
        objects = outcome.objects_fetched,
        "clone complete"
    );
    Ok(outcome)
}
