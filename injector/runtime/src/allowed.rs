use crate::{
    core::{allowlist, ServiceAccountReader, TrustedUids},
    Config,
};
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::{Api, Client};
use tracing::info;

/// Reads service accounts through the Kubernetes API.
#[derive(Clone)]
pub struct KubeServiceAccounts(Client);

// === impl KubeServiceAccounts ===

impl KubeServiceAccounts {
    pub fn new(client: Client) -> Self {
        Self(client)
    }
}

#[async_trait::async_trait]
impl ServiceAccountReader for KubeServiceAccounts {
    async fn service_account_uid(&self, namespace: &str, name: &str) -> Result<Option<String>> {
        let api = Api::<ServiceAccount>::namespaced(self.0.clone(), namespace);
        // `get_opt` maps 404s to `None`; every other error is surfaced.
        let sa = api
            .get_opt(name)
            .await
            .with_context(|| format!("failed to get service account {namespace}/{name}"))?;
        Ok(sa.and_then(|sa| sa.metadata.uid))
    }
}

/// Resolves the UIDs of the built-in controllers and the configured allowed
/// service accounts.
///
/// Accounts that do not exist are skipped; any other lookup failure is
/// returned so that startup never proceeds with a partial trust set.
pub async fn resolve_trusted_uids(
    config: &Config,
    reader: &(impl ServiceAccountReader + Sync),
) -> Result<TrustedUids> {
    let identities = config
        .trusted_identities()
        .context("invalid allowed service accounts")?;
    let uids = allowlist::resolve(&identities, reader)
        .await
        .context("failed to resolve allowed controller service accounts")?;
    info!(
        identities = identities.len(),
        uids = uids.len(),
        "Resolved allowed controller service accounts"
    );
    Ok(uids)
}
