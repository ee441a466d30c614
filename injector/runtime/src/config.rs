use crate::core::{allowlist::InvalidIdentity, Identity};

/// Controllers that create pods on behalf of users and are always trusted to
/// request injection, provided they exist in the cluster.
pub const DEFAULT_BUILTIN_CONTROLLERS: &str =
    "kube-system:replicaset-controller,tekton-pipelines:tekton-pipelines-controller";

/// Injector configuration, loaded once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// The sidecar image reference.
    pub sidecar_image: String,

    /// The sidecar's image pull policy, e.g. `IfNotPresent`.
    pub sidecar_image_pull_policy: String,

    /// The namespace in which the control plane runs.
    pub namespace: String,

    /// Comma-separated `namespace:name` service accounts whose UIDs are
    /// trusted, in addition to the built-in controllers.
    pub allowed_service_accounts: String,

    /// Comma-separated `namespace:serviceaccount` patterns, where either half
    /// may end in `*` to match a prefix. Empty entries are ignored, as they are
    /// in `allowed_service_accounts`.
    pub allowed_service_accounts_prefix_names: String,

    /// The trust domain of the control plane's identity.
    pub control_plane_trust_domain: String,

    /// Well-known controllers whose UIDs are always trusted.
    pub builtin_controllers: Vec<Identity>,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            sidecar_image: String::new(),
            sidecar_image_pull_policy: "IfNotPresent".to_string(),
            namespace: String::new(),
            allowed_service_accounts: String::new(),
            allowed_service_accounts_prefix_names: String::new(),
            control_plane_trust_domain: "cluster.local".to_string(),
            builtin_controllers: Identity::parse_list(DEFAULT_BUILTIN_CONTROLLERS)
                .unwrap_or_default(),
        }
    }
}

impl Config {
    /// Returns the built-in controllers followed by the configured allowed
    /// service accounts.
    pub fn trusted_identities(&self) -> Result<Vec<Identity>, InvalidIdentity> {
        let allowed = Identity::parse_list(&self.allowed_service_accounts)?;
        Ok(self
            .builtin_controllers
            .iter()
            .cloned()
            .chain(allowed)
            .collect())
    }
}
