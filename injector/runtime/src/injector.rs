use crate::{
    app_id::{parse_pod, pod_app_id},
    core::{
        ready::{self, NotReady},
        Matcher, TrustedUids, ENABLED_ANNOTATION, SIDECAR_CONTAINER_NAME,
    },
    patch::PatchGenerator,
    validation, AdmissionRequest, AdmissionResponse, Config,
};
use anyhow::{ensure, Context, Result};
use json_patch::Patch;
use k8s_openapi::api::{authentication::v1::UserInfo, core::v1::Pod};
use kube::Resource;
use std::{fmt, sync::Arc};
use tokio::time;
use tracing::{debug, info, warn};

#[cfg(test)]
pub(crate) mod tests;

const SERVICE_ACCOUNT_USERNAME_PREFIX: &str = "system:serviceaccount:";
const SERVICE_ACCOUNTS_GROUP: &str = "system:serviceaccounts";
const MASTERS_GROUP: &str = "system:masters";

/// Everything needed to build an [`Injector`].
pub struct Options {
    pub config: Config,

    /// UIDs of the controllers trusted to request injection. See
    /// [`crate::core::allowlist::resolve`].
    pub trusted_uids: TrustedUids,

    pub patcher: Arc<dyn PatchGenerator>,
}

/// Decides whether pods under admission review get a sidecar.
///
/// The injector is immutable once built and cheap to clone, so it may be
/// shared by any number of concurrent admission requests.
#[derive(Clone)]
pub struct Injector(Arc<Inner>);

struct Inner {
    config: Config,
    matcher: Matcher,
    trusted_uids: TrustedUids,
    patcher: Arc<dyn PatchGenerator>,
    ready: ready::Ready,
}

/// The outcome of an admission review.
#[derive(Debug)]
pub enum Decision {
    /// Admit the pod unchanged.
    Skip(Skip),

    /// Admit the pod with a sidecar.
    Inject { app_id: String, patch: Patch },

    /// Reject the pod.
    Deny(String),
}

/// Explains why a pod was admitted without a sidecar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Skip {
    Untrusted(String),
    UnsupportedKind(String),
    MalformedPod(String),
    NotEnabled,
    AlreadyInjected,
}

/// Identifies the user making an admission request.
struct Requester<'a> {
    username: &'a str,
    uid: &'a str,
    groups: &'a [String],
}

// === impl Injector ===

impl Injector {
    /// Validates the configuration and builds an injector.
    ///
    /// The returned [`ready::Signal`] must be fired once the injector is able
    /// to serve admission requests.
    pub fn new(
        Options {
            config,
            trusted_uids,
            patcher,
        }: Options,
    ) -> Result<(Self, ready::Signal)> {
        ensure!(!config.sidecar_image.is_empty(), "sidecar image must be set");
        ensure!(!config.namespace.is_empty(), "namespace must be set");
        validation::validate_trust_domain(&config.control_plane_trust_domain)?;
        let matcher = Matcher::build(&config.allowed_service_accounts_prefix_names)
            .context("invalid allowed service account prefix names")?;
        config
            .trusted_identities()
            .context("invalid allowed service accounts")?;

        let (signal, ready) = ready::channel();
        let inner = Inner {
            config,
            matcher,
            trusted_uids,
            patcher,
            ready,
        };
        Ok((Self(Arc::new(inner)), signal))
    }

    pub fn config(&self) -> &Config {
        &self.0.config
    }

    pub fn matcher(&self) -> &Matcher {
        &self.0.matcher
    }

    /// Waits up to `timeout` for the injector to become ready.
    pub async fn ready(&self, timeout: time::Duration) -> Result<(), NotReady> {
        self.0.ready.wait(timeout).await
    }

    /// Decides how a pod should be admitted.
    pub fn admit(&self, req: &AdmissionRequest) -> Decision {
        let pod = parse_pod(req);
        let app_id = pod.as_ref().map(pod_app_id).unwrap_or_default();

        let requester = Requester::from(&req.user_info);
        if !self.is_trusted(&requester) {
            info!(
                username = %requester.username,
                %app_id,
                "Requester is not on the list of allowed controller accounts"
            );
            return Decision::Skip(Skip::Untrusted(requester.username.to_string()));
        }

        if !is_kind::<Pod>(req) {
            warn!(kind = %req.kind.kind, "Invalid kind for review");
            return Decision::Skip(Skip::UnsupportedKind(req.kind.kind.clone()));
        }

        let pod = match pod {
            Ok(pod) => pod,
            Err(error) => {
                warn!(%error, "Failed to parse pod");
                return Decision::Skip(Skip::MalformedPod(error.to_string()));
            }
        };

        if !injection_enabled(&pod) {
            debug!(%app_id, "Injection not enabled");
            return Decision::Skip(Skip::NotEnabled);
        }

        if has_sidecar(&pod) {
            debug!(%app_id, "Sidecar already present");
            return Decision::Skip(Skip::AlreadyInjected);
        }

        match self.0.patcher.patch(&pod, &app_id, &self.0.config) {
            Ok(patch) => {
                info!(%app_id, ns = ?req.namespace, "Injecting sidecar");
                Decision::Inject { app_id, patch }
            }
            Err(error) => {
                warn!(%error, %app_id, "Failed to generate sidecar patch");
                Decision::Deny(error.to_string())
            }
        }
    }

    fn is_trusted(&self, requester: &Requester<'_>) -> bool {
        if !requester.uid.is_empty() && self.0.trusted_uids.contains(requester.uid) {
            return true;
        }

        if requester.in_group(MASTERS_GROUP) {
            return true;
        }

        if requester.in_group(SERVICE_ACCOUNTS_GROUP) {
            if let Some((ns, sa)) = requester.service_account() {
                return self.0.matcher.matches(ns, sa);
            }
        }

        false
    }
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("config", &self.0.config)
            .field("matcher", &self.0.matcher)
            .field("trusted_uids", &self.0.trusted_uids.len())
            .field("ready", &self.0.ready.is_ready())
            .finish()
    }
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

fn injection_enabled(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(ENABLED_ANNOTATION))
        .map(|v| is_truthy(v))
        .unwrap_or(false)
}

fn is_truthy(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "y" | "yes" | "true" | "t" | "on" | "1"
    )
}

fn has_sidecar(pod: &Pod) -> bool {
    pod.spec.iter().any(|spec| {
        spec.containers
            .iter()
            .any(|c| c.name == SIDECAR_CONTAINER_NAME)
    })
}

// === impl Decision ===

impl Decision {
    /// Builds the admission response for this decision.
    pub fn respond(self, req: &AdmissionRequest) -> AdmissionResponse {
        match self {
            Self::Skip(_) => AdmissionResponse::from(req),
            Self::Inject { patch, .. } => match AdmissionResponse::from(req).with_patch(patch) {
                Ok(rsp) => rsp,
                Err(error) => {
                    warn!(%error, "Failed to encode sidecar patch");
                    AdmissionResponse::from(req).deny(error)
                }
            },
            Self::Deny(reason) => AdmissionResponse::from(req).deny(reason),
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Skip(_) => "skip",
            Self::Inject { .. } => "inject",
            Self::Deny(_) => "deny",
        }
    }
}

// === impl Skip ===

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Untrusted(username) => {
                write!(f, "'{username}' is not an allowed controller account")
            }
            Self::UnsupportedKind(kind) => write!(f, "unsupported kind '{kind}'"),
            Self::MalformedPod(error) => write!(f, "malformed pod: {error}"),
            Self::NotEnabled => f.write_str("injection is not enabled"),
            Self::AlreadyInjected => f.write_str("sidecar already present"),
        }
    }
}

// === impl Requester ===

impl<'a> From<&'a UserInfo> for Requester<'a> {
    fn from(user: &'a UserInfo) -> Self {
        Self {
            username: user.username.as_deref().unwrap_or_default(),
            uid: user.uid.as_deref().unwrap_or_default(),
            groups: user.groups.as_deref().unwrap_or_default(),
        }
    }
}

impl<'a> Requester<'a> {
    /// Returns the namespace and name of the requesting service account, if
    /// the requester is one.
    fn service_account(&self) -> Option<(&'a str, &'a str)> {
        let (ns, name) = self
            .username
            .strip_prefix(SERVICE_ACCOUNT_USERNAME_PREFIX)?
            .split_once(':')?;
        if ns.is_empty() || name.is_empty() {
            return None;
        }
        Some((ns, name))
    }

    fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}
