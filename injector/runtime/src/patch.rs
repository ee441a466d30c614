use crate::{core::SIDECAR_CONTAINER_NAME, Config};
use anyhow::{ensure, Result};
use json_patch::{jsonptr::PointerBuf, AddOperation, Patch, PatchOperation};
use k8s_openapi::api::core::v1::{Container, EnvVar, EnvVarSource, ObjectFieldSelector, Pod};

/// Generates the JSON patch that injects a sidecar into a pod.
pub trait PatchGenerator: Send + Sync + 'static {
    fn patch(&self, pod: &Pod, app_id: &str, config: &Config) -> Result<Patch>;
}

/// Appends a sidecar container configured with the injector's image and
/// control plane identity.
#[derive(Clone, Debug, Default)]
pub struct SidecarPatch(());

// === impl SidecarPatch ===

impl SidecarPatch {
    pub fn new() -> Self {
        Self(())
    }

    fn container(app_id: &str, config: &Config) -> Container {
        Container {
            name: SIDECAR_CONTAINER_NAME.to_string(),
            image: Some(config.sidecar_image.clone()),
            image_pull_policy: Some(config.sidecar_image_pull_policy.clone()),
            args: Some(vec![
                "--app-id".to_string(),
                app_id.to_string(),
                "--control-plane-namespace".to_string(),
                config.namespace.clone(),
                "--control-plane-trust-domain".to_string(),
                config.control_plane_trust_domain.clone(),
            ]),
            env: Some(vec![EnvVar {
                name: "NAMESPACE".to_string(),
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        field_path: "metadata.namespace".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }
}

impl PatchGenerator for SidecarPatch {
    fn patch(&self, _pod: &Pod, app_id: &str, config: &Config) -> Result<Patch> {
        ensure!(!app_id.is_empty(), "cannot inject a sidecar without an app id");

        let container = serde_json::to_value(Self::container(app_id, config))?;
        Ok(Patch(vec![PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["spec", "containers", "-"]),
            value: container,
        })]))
    }
}
