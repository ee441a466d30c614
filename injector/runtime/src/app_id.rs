use crate::{core::APP_ID_ANNOTATION, AdmissionRequest};
use anyhow::{anyhow, Result};
use k8s_openapi::api::core::v1::Pod;

/// Derives the application identifier of the pod under review.
///
/// The `dapr.io/app-id` annotation takes precedence, falling back to the pod's
/// name. Requests without a decodable pod yield an empty string.
pub fn app_id(req: Option<&AdmissionRequest>) -> String {
    req.and_then(|req| parse_pod(req).ok())
        .map(|pod| pod_app_id(&pod))
        .unwrap_or_default()
}

pub(crate) fn pod_app_id(pod: &Pod) -> String {
    let annotated = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(APP_ID_ANNOTATION))
        .filter(|id| !id.is_empty());
    if let Some(id) = annotated {
        return id.clone();
    }
    pod.metadata.name.clone().unwrap_or_default()
}

/// Decodes the pod embedded in an admission request.
pub(crate) fn parse_pod(req: &AdmissionRequest) -> Result<Pod> {
    let obj = req
        .object
        .as_ref()
        .ok_or_else(|| anyhow!("admission request missing 'object'"))?;
    let pod = serde_json::from_value(serde_json::to_value(obj)?)?;
    Ok(pod)
}
