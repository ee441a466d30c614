#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod allowlist;
pub mod matcher;
pub mod ready;

pub use self::{
    allowlist::{Identity, ServiceAccountReader, TrustedUids},
    matcher::Matcher,
};

/// Annotation carrying a pod's application identifier.
pub const APP_ID_ANNOTATION: &str = "dapr.io/app-id";

/// Annotation that opts a pod into sidecar injection.
pub const ENABLED_ANNOTATION: &str = "dapr.io/enabled";

/// Name of the injected sidecar container.
pub const SIDECAR_CONTAINER_NAME: &str = "daprd";
