#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use sidecar_injector_core as core;

mod admission;
mod allowed;
mod app_id;
mod args;
mod config;
mod injector;
mod patch;
mod validation;

pub use self::{
    admission::{Admission, Metrics},
    allowed::{resolve_trusted_uids, KubeServiceAccounts},
    app_id::app_id,
    args::Args,
    config::{Config, DEFAULT_BUILTIN_CONTROLLERS},
    injector::{Decision, Injector, Options, Skip},
    patch::{PatchGenerator, SidecarPatch},
};

pub type AdmissionRequest = kube::core::admission::AdmissionRequest<kube::core::DynamicObject>;
pub type AdmissionResponse = kube::core::admission::AdmissionResponse;
