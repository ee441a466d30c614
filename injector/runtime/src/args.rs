use crate::{
    admission::{Admission, Metrics},
    allowed::{resolve_trusted_uids, KubeServiceAccounts},
    config::{Config, DEFAULT_BUILTIN_CONTROLLERS},
    core::Identity,
    injector::{Injector, Options},
    patch::SidecarPatch,
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[clap(name = "sidecar-injector", about = "A sidecar injection admission controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "sidecar_injector=info,warn",
        env = "SIDECAR_INJECTOR_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The sidecar container image.
    #[clap(long, env = "SIDECAR_IMAGE")]
    sidecar_image: String,

    #[clap(long, env = "SIDECAR_IMAGE_PULL_POLICY", default_value = "IfNotPresent")]
    sidecar_image_pull_policy: String,

    /// The namespace in which the control plane runs.
    #[clap(long, env = "NAMESPACE")]
    namespace: String,

    /// Comma-separated `namespace:name` service accounts trusted by UID.
    #[clap(long, env = "ALLOWED_SERVICE_ACCOUNTS", default_value = "")]
    allowed_service_accounts: String,

    /// Comma-separated `namespace:serviceaccount` patterns. Either half may
    /// end in `*`.
    #[clap(
        long,
        env = "ALLOWED_SERVICE_ACCOUNTS_PREFIX_NAMES",
        default_value = ""
    )]
    allowed_service_accounts_prefix_names: String,

    #[clap(long, env = "CONTROL_PLANE_TRUST_DOMAIN", default_value = "cluster.local")]
    control_plane_trust_domain: String,

    /// Controllers that are always trusted to request injection.
    #[clap(long, default_value = DEFAULT_BUILTIN_CONTROLLERS)]
    builtin_controllers: Controllers,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            server,
            admin,
            sidecar_image,
            sidecar_image_pull_policy,
            namespace,
            allowed_service_accounts,
            allowed_service_accounts_prefix_names,
            control_plane_trust_domain,
            builtin_controllers: Controllers(builtin_controllers),
        } = self;

        let config = Config {
            sidecar_image,
            sidecar_image_pull_policy,
            namespace,
            allowed_service_accounts,
            allowed_service_accounts_prefix_names,
            control_plane_trust_domain,
            builtin_controllers,
        };
        let mut prom = <Registry>::default();
        let metrics = Metrics::register(prom.sub_registry_with_prefix("sidecar_injector"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_server(server)
            .build()
            .await?;

        let reader = KubeServiceAccounts::new(runtime.client());
        let trusted_uids = resolve_trusted_uids(&config, &reader).await?;

        let (injector, signal) = Injector::new(Options {
            config,
            trusted_uids,
            patcher: Arc::new(SidecarPatch::new()),
        })?;
        info!(?injector, "Sidecar injector initialized");

        let admission = Admission::new(injector, metrics);
        let runtime = runtime.spawn_server(admission);
        signal.ready();

        // Block the main thread on the shutdown signal.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

#[derive(Clone, Debug)]
struct Controllers(Vec<Identity>);

impl std::str::FromStr for Controllers {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(Identity::parse_list(s)?))
    }
}
