use super::*;
use crate::{core::APP_ID_ANNOTATION, patch::SidecarPatch};
use anyhow::bail;
use k8s_openapi::api::core::v1::{Container, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{admission::AdmissionReview, DynamicObject};
use maplit::btreemap;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const CONTROLLER_UID: &str = "7f2b8b6c-5b1e-4b8e-9d1a-3c2f1e0a9b77";

pub(crate) fn mk_pod(name: &str, annotations: BTreeMap<&str, &str>, containers: &[&str]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            annotations: Some(
                annotations
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: containers
                .iter()
                .map(|name| Container {
                    name: name.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn mk_review(object: Value, user_info: Value) -> AdmissionReview<DynamicObject> {
    let api_version = object
        .get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or("v1");
    let (group, version) = api_version.rsplit_once('/').unwrap_or(("", api_version));
    let kind = object.get("kind").and_then(Value::as_str).unwrap_or("Pod");
    let review = json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "0df28fbd-5f5f-11e8-bc74-36e6bb280816",
            "kind": { "group": group, "version": version, "kind": kind },
            "resource": { "group": group, "version": version, "resource": "pods" },
            "name": "",
            "namespace": "default",
            "operation": "CREATE",
            "userInfo": user_info,
            "object": object,
            "dryRun": false,
        },
    });
    serde_json::from_value(review).expect("review must decode")
}

pub(crate) fn mk_request(pod: &Pod, user_info: Value) -> AdmissionRequest {
    let obj = serde_json::to_value(pod).expect("pod must encode");
    mk_review(obj, user_info)
        .try_into()
        .expect("review must have a request")
}

fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .finish(),
    )
}

fn config() -> Config {
    Config {
        sidecar_image: "c".to_string(),
        sidecar_image_pull_policy: "d".to_string(),
        namespace: "e".to_string(),
        allowed_service_accounts_prefix_names: "ns*:sa,namespace:sa*".to_string(),
        control_plane_trust_domain: "trust.domain".to_string(),
        ..Default::default()
    }
}

fn options(config: Config) -> Options {
    Options {
        config,
        trusted_uids: [CONTROLLER_UID].into_iter().collect(),
        patcher: Arc::new(SidecarPatch::new()),
    }
}

fn injector() -> Injector {
    let (injector, signal) = Injector::new(options(config())).expect("config must be valid");
    signal.ready();
    injector
}

fn enabled_pod(name: &str) -> Pod {
    mk_pod(name, btreemap! { ENABLED_ANNOTATION => "true" }, &["app"])
}

fn controller() -> Value {
    json!({
        "username": "system:serviceaccount:kube-system:replicaset-controller",
        "uid": CONTROLLER_UID,
        "groups": ["system:serviceaccounts", "system:serviceaccounts:kube-system"],
    })
}

fn service_account(ns: &str, name: &str) -> Value {
    json!({
        "username": format!("system:serviceaccount:{ns}:{name}"),
        "uid": "6a2f6a3e-0000-0000-0000-000000000000",
        "groups": ["system:serviceaccounts", format!("system:serviceaccounts:{ns}"), "system:authenticated"],
    })
}

// === construction ===

#[test]
fn config_correct_values() {
    let (injector, _signal) = Injector::new(options(config())).expect("config must be valid");
    assert_eq!(injector.config().sidecar_image, "c");
    assert_eq!(injector.config().sidecar_image_pull_policy, "d");
    assert_eq!(injector.config().namespace, "e");
    assert_eq!(
        *injector.matcher(),
        Matcher::build("ns*:sa,namespace:sa*").unwrap()
    );
}

#[test]
fn bad_prefixed_service_account_config() {
    let config = Config {
        allowed_service_accounts_prefix_names: "ns*:sa,namespace:sa*sa".to_string(),
        ..config()
    };
    Injector::new(options(config)).expect_err("matcher must not build");
}

#[test]
fn bad_allowed_service_accounts() {
    let config = Config {
        allowed_service_accounts: "test:test,bogus".to_string(),
        ..config()
    };
    Injector::new(options(config)).expect_err("allowed service accounts must not parse");
}

#[test]
fn requires_image_and_namespace() {
    let no_image = Config {
        sidecar_image: String::new(),
        ..config()
    };
    Injector::new(options(no_image)).expect_err("sidecar image is required");

    let no_namespace = Config {
        namespace: String::new(),
        ..config()
    };
    Injector::new(options(no_namespace)).expect_err("namespace is required");
}

#[test]
fn bad_trust_domain() {
    let config = Config {
        control_plane_trust_domain: "Not A Domain".to_string(),
        ..config()
    };
    Injector::new(options(config)).expect_err("trust domain must be DNS-like");
}

// === readiness ===

#[tokio::test(start_paused = true)]
async fn ready_once_signaled() {
    let injector = injector();
    injector
        .ready(time::Duration::from_secs(5))
        .await
        .expect("must be ready");
}

#[tokio::test(start_paused = true)]
async fn not_ready_times_out() {
    let (injector, _signal) = Injector::new(options(config())).unwrap();
    let timeout = time::Duration::from_millis(10);
    let start = time::Instant::now();
    let error = injector.ready(timeout).await.expect_err("must time out");
    assert_eq!(error, NotReady::Timeout(timeout));
    assert!(start.elapsed() < time::Duration::from_secs(1));
    assert!(error.to_string().starts_with("timed out waiting for the injector"));
}

#[tokio::test]
async fn ready_after_initialization() {
    let (injector, signal) = Injector::new(options(config())).unwrap();
    let waiter = tokio::spawn({
        let injector = injector.clone();
        async move { injector.ready(time::Duration::from_secs(60)).await }
    });
    tokio::task::yield_now().await;
    signal.ready();
    waiter
        .await
        .expect("task must not panic")
        .expect("must be ready");
}

// === admission ===

#[test]
fn injects_for_trusted_uid() {
    let req = mk_request(&enabled_pod("web"), controller());
    match injector().admit(&req) {
        Decision::Inject { app_id, patch } => {
            assert_eq!(app_id, "web");
            assert_eq!(patch.0.len(), 1);
        }
        decision => panic!("unexpected decision: {decision:?}"),
    }
}

#[test]
fn injects_for_matching_service_account() {
    for (ns, sa) in [("ns", "sa"), ("ns-builds", "sa"), ("namespace", "sa-runner")] {
        let req = mk_request(&enabled_pod("web"), service_account(ns, sa));
        assert!(
            matches!(injector().admit(&req), Decision::Inject { .. }),
            "{ns}:{sa} must be allowed"
        );
    }
}

#[test]
fn injects_for_cluster_admins() {
    let user = json!({
        "username": "kubernetes-admin",
        "groups": ["system:masters", "system:authenticated"],
    });
    let req = mk_request(&enabled_pod("web"), user);
    assert!(matches!(injector().admit(&req), Decision::Inject { .. }));
}

#[test]
fn skips_untrusted_requester() {
    let _tracing = init_tracing();
    for user in [
        service_account("default", "default"),
        service_account("ns", "other"),
        json!({ "username": "jane", "groups": ["system:authenticated"] }),
        json!({}),
    ] {
        let req = mk_request(&enabled_pod("web"), user);
        assert!(
            matches!(
                injector().admit(&req),
                Decision::Skip(Skip::Untrusted(_))
            ),
            "{:?} must not be allowed",
            req.user_info
        );
    }
}

#[test]
fn service_account_requires_group() {
    let user = json!({
        "username": "system:serviceaccount:ns:sa",
        "groups": ["system:authenticated"],
    });
    let req = mk_request(&enabled_pod("web"), user);
    assert!(
        injector().admit(&req).respond(&req).allowed,
        "untrusted requests are admitted without mutation"
    );
    assert!(matches!(
        injector().admit(&req),
        Decision::Skip(Skip::Untrusted(username)) if username == "system:serviceaccount:ns:sa"
    ));
}

#[test]
fn spoofed_name_is_not_trusted() {
    // Same name as a trusted controller but a different UID.
    let user = json!({
        "username": "system:serviceaccount:kube-system:replicaset-controller",
        "uid": "recreated",
        "groups": ["system:serviceaccounts"],
    });
    let req = mk_request(&enabled_pod("web"), user);
    assert!(matches!(
        injector().admit(&req),
        Decision::Skip(Skip::Untrusted(_))
    ));
}

#[test]
fn skips_other_kinds() {
    let obj = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": "web", "namespace": "default" },
    });
    let req: AdmissionRequest = mk_review(obj, controller()).try_into().unwrap();
    assert_eq!(
        injector().admit(&req).to_skip(),
        Some(Skip::UnsupportedKind("Deployment".to_string()))
    );
}

#[test]
fn skips_pods_without_object() {
    let req: AdmissionRequest = mk_review(json!(null), controller()).try_into().unwrap();
    assert!(matches!(
        injector().admit(&req),
        Decision::Skip(Skip::MalformedPod(_))
    ));
}

#[test]
fn skips_pods_not_enabled() {
    for annotations in [
        btreemap! {},
        btreemap! { ENABLED_ANNOTATION => "false" },
        btreemap! { ENABLED_ANNOTATION => "" },
    ] {
        let pod = mk_pod("web", annotations, &["app"]);
        let req = mk_request(&pod, controller());
        assert_eq!(injector().admit(&req).to_skip(), Some(Skip::NotEnabled));
    }
}

#[test]
fn accepts_truthy_annotations() {
    for v in ["true", "True", "1", "yes", "on", "y", "t"] {
        assert!(is_truthy(v), "{v} must be truthy");
    }
    for v in ["false", "0", "no", "", "enabled"] {
        assert!(!is_truthy(v), "{v} must not be truthy");
    }
}

#[test]
fn skips_injected_pods() {
    let pod = mk_pod(
        "web",
        btreemap! { ENABLED_ANNOTATION => "true" },
        &["app", SIDECAR_CONTAINER_NAME],
    );
    let req = mk_request(&pod, controller());
    assert_eq!(injector().admit(&req).to_skip(), Some(Skip::AlreadyInjected));
}

#[test]
fn uses_annotated_app_id() {
    let pod = mk_pod(
        "web-5d8f7c",
        btreemap! { ENABLED_ANNOTATION => "true", APP_ID_ANNOTATION => "checkout" },
        &["app"],
    );
    let req = mk_request(&pod, controller());
    match injector().admit(&req) {
        Decision::Inject { app_id, .. } => assert_eq!(app_id, "checkout"),
        decision => panic!("unexpected decision: {decision:?}"),
    }
}

#[test]
fn denies_when_patch_fails() {
    let _tracing = init_tracing();
    struct Failing;
    impl PatchGenerator for Failing {
        fn patch(&self, _: &Pod, _: &str, _: &Config) -> Result<Patch> {
            bail!("no sidecar for you")
        }
    }

    let (injector, _signal) = Injector::new(Options {
        patcher: Arc::new(Failing),
        ..options(config())
    })
    .unwrap();
    let req = mk_request(&enabled_pod("web"), controller());
    let decision = injector.admit(&req);
    assert_eq!(decision.label(), "deny");
    let rsp = decision.respond(&req);
    assert!(!rsp.allowed);
}

#[test]
fn responds_with_patch() {
    let req = mk_request(&enabled_pod("web"), controller());
    let decision = injector().admit(&req);
    assert_eq!(decision.label(), "inject");
    let rsp = serde_json::to_value(decision.respond(&req)).unwrap();
    assert_eq!(rsp["allowed"], json!(true));
    assert!(!rsp["patch"].is_null());
}

#[test]
fn skipped_responses_are_allowed_unpatched() {
    let req = mk_request(&mk_pod("web", btreemap! {}, &["app"]), controller());
    let decision = injector().admit(&req);
    assert_eq!(decision.label(), "skip");
    let rsp = serde_json::to_value(decision.respond(&req)).unwrap();
    assert_eq!(rsp["allowed"], json!(true));
    assert!(rsp["patch"].is_null());
}

impl Decision {
    fn to_skip(&self) -> Option<Skip> {
        match self {
            Self::Skip(skip) => Some(skip.clone()),
            _ => None,
        }
    }
}
