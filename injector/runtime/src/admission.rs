use crate::{injector::Injector, AdmissionRequest, AdmissionResponse};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::core::DynamicObject;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use thiserror::Error;
use tokio::time;
use tracing::{debug, trace, warn};

/// The longest a readiness probe waits for the injector.
const READY_PROBE_TIMEOUT: time::Duration = time::Duration::from_secs(1);

/// Serves sidecar injection admission reviews on `POST /` and the injector's
/// readiness on `GET /readyz`.
#[derive(Clone, Debug)]
pub struct Admission {
    injector: Injector,
    metrics: Metrics,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default)]
pub struct Metrics {
    decisions: Family<DecisionLabels, Counter>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct DecisionLabels {
    decision: &'static str,
}

/// The endpoints served by [`Admission`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Route {
    Review,
    Ready,
    NotFound,
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Admission ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        match Route::of(req.method(), req.uri().path()) {
            Route::Ready => Box::pin(self.clone().readyz()),
            Route::NotFound => Box::pin(future::ok(not_found())),
            Route::Review => {
                let admission = self.clone();
                Box::pin(async move {
                    let bytes = req.into_body().collect().await?.to_bytes();
                    admission.review(&bytes)
                })
            }
        }
    }
}

impl Admission {
    pub fn new(injector: Injector, metrics: Metrics) -> Self {
        Self { injector, metrics }
    }

    /// Decodes an admission review, admits it, and encodes the response.
    fn review(&self, body: &[u8]) -> Result<Response<Body>, Error> {
        let review: Review = match serde_json::from_slice(body) {
            Ok(review) => review,
            Err(error) => {
                warn!(%error, "Failed to parse request body");
                return json_response(AdmissionResponse::invalid(error).into_review());
            }
        };
        trace!(?review);

        let req: Result<AdmissionRequest, _> = review.try_into();
        let rsp = match req {
            Ok(req) => {
                debug!(?req);
                self.admit(&req)
            }
            Err(error) => {
                warn!(%error, "Invalid admission request");
                AdmissionResponse::invalid(error)
            }
        };
        debug!(?rsp);
        json_response(rsp.into_review())
    }

    fn admit(&self, req: &AdmissionRequest) -> AdmissionResponse {
        let decision = self.injector.admit(req);
        self.metrics.record(decision.label());
        decision.respond(req)
    }

    async fn readyz(self) -> Result<Response<Body>, Error> {
        let (status, body) = match self.injector.ready(READY_PROBE_TIMEOUT).await {
            Ok(()) => (http::StatusCode::OK, "ready\n".to_string()),
            Err(error) => {
                debug!(%error, "Not ready");
                (http::StatusCode::SERVICE_UNAVAILABLE, format!("{error}\n"))
            }
        };
        Ok(Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, "text/plain")
            .body(Body::from(body))
            .expect("readiness response must be valid"))
    }
}

// === impl Route ===

impl Route {
    fn of(method: &http::Method, path: &str) -> Self {
        match (method, path) {
            (&http::Method::POST, "/") => Self::Review,
            (&http::Method::GET, "/readyz") => Self::Ready,
            _ => Self::NotFound,
        }
    }
}

fn not_found() -> Response<Body> {
    Response::builder()
        .status(http::StatusCode::NOT_FOUND)
        .body(Body::default())
        .expect("not found response must be valid")
}

fn json_response(rsp: Review) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

// === impl Metrics ===

impl Metrics {
    pub fn register(reg: &mut Registry) -> Self {
        let decisions = Family::<DecisionLabels, Counter>::default();
        reg.register(
            "decisions",
            "Total number of admission reviews by injection decision",
            decisions.clone(),
        );
        Self { decisions }
    }

    fn record(&self, decision: &'static str) {
        self.decisions
            .get_or_create(&DecisionLabels { decision })
            .inc();
    }
}
