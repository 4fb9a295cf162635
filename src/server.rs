use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, ConvertAdmissionReviewError},
    DynamicObject,
};
use serde_json::Value;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use warp::hyper::body::Bytes;
use warp::{reply, Filter, Rejection, Reply};

use crate::admission::{self, Verdict};
use crate::client::ClusterStore;
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::AdmissionError;

/// Admission routes: `POST /webhook/mutate` and `POST /webhook/validate`.
pub fn routes(
    store: Arc<dyn ClusterStore>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let mutate = warp::path!("webhook" / "mutate")
        .and(warp::post())
        .and(warp::body::bytes())
        .and_then(mutate_handler);
    let validate = warp::path!("webhook" / "validate")
        .and(warp::post())
        .and(warp::body::bytes())
        .and(with_store(store))
        .and_then(validate_handler);
    mutate.or(validate).with(warp::log("pod_webhook::server"))
}

/// `GET /health_check` answering `ok`.
pub fn health() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("health_check").and(warp::get()).map(|| "ok")
}

fn with_store(
    store: Arc<dyn ClusterStore>,
) -> impl Filter<Extract = (Arc<dyn ClusterStore>,), Error = Infallible> + Clone {
    warp::any().map(move || store.clone())
}

/// Decode a review body, answering malformed ones with an invalid response.
fn decode(body: &[u8]) -> Result<AdmissionRequest<DynamicObject>, AdmissionResponse> {
    let review: AdmissionReview<DynamicObject> = match serde_json::from_slice(body) {
        Ok(review) => review,
        Err(e) => {
            error!("undecodable admission review: {}", e);
            let mut res = invalid(e.to_string());
            // keep the uid when at least the envelope is readable
            if let Some(uid) = serde_json::from_slice::<Value>(body)
                .ok()
                .and_then(|v| v.pointer("/request/uid")?.as_str().map(String::from))
            {
                res.uid = uid;
            }
            return Err(res);
        }
    };
    review.try_into().map_err(|e: ConvertAdmissionReviewError| {
        error!("invalid request: {}", e);
        invalid(e.to_string())
    })
}

fn invalid(reason: String) -> AdmissionResponse {
    let mut res = AdmissionResponse::invalid(reason);
    res.result.code = 400;
    res
}

async fn mutate_handler(body: Bytes) -> Result<impl Reply, Infallible> {
    let req = match decode(&body) {
        Ok(req) => req,
        Err(res) => return Ok(reply::json(&res.into_review())),
    };
    let outcome = admission::mutate(&req);
    log_outcome("mutate", &req, &outcome);
    Ok(reply::json(&admission::respond(&req, outcome).into_review()))
}

async fn validate_handler(body: Bytes, store: Arc<dyn ClusterStore>) -> Result<impl Reply, Infallible> {
    let req = match decode(&body) {
        Ok(req) => req,
        Err(res) => return Ok(reply::json(&res.into_review())),
    };
    let outcome = Ok(admission::validate(&req, store.as_ref()).await);
    log_outcome("validate", &req, &outcome);
    Ok(reply::json(&admission::respond(&req, outcome).into_review()))
}

fn log_outcome(
    path: &str,
    req: &AdmissionRequest<DynamicObject>,
    outcome: &Result<Verdict, AdmissionError>,
) {
    let target = format!(
        "{}/{}",
        req.namespace.as_deref().unwrap_or_default(),
        req.name
    );
    match outcome {
        Ok(Verdict::Allowed(reason)) => info!(
            "{} {} {:?} {}: allowed ({})",
            path, req.uid, req.operation, target, reason
        ),
        Ok(Verdict::Patched(patch)) => info!(
            "{} {} {:?} {}: patched with {} operation(s)",
            path,
            req.uid,
            req.operation,
            target,
            patch.0.len()
        ),
        Ok(Verdict::Denied(reason)) => warn!(
            "{} {} {:?} {}: denied ({})",
            path, req.uid, req.operation, target, reason
        ),
        Err(e) => error!(
            "{} {} {:?} {}: error {} ({})",
            path,
            req.uid,
            req.operation,
            target,
            e.code(),
            e
        ),
    }
}

/// Resolves once `true` is published, or the sender is gone.
pub async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

/// Serve admission routes over TLS until shutdown, draining in-flight requests.
pub async fn serve(
    cfg: &Config,
    creds: &CredentialStore,
    store: Arc<dyn ClusterStore>,
    rx: watch::Receiver<bool>,
) {
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.tls_port));
    let (addr, server) = warp::serve(routes(store))
        .tls()
        .cert_path(creds.cert_path())
        .key_path(creds.key_path())
        .bind_with_graceful_shutdown(addr, wait_for_shutdown(rx));
    info!("admission server listening on https://{}", addr);
    server.await;
    info!("admission server stopped");
}

/// Serve the health check on its own port. A bind failure is logged, not fatal.
pub async fn serve_health(port: u16, rx: watch::Receiver<bool>) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    match warp::serve(health()).try_bind_with_graceful_shutdown(addr, wait_for_shutdown(rx)) {
        Ok((addr, server)) => {
            info!("health server listening on http://{}", addr);
            server.await;
        }
        Err(e) => error!("health server failed on {}: {}", addr, e),
    }
}
