//! Admission decisions for pods.
//!
//! The mutating path stamps every created or updated pod with the policy label.
//! The validating path refuses deletion of pods labelled `allow-delete=false`,
//! and refuses it as well whenever the pod cannot be looked up.

use json_patch::Patch;
use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, Operation};
use kube::core::DynamicObject;
use kube::Resource;
use serde_json::{json, Value};

use crate::client::ClusterStore;
use crate::error::AdmissionError;

pub const POLICY_LABEL: &str = "k8s-webhook";
pub const POLICY_VALUE: &str = "test";
pub const DELETE_GUARD_LABEL: &str = "allow-delete";
pub const DELETE_GUARD_VALUE: &str = "false";

const SKIPPED: &str = "operation not applicable, skipped";

/// Outcome of a single admission request.
#[derive(Clone, Debug)]
pub enum Verdict {
    Allowed(String),
    Denied(String),
    /// Allowed once the JSON patch is applied.
    Patched(Patch),
}

/// Value of label `key` on `obj`, if set.
pub fn label_value<'a, K: Resource>(obj: &'a K, key: &str) -> Option<&'a str> {
    obj.meta().labels.as_ref()?.get(key).map(String::as_str)
}

pub fn mutate(req: &AdmissionRequest<DynamicObject>) -> Result<Verdict, AdmissionError> {
    if !matches!(req.operation, Operation::Create | Operation::Update) {
        return Ok(Verdict::Allowed(SKIPPED.to_string()));
    }

    let obj = req.object.as_ref().ok_or(AdmissionError::MissingObject)?;
    let pod = decode_pod(obj)?;

    if label_value(&pod, POLICY_LABEL) == Some(POLICY_VALUE) {
        return Ok(Verdict::Allowed(format!(
            "pod labels {}={} already present, skipped",
            POLICY_LABEL, POLICY_VALUE
        )));
    }

    label_patch(&pod, POLICY_LABEL, POLICY_VALUE).map(Verdict::Patched)
}

pub async fn validate<S>(req: &AdmissionRequest<DynamicObject>, store: &S) -> Verdict
where
    S: ClusterStore + ?Sized,
{
    if req.operation != Operation::Delete {
        return Verdict::Allowed(SKIPPED.to_string());
    }

    let namespace = match req.namespace.as_deref() {
        Some(ns) => ns,
        None => return Verdict::Denied("lookup failed: request carries no namespace".to_string()),
    };
    let pod = match store.get_pod(namespace, &req.name).await {
        Ok(pod) => pod,
        Err(e) => {
            warn!("get pod {}/{} failed: {}", namespace, req.name, e);
            return Verdict::Denied(format!("lookup failed: {}", e));
        }
    };

    if label_value(&pod, DELETE_GUARD_LABEL) == Some(DELETE_GUARD_VALUE) {
        info!(
            "pod {}/{} can not be deleted with label {}={}",
            namespace, req.name, DELETE_GUARD_LABEL, DELETE_GUARD_VALUE
        );
        return Verdict::Denied(format!(
            "pod is labelled {}={}, deletion not allowed",
            DELETE_GUARD_LABEL, DELETE_GUARD_VALUE
        ));
    }
    Verdict::Allowed(format!(
        "pod is not labelled {}={}, can be deleted",
        DELETE_GUARD_LABEL, DELETE_GUARD_VALUE
    ))
}

/// Turn an outcome into the response for `req`, echoing its uid.
pub fn respond(
    req: &AdmissionRequest<DynamicObject>,
    outcome: Result<Verdict, AdmissionError>,
) -> AdmissionResponse {
    let mut res = AdmissionResponse::from(req);
    match outcome {
        Ok(Verdict::Allowed(reason)) => {
            res.result.message = reason;
            res
        }
        Ok(Verdict::Denied(reason)) => res.deny(reason),
        Ok(Verdict::Patched(patch)) => match res.clone().with_patch(patch) {
            Ok(patched) => patched,
            Err(e) => errored(res, &AdmissionError::PatchBuild(e.to_string())),
        },
        Err(e) => errored(res, &e),
    }
}

fn errored(res: AdmissionResponse, e: &AdmissionError) -> AdmissionResponse {
    let mut res = res.deny(e.to_string());
    res.result.code = e.code();
    res
}

fn decode_pod(obj: &DynamicObject) -> Result<Pod, AdmissionError> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(AdmissionError::Decode)
}

/// Patch adding `key=value` to the pod labels, creating the map first when absent.
fn label_patch(pod: &Pod, key: &str, value: &str) -> Result<Patch, AdmissionError> {
    let mut ops = Vec::with_capacity(2);
    if pod.metadata.labels.is_none() {
        ops.push(json!({ "op": "add", "path": "/metadata/labels", "value": {} }));
    }
    ops.push(json!({
        "op": "add",
        "path": format!("/metadata/labels/{}", escape_pointer(key)),
        "value": value,
    }));
    serde_json::from_value(Value::Array(ops)).map_err(|e| AdmissionError::PatchBuild(e.to_string()))
}

// RFC 6901
fn escape_pointer(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}
