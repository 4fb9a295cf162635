//! In-memory [`ClusterStore`] for tests.
//!
//! Mimics cert-manager's asynchronous issuance: once a Certificate targeting a
//! watched secret is created, the secret shows up only after a number of
//! lookups.

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::core::v1::{Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::core::ErrorResponse;
use kube::ResourceExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::client::{ClusterStore, Created};
use crate::crd::{Certificate, ClusterIssuer};
use crate::error::StoreError;

type Key = (String, String);

pub struct FakeStore {
    inner: Mutex<Inner>,
}

struct Inner {
    crds_installed: bool,
    failing_creates: bool,
    failing_lookups: bool,
    issuers: Vec<ClusterIssuer>,
    certificates: Vec<Certificate>,
    secrets: BTreeMap<Key, Secret>,
    issue_after: BTreeMap<Key, usize>,
    pending: BTreeMap<Key, usize>,
    validating: Vec<ValidatingWebhookConfiguration>,
    mutating: Vec<MutatingWebhookConfiguration>,
    pods: BTreeMap<Key, Pod>,
    pod_lookups: usize,
}

impl Default for FakeStore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                crds_installed: true,
                failing_creates: false,
                failing_lookups: false,
                issuers: Vec::new(),
                certificates: Vec::new(),
                secrets: BTreeMap::new(),
                issue_after: BTreeMap::new(),
                pending: BTreeMap::new(),
                validating: Vec::new(),
                mutating: Vec::new(),
                pods: BTreeMap::new(),
                pod_lookups: 0,
            }),
        }
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Server-side failure as the API server would report it.
fn injected() -> StoreError {
    StoreError::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: "injected failure".to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

/// Secret holding the given data fields.
pub fn tls_secret(name: &str, fields: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        data: Some(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// Pod with the given labels; `None` leaves the labels map unset.
pub fn pod(namespace: &str, name: &str, labels: Option<&[(&str, &str)]>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: labels.map(|l| {
                l.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// AdmissionReview envelope for pod `ns1/p1`.
pub fn review_json(operation: &str, object: Option<Value>) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "kind": { "group": "", "version": "v1", "kind": "Pod" },
            "resource": { "group": "", "version": "v1", "resource": "pods" },
            "requestKind": { "group": "", "version": "v1", "kind": "Pod" },
            "requestResource": { "group": "", "version": "v1", "resource": "pods" },
            "name": "p1",
            "namespace": "ns1",
            "operation": operation,
            "userInfo": { "username": "admin" },
            "object": object,
            "oldObject": null,
            "dryRun": false,
            "options": null
        }
    })
}

/// Pod `ns1/p1` as raw JSON.
pub fn pod_json(labels: Option<Value>) -> Value {
    let mut metadata = json!({ "name": "p1", "namespace": "ns1" });
    if let Some(labels) = labels {
        metadata["labels"] = labels;
    }
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": metadata,
        "spec": { "containers": [{ "name": "app", "image": "nginx" }] }
    })
}

impl FakeStore {
    pub fn without_crds(self) -> Self {
        self.inner.lock().unwrap().crds_installed = false;
        self
    }

    pub fn failing_creates(self) -> Self {
        self.inner.lock().unwrap().failing_creates = true;
        self
    }

    pub fn failing_lookups(self) -> Self {
        self.inner.lock().unwrap().failing_lookups = true;
        self
    }

    /// Issue `namespace/secret` after `lookups` misses once a Certificate targets it.
    pub fn issue_after(self, namespace: &str, secret: &str, lookups: usize) -> Self {
        self.inner
            .lock()
            .unwrap()
            .issue_after
            .insert(key(namespace, secret), lookups);
        self
    }

    pub fn put_secret(&self, namespace: &str, secret: Secret) {
        let name = secret.name_any();
        self.inner
            .lock()
            .unwrap()
            .secrets
            .insert(key(namespace, &name), secret);
    }

    pub fn put_pod(&self, pod: Pod) {
        let k = key(&pod.namespace().unwrap_or_default(), &pod.name_any());
        self.inner.lock().unwrap().pods.insert(k, pod);
    }

    pub fn issuers(&self) -> Vec<ClusterIssuer> {
        self.inner.lock().unwrap().issuers.clone()
    }

    pub fn certificates(&self) -> Vec<Certificate> {
        self.inner.lock().unwrap().certificates.clone()
    }

    pub fn validating(&self) -> Vec<ValidatingWebhookConfiguration> {
        self.inner.lock().unwrap().validating.clone()
    }

    pub fn mutating(&self) -> Vec<MutatingWebhookConfiguration> {
        self.inner.lock().unwrap().mutating.clone()
    }

    pub fn pod_lookups(&self) -> usize {
        self.inner.lock().unwrap().pod_lookups
    }
}

#[async_trait]
impl ClusterStore for FakeStore {
    async fn crd_exists(&self, _name: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().unwrap().crds_installed)
    }

    async fn create_cluster_issuer(&self, issuer: &ClusterIssuer) -> Result<Created, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_creates {
            return Err(injected());
        }
        if inner.issuers.iter().any(|i| i.name_any() == issuer.name_any()) {
            return Ok(Created::AlreadyExists);
        }
        inner.issuers.push(issuer.clone());
        Ok(Created::Created)
    }

    async fn create_certificate(&self, cert: &Certificate) -> Result<Created, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_creates {
            return Err(injected());
        }
        let ns = cert.namespace().unwrap_or_default();
        if inner
            .certificates
            .iter()
            .any(|c| c.name_any() == cert.name_any() && c.namespace().unwrap_or_default() == ns)
        {
            return Ok(Created::AlreadyExists);
        }
        let target = key(&ns, &cert.spec.secret_name);
        if let Some(lookups) = inner.issue_after.get(&target).copied() {
            inner.pending.insert(target, lookups);
        }
        inner.certificates.push(cert.clone());
        Ok(Created::Created)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_lookups {
            return Err(injected());
        }
        let k = key(namespace, name);
        if let Some(secret) = inner.secrets.get(&k) {
            return Ok(Some(secret.clone()));
        }
        match inner.pending.get(&k).copied() {
            Some(0) => {
                inner.pending.remove(&k);
                let secret = tls_secret(
                    name,
                    &[("tls.crt", "CERT"), ("tls.key", "KEY"), ("ca.crt", "CA")],
                );
                inner.secrets.insert(k, secret.clone());
                Ok(Some(secret))
            }
            Some(left) => {
                inner.pending.insert(k, left - 1);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn create_validating_webhook(
        &self,
        cfg: &ValidatingWebhookConfiguration,
    ) -> Result<Created, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_creates {
            return Err(injected());
        }
        if inner.validating.iter().any(|c| c.name_any() == cfg.name_any()) {
            return Ok(Created::AlreadyExists);
        }
        inner.validating.push(cfg.clone());
        Ok(Created::Created)
    }

    async fn create_mutating_webhook(
        &self,
        cfg: &MutatingWebhookConfiguration,
    ) -> Result<Created, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_creates {
            return Err(injected());
        }
        if inner.mutating.iter().any(|c| c.name_any() == cfg.name_any()) {
            return Ok(Created::AlreadyExists);
        }
        inner.mutating.push(cfg.clone());
        Ok(Created::Created)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.pod_lookups += 1;
        if inner.failing_lookups {
            return Err(injected());
        }
        inner
            .pods
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "pod",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}
