use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::core::v1::{Pod, Secret};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, PostParams},
    Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

use crate::crd::{Certificate, ClusterIssuer};
use crate::error::StoreError;

/// Result of a create-if-absent call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Created {
    Created,
    AlreadyExists,
}

impl Created {
    pub fn log(self, kind: &str, name: &str) {
        match self {
            Created::Created => info!("{} {} create success", kind, name),
            Created::AlreadyExists => info!("{} {} already exists", kind, name),
        }
    }
}

/// Operations this service needs from the cluster's object store.
///
/// Create calls are create-if-absent: an existing object of the same name is
/// reported as [`Created::AlreadyExists`] rather than an error.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Check that a custom resource definition is installed.
    async fn crd_exists(&self, name: &str) -> Result<bool, StoreError>;

    async fn create_cluster_issuer(&self, issuer: &ClusterIssuer) -> Result<Created, StoreError>;

    async fn create_certificate(&self, cert: &Certificate) -> Result<Created, StoreError>;

    /// Fetch a secret; `None` if it does not exist (yet).
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError>;

    async fn create_validating_webhook(
        &self,
        cfg: &ValidatingWebhookConfiguration,
    ) -> Result<Created, StoreError>;

    async fn create_mutating_webhook(
        &self,
        cfg: &MutatingWebhookConfiguration,
    ) -> Result<Created, StoreError>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError>;
}

#[derive(Clone)]
pub struct KubeApi {
    client: Client,
}

impl KubeApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Retrieve namespaced Kubernetes resource, `None` when absent.
    pub async fn get<T>(&self, namespace: &str, name: &str) -> Result<Option<T>, kube::Error>
    where
        T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        T::DynamicType: Default,
    {
        let api = Api::<T>::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }

    /// Create namespaced Kubernetes resource in the namespace of its metadata.
    pub async fn create<T>(&self, data: &T) -> Result<Created, kube::Error>
    where
        T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        T::DynamicType: Default,
    {
        let namespace = data.namespace().unwrap_or_else(|| "default".to_string());
        let api = Api::<T>::namespaced(self.client.clone(), &namespace);
        create_if_absent(&api, data).await
    }

    /// Create cluster scoped Kubernetes resource.
    pub async fn create_global<T>(&self, data: &T) -> Result<Created, kube::Error>
    where
        T: Resource + Clone + DeserializeOwned + Serialize + Debug,
        T::DynamicType: Default,
    {
        let api = Api::<T>::all(self.client.clone());
        create_if_absent(&api, data).await
    }
}

async fn create_if_absent<T>(api: &Api<T>, data: &T) -> Result<Created, kube::Error>
where
    T: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    match api.create(&PostParams::default(), data).await {
        Ok(o) => {
            debug!("created {}", o.name_any());
            Ok(Created::Created)
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(Created::AlreadyExists),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ClusterStore for KubeApi {
    async fn crd_exists(&self, name: &str) -> Result<bool, StoreError> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let found = crds.get_opt(name).await?;
        if found.is_some() {
            info!("found crd {}", name);
        }
        Ok(found.is_some())
    }

    async fn create_cluster_issuer(&self, issuer: &ClusterIssuer) -> Result<Created, StoreError> {
        Ok(self.create_global(issuer).await?)
    }

    async fn create_certificate(&self, cert: &Certificate) -> Result<Created, StoreError> {
        Ok(self.create(cert).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.get::<Secret>(namespace, name).await?)
    }

    async fn create_validating_webhook(
        &self,
        cfg: &ValidatingWebhookConfiguration,
    ) -> Result<Created, StoreError> {
        Ok(self.create_global(cfg).await?)
    }

    async fn create_mutating_webhook(
        &self,
        cfg: &MutatingWebhookConfiguration,
    ) -> Result<Created, StoreError> {
        Ok(self.create_global(cfg).await?)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError> {
        self.get::<Pod>(namespace, name)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "pod",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}

/// `namespace/name` of an object, for log lines.
pub fn full_name<K: Resource>(obj: &K) -> String {
    match obj.meta().namespace.as_deref() {
        Some(ns) => format!("{}/{}", ns, obj.name_any()),
        None => obj.name_any(),
    }
}
