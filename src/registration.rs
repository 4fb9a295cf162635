use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    ValidatingWebhook, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use k8s_openapi::ByteString;

use crate::bootstrap::Bootstrap;
use crate::client::ClusterStore;
use crate::config::Config;
use crate::error::RegistrationError;

pub const MUTATE_PATH: &str = "/webhook/mutate";
pub const VALIDATE_PATH: &str = "/webhook/validate";

/// Label the API server sets on every namespace with its own name.
const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";
const ADMISSION_REVIEW_VERSION: &str = "v1";
const SIDE_EFFECTS_NONE: &str = "None";

/// Declares the webhook configurations that route pod admission to this service.
pub struct Registrar<'a, S: ClusterStore + ?Sized> {
    store: &'a S,
    cfg: &'a Config,
}

impl<'a, S: ClusterStore + ?Sized> Registrar<'a, S> {
    pub fn new(store: &'a S, cfg: &'a Config) -> Self {
        Self { store, cfg }
    }

    pub async fn register_validating(&self, namespaces: &[String]) -> Result<(), RegistrationError> {
        let ca = self.ca_bundle().await?;
        let vwc = validating_configuration(self.cfg, namespaces, ca);
        let name = vwc.metadata.name.clone().unwrap_or_default();
        let outcome = self
            .store
            .create_validating_webhook(&vwc)
            .await
            .map_err(|source| RegistrationError::Create {
                kind: "ValidatingWebhookConfiguration",
                name: name.clone(),
                source,
            })?;
        outcome.log("validatingWebhookConfiguration", &name);
        Ok(())
    }

    pub async fn register_mutating(&self, namespaces: &[String]) -> Result<(), RegistrationError> {
        let ca = self.ca_bundle().await?;
        let mwc = mutating_configuration(self.cfg, namespaces, ca);
        let name = mwc.metadata.name.clone().unwrap_or_default();
        let outcome = self
            .store
            .create_mutating_webhook(&mwc)
            .await
            .map_err(|source| RegistrationError::Create {
                kind: "MutatingWebhookConfiguration",
                name: name.clone(),
                source,
            })?;
        outcome.log("mutatingWebhookConfiguration", &name);
        Ok(())
    }

    async fn ca_bundle(&self) -> Result<Vec<u8>, RegistrationError> {
        Bootstrap::new(self.store, self.cfg)
            .ca_bundle(&self.cfg.issuance.tls_secret, &self.cfg.service_namespace)
            .await
            .map_err(RegistrationError::CaBundle)
    }
}

/// Selects namespaces whose name is one of `namespaces`.
fn namespace_selector(namespaces: &[String]) -> LabelSelector {
    LabelSelector {
        match_expressions: Some(vec![LabelSelectorRequirement {
            key: NAMESPACE_NAME_LABEL.to_string(),
            operator: "In".to_string(),
            values: Some(namespaces.to_vec()),
        }]),
        match_labels: None,
    }
}

fn pod_rule(operations: &[&str]) -> RuleWithOperations {
    RuleWithOperations {
        api_groups: Some(vec!["".to_string()]),
        api_versions: Some(vec!["v1".to_string()]),
        operations: Some(operations.iter().map(|o| o.to_string()).collect()),
        resources: Some(vec!["pods".to_string()]),
        scope: None,
    }
}

fn client_config(cfg: &Config, path: &str, ca: Vec<u8>) -> WebhookClientConfig {
    WebhookClientConfig {
        ca_bundle: Some(ByteString(ca)),
        service: Some(ServiceReference {
            name: cfg.service_name().to_string(),
            namespace: cfg.service_namespace.clone(),
            path: Some(path.to_string()),
            port: Some(i32::from(cfg.tls_port)),
        }),
        url: None,
    }
}

fn metadata(cfg: &Config) -> ObjectMeta {
    ObjectMeta {
        name: Some(cfg.service_name().to_string()),
        ..Default::default()
    }
}

pub fn validating_configuration(
    cfg: &Config,
    namespaces: &[String],
    ca: Vec<u8>,
) -> ValidatingWebhookConfiguration {
    ValidatingWebhookConfiguration {
        metadata: metadata(cfg),
        webhooks: Some(vec![ValidatingWebhook {
            name: cfg.service_dns_name.clone(),
            admission_review_versions: vec![ADMISSION_REVIEW_VERSION.to_string()],
            client_config: client_config(cfg, VALIDATE_PATH, ca),
            namespace_selector: Some(namespace_selector(namespaces)),
            rules: Some(vec![pod_rule(&["DELETE"])]),
            side_effects: SIDE_EFFECTS_NONE.to_string(),
            ..Default::default()
        }]),
    }
}

pub fn mutating_configuration(
    cfg: &Config,
    namespaces: &[String],
    ca: Vec<u8>,
) -> MutatingWebhookConfiguration {
    MutatingWebhookConfiguration {
        metadata: metadata(cfg),
        webhooks: Some(vec![MutatingWebhook {
            name: cfg.service_dns_name.clone(),
            admission_review_versions: vec![ADMISSION_REVIEW_VERSION.to_string()],
            client_config: client_config(cfg, MUTATE_PATH, ca),
            namespace_selector: Some(namespace_selector(namespaces)),
            rules: Some(vec![pod_rule(&["UPDATE", "CREATE"])]),
            side_effects: SIDE_EFFECTS_NONE.to_string(),
            ..Default::default()
        }]),
    }
}
