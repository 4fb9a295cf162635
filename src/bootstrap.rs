//! Trust bootstrap against cert-manager.
//!
//! Provisions a self-signed root ClusterIssuer, a CA certificate issued by it,
//! a CA-backed intermediate ClusterIssuer and finally the serving certificate
//! for the webhook service. cert-manager issues asynchronously, so the CA
//! secret is polled with bounded backoff before the intermediate issuer is
//! created, and the serving secret likewise before its key pair is copied
//! into the [`CredentialStore`].

use k8s_openapi::api::core::v1::Secret;
use std::time::Duration;
use tokio::time::Instant;

use crate::client::{full_name, ClusterStore};
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::crd::{go_duration, Certificate, CertificateSpec, ClusterIssuer, IssuerRef, PrivateKey};
use crate::error::{BootstrapError, StoreError};

pub const TLS_CRT: &str = "tls.crt";
pub const TLS_KEY: &str = "tls.key";
pub const CA_CRT: &str = "ca.crt";

pub struct Bootstrap<'a, S: ClusterStore + ?Sized> {
    store: &'a S,
    cfg: &'a Config,
}

impl<'a, S: ClusterStore + ?Sized> Bootstrap<'a, S> {
    pub fn new(store: &'a S, cfg: &'a Config) -> Self {
        Self { store, cfg }
    }

    /// Whether cert-manager's custom resources are installed.
    pub async fn crd_present(&self) -> Result<bool, BootstrapError> {
        let crd = &self.cfg.issuance.required_crd;
        self.store
            .crd_exists(crd)
            .await
            .map_err(|source| BootstrapError::CrdCheck {
                crd: crd.clone(),
                source,
            })
    }

    /// Provision the certificate chain and write the serving key pair to `creds`.
    ///
    /// Safe to run on every start: objects that already exist are left as they are.
    pub async fn run(&self, creds: &CredentialStore) -> Result<(), BootstrapError> {
        if !self.crd_present().await? {
            return Err(BootstrapError::CrdMissing(
                self.cfg.issuance.required_crd.clone(),
            ));
        }

        let iss = &self.cfg.issuance;
        self.create_issuer(ClusterIssuer::self_signed(&iss.root_issuer))
            .await?;
        self.create_certificate(self.ca_certificate()).await?;
        // the CA-backed issuer is only usable once its key pair is issued
        self.wait_for_material(&iss.ca_namespace, &iss.ca_secret, &[TLS_CRT, TLS_KEY])
            .await?;
        self.create_issuer(ClusterIssuer::ca_backed(
            &iss.intermediate_issuer,
            &iss.ca_secret,
        ))
        .await?;
        self.create_certificate(self.leaf_certificate()).await?;

        let secret = self
            .wait_for_material(&self.cfg.service_namespace, &iss.tls_secret, &[TLS_CRT, TLS_KEY])
            .await?;
        let crt = secret_field(&secret, TLS_CRT).unwrap_or_default();
        let key = secret_field(&secret, TLS_KEY).unwrap_or_default();
        creds.store(crt, key).await
    }

    /// Read `ca.crt` from the named secret.
    pub async fn ca_bundle(&self, name: &str, namespace: &str) -> Result<Vec<u8>, BootstrapError> {
        let secret = self
            .store
            .get_secret(namespace, name)
            .await
            .map_err(|source| BootstrapError::Lookup {
                namespace: namespace.to_string(),
                name: name.to_string(),
                source,
            })?
            .ok_or_else(|| BootstrapError::Lookup {
                namespace: namespace.to_string(),
                name: name.to_string(),
                source: StoreError::NotFound {
                    kind: "secret",
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                },
            })?;
        secret_field(&secret, CA_CRT)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| BootstrapError::FieldMissing {
                namespace: namespace.to_string(),
                name: name.to_string(),
                field: CA_CRT,
            })
    }

    fn ca_certificate(&self) -> Certificate {
        let iss = &self.cfg.issuance;
        let mut cert = Certificate::new(
            &iss.ca_certificate,
            CertificateSpec {
                common_name: iss.ca_certificate.clone(),
                is_ca: true,
                private_key: Some(PrivateKey {
                    algorithm: "ECDSA".to_string(),
                    size: 256,
                }),
                issuer_ref: IssuerRef::cluster_issuer(&iss.root_issuer),
                secret_name: iss.ca_secret.clone(),
                ..Default::default()
            },
        );
        cert.metadata.namespace = Some(iss.ca_namespace.clone());
        cert
    }

    fn leaf_certificate(&self) -> Certificate {
        let iss = &self.cfg.issuance;
        let mut cert = Certificate::new(
            &iss.leaf_certificate,
            CertificateSpec {
                common_name: self.cfg.service_dns_name.clone(),
                dns_names: vec![self.cfg.service_dns_name.clone()],
                duration: Some(go_duration(iss.leaf_validity)),
                issuer_ref: IssuerRef::cluster_issuer(&iss.intermediate_issuer),
                secret_name: iss.tls_secret.clone(),
                ..Default::default()
            },
        );
        cert.metadata.namespace = Some(self.cfg.service_namespace.clone());
        cert
    }

    async fn create_issuer(&self, issuer: ClusterIssuer) -> Result<(), BootstrapError> {
        let name = full_name(&issuer);
        let outcome = self
            .store
            .create_cluster_issuer(&issuer)
            .await
            .map_err(|source| BootstrapError::Create {
                kind: "ClusterIssuer",
                name: name.clone(),
                source,
            })?;
        outcome.log("ClusterIssuer", &name);
        Ok(())
    }

    async fn create_certificate(&self, cert: Certificate) -> Result<(), BootstrapError> {
        let name = full_name(&cert);
        let outcome = self
            .store
            .create_certificate(&cert)
            .await
            .map_err(|source| BootstrapError::Create {
                kind: "Certificate",
                name: name.clone(),
                source,
            })?;
        outcome.log("Certificate", &name);
        Ok(())
    }

    /// Poll until the secret holds every one of `fields`, non-empty.
    async fn wait_for_material(
        &self,
        namespace: &str,
        name: &str,
        fields: &[&'static str],
    ) -> Result<Secret, BootstrapError> {
        let wait = &self.cfg.wait;
        let deadline = Instant::now() + wait.timeout;
        let mut delay = wait.initial_delay;
        let mut missing: Option<&'static str> = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let found = match tokio::time::timeout(remaining, self.store.get_secret(namespace, name)).await {
                Ok(found) => found.map_err(|source| BootstrapError::Lookup {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    source,
                })?,
                Err(_) => return Err(timeout_error(namespace, name, missing, wait.timeout)),
            };
            match found {
                Some(secret) => match first_missing(&secret, fields) {
                    None => {
                        info!("secret {}/{} is ready", namespace, name);
                        return Ok(secret);
                    }
                    Some(field) => {
                        debug!("secret {}/{} has no {} yet", namespace, name, field);
                        missing = Some(field);
                    }
                },
                None => debug!("secret {}/{} not issued yet", namespace, name),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(timeout_error(namespace, name, missing, wait.timeout));
            }
            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = wait.next_delay(delay);
        }
    }
}

fn timeout_error(
    namespace: &str,
    name: &str,
    missing: Option<&'static str>,
    waited: Duration,
) -> BootstrapError {
    match missing {
        Some(field) => BootstrapError::MaterialNotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
            field,
        },
        None => BootstrapError::Timeout {
            namespace: namespace.to_string(),
            name: name.to_string(),
            waited,
        },
    }
}

fn secret_field<'s>(secret: &'s Secret, field: &str) -> Option<&'s [u8]> {
    secret
        .data
        .as_ref()?
        .get(field)
        .map(|b| b.0.as_slice())
        .filter(|b| !b.is_empty())
}

fn first_missing(secret: &Secret, fields: &[&'static str]) -> Option<&'static str> {
    fields
        .iter()
        .copied()
        .find(|field| secret_field(secret, field).is_none())
}
