use std::path::PathBuf;
use std::time::Duration;

/// Namespace the webhooks apply to when none are given on the command line.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Runtime configuration, built once in `main` and handed to every stage.
#[derive(Clone, Debug)]
pub struct Config {
    /// Namespaces the webhook registrations select.
    pub namespaces: Vec<String>,
    /// In-cluster DNS name of the webhook service, e.g. `pod-webhook.default.svc`.
    pub service_dns_name: String,
    pub service_namespace: String,
    pub tls_port: u16,
    pub health_port: u16,
    pub credentials: CredentialsConfig,
    pub issuance: IssuanceConfig,
    pub wait: WaitConfig,
}

/// Where the issued key pair is copied for the TLS listener.
#[derive(Clone, Debug)]
pub struct CredentialsConfig {
    pub dir: PathBuf,
    pub cert_file: String,
    pub key_file: String,
}

/// Names of the cert-manager objects created at bootstrap.
#[derive(Clone, Debug)]
pub struct IssuanceConfig {
    /// Custom resource definition that must be installed before bootstrap.
    pub required_crd: String,
    pub root_issuer: String,
    pub ca_certificate: String,
    /// cert-manager's cluster resource namespace, where ClusterIssuers look up CA secrets.
    pub ca_namespace: String,
    pub ca_secret: String,
    pub intermediate_issuer: String,
    pub leaf_certificate: String,
    pub tls_secret: String,
    pub leaf_validity: Duration,
}

/// Bounded exponential backoff used while waiting for issued material.
#[derive(Clone, Debug)]
pub struct WaitConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: u32,
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespaces: vec![DEFAULT_NAMESPACE.to_string()],
            service_dns_name: "pod-webhook.default.svc".to_string(),
            service_namespace: "default".to_string(),
            tls_port: 9443,
            health_port: 8080,
            credentials: CredentialsConfig::default(),
            issuance: IssuanceConfig::default(),
            wait: WaitConfig::default(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            dir: home.join("k8s-tls"),
            cert_file: "cert.crt".to_string(),
            key_file: "key.crt".to_string(),
        }
    }
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            required_crd: "certificates.cert-manager.io".to_string(),
            root_issuer: "selfsigned-issuer".to_string(),
            ca_certificate: "selfsigned-ca".to_string(),
            ca_namespace: "cert-manager".to_string(),
            ca_secret: "root-ca-secret".to_string(),
            intermediate_issuer: "webhook-issuer".to_string(),
            leaf_certificate: "webhook-cert".to_string(),
            tls_secret: "webhook-tls".to_string(),
            leaf_validity: Duration::from_secs(10 * 365 * 24 * 60 * 60),
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            factor: 2,
            timeout: Duration::from_secs(180),
        }
    }
}

impl Config {
    /// Default configuration scoped to the given namespaces.
    pub fn with_namespaces<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            namespaces: normalize_namespaces(namespaces),
            ..Self::default()
        }
    }

    /// Webhook configuration and service name: the DNS name up to the first `.`.
    pub fn service_name(&self) -> &str {
        self.service_dns_name
            .split('.')
            .next()
            .unwrap_or(&self.service_dns_name)
    }

    pub fn cert_path(&self) -> PathBuf {
        self.credentials.dir.join(&self.credentials.cert_file)
    }

    pub fn key_path(&self) -> PathBuf {
        self.credentials.dir.join(&self.credentials.key_file)
    }
}

impl WaitConfig {
    /// Delay to sleep after `delay`, capped at `max_delay`.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        delay.saturating_mul(self.factor).min(self.max_delay)
    }
}

fn normalize_namespaces<I, S>(namespaces: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for ns in namespaces {
        let ns = ns.as_ref().trim();
        if !ns.is_empty() && !out.iter().any(|n| n == ns) {
            out.push(ns.to_string());
        }
    }
    if out.is_empty() {
        out.push(DEFAULT_NAMESPACE.to_string());
    }
    out
}
