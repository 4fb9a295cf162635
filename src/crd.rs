use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const CERT_MANAGER_GROUP: &str = "cert-manager.io";
pub const CLUSTER_ISSUER_KIND: &str = "ClusterIssuer";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "cert-manager.io", version = "v1", kind = "ClusterIssuer")]
pub struct IssuerSpec {
    #[serde(rename = "selfSigned", skip_serializing_if = "Option::is_none")]
    pub self_signed: Option<SelfSignedIssuer>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<CaIssuer>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct SelfSignedIssuer {}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct CaIssuer {
    #[serde(rename = "secretName")]
    pub secret_name: String,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Certificate",
    namespaced
)]
pub struct CertificateSpec {
    #[serde(rename = "commonName")]
    pub common_name: String,

    #[serde(rename = "dnsNames", skip_serializing_if = "Vec::is_empty", default)]
    pub dns_names: Vec<String>,

    #[serde(rename = "isCA", skip_serializing_if = "std::ops::Not::not", default)]
    pub is_ca: bool,

    /// Go duration string, e.g. `87600h`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    #[serde(rename = "privateKey", skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PrivateKey>,

    #[serde(rename = "issuerRef")]
    pub issuer_ref: IssuerRef,

    #[serde(rename = "secretName")]
    pub secret_name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct IssuerRef {
    pub group: String,
    pub kind: String,
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct PrivateKey {
    pub algorithm: String,
    pub size: i32,
}

impl ClusterIssuer {
    /// Root issuer that signs its own certificates.
    pub fn self_signed(name: &str) -> Self {
        ClusterIssuer::new(
            name,
            IssuerSpec {
                self_signed: Some(SelfSignedIssuer {}),
                ca: None,
            },
        )
    }

    /// Intermediate issuer backed by the key pair stored in `secret_name`.
    pub fn ca_backed(name: &str, secret_name: &str) -> Self {
        ClusterIssuer::new(
            name,
            IssuerSpec {
                self_signed: None,
                ca: Some(CaIssuer {
                    secret_name: secret_name.to_string(),
                }),
            },
        )
    }
}

impl IssuerRef {
    pub fn cluster_issuer(name: &str) -> Self {
        Self {
            group: CERT_MANAGER_GROUP.to_string(),
            kind: CLUSTER_ISSUER_KIND.to_string(),
            name: name.to_string(),
        }
    }
}

/// Formats a duration the way cert-manager expects it, in whole hours.
pub fn go_duration(d: std::time::Duration) -> String {
    format!("{}h", d.as_secs() / 3600)
}
