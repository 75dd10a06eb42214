//! cert-manager Certificate Source
//!
//! Reads a cert-manager `Certificate` custom resource and its backing
//! TLS secret out of a Kubernetes cluster. The kube client for each
//! requested context is built once and cached for the process lifetime.

use std::collections::{BTreeMap, HashMap};

use anyhow::anyhow;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::DynamicObject;
use kube::{Api, Client, Config};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SyncError;

/// Decoded PEM material of a TLS certificate, as stored under the
/// `tls.crt` / `tls.key` entries of a cert-manager secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateData {
    pub crt: String,
    pub key: String,
}

/// A ready-to-use handle on one kube context
#[derive(Clone)]
struct ClusterContext {
    client: Client,
    namespace: String,
}

/// Source of certificate material, with a per-context client cache
pub struct CertManagerSource {
    contexts: Mutex<HashMap<String, ClusterContext>>,
}

impl Default for CertManagerSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CertManagerSource {
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the decoded certificate material for a named cert-manager
    /// certificate.
    ///
    /// `namespace` defaults to the context's namespace (or `"default"`),
    /// `context` defaults to the kubeconfig's current context.
    pub async fn fetch(
        &self,
        name: &str,
        namespace: Option<&str>,
        context: Option<&str>,
    ) -> Result<CertificateData, SyncError> {
        if name.is_empty() {
            return Err(SyncError::Configuration(
                "cert-manager certificate name must not be empty".to_string(),
            ));
        }

        let cluster = self.cluster_context(context).await?;
        let namespace = namespace.unwrap_or(&cluster.namespace);

        debug!(certificate = %name, namespace = %namespace, "Looking up cert-manager certificate");
        let certificate = get_certificate(&cluster.client, name, namespace)
            .await?
            .ok_or(SyncError::NotFound("certificate"))?;

        let secret_name = certificate
            .data
            .pointer("/spec/secretName")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                SyncError::Transport(anyhow!(
                    "cert-manager certificate \"{name}\" has no spec.secretName"
                ))
            })?
            .to_string();

        debug!(secret = %secret_name, namespace = %namespace, "Reading backing TLS secret");
        let secret = get_secret(&cluster.client, &secret_name, namespace)
            .await?
            .ok_or(SyncError::NotFound("certificate secret"))?;

        certificate_data_from_secret(&secret, &secret_name)
    }

    /// Resolve (and memoize) the client + default namespace for a context.
    /// Cache key is the requested context name, empty for the current one.
    async fn cluster_context(&self, context: Option<&str>) -> Result<ClusterContext, SyncError> {
        let key = context.unwrap_or_default().to_string();
        let mut cache = self.contexts.lock().await;
        if let Some(cluster) = cache.get(&key) {
            return Ok(cluster.clone());
        }

        let cluster = ClusterContext::load(context).await?;
        cache.insert(key, cluster.clone());
        Ok(cluster)
    }
}

impl ClusterContext {
    async fn load(context: Option<&str>) -> Result<Self, SyncError> {
        let kubeconfig = Kubeconfig::read()
            .map_err(|e| SyncError::Configuration(format!("Cannot load kube config: {e}")))?;
        let (name, namespace) = resolve_context(&kubeconfig, context)?;

        let options = KubeConfigOptions {
            context: Some(name.clone()),
            ..Default::default()
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| SyncError::Configuration(format!("Invalid kube context \"{name}\": {e}")))?;
        let client =
            Client::try_from(config).map_err(|e| transport(e, "Failed to create kube client"))?;

        Ok(Self { client, namespace })
    }
}

/// Pick the requested (or current) context out of a kubeconfig and return
/// its name together with its default namespace.
fn resolve_context(
    kubeconfig: &Kubeconfig,
    requested: Option<&str>,
) -> Result<(String, String), SyncError> {
    let name = requested
        .map(str::to_owned)
        .or_else(|| kubeconfig.current_context.clone())
        .ok_or_else(|| {
            SyncError::Configuration(
                "No kube context requested and no current context set".to_string(),
            )
        })?;

    let entry = kubeconfig
        .contexts
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| SyncError::Configuration(format!("Invalid kube context \"{name}\"")))?;

    let namespace = entry
        .context
        .as_ref()
        .and_then(|c| c.namespace.clone())
        .unwrap_or_else(|| "default".to_string());

    Ok((name, namespace))
}

/// Map a kube GET result so a 404 becomes `None` and every other failure
/// stays an error.
fn found<T>(result: Result<T, kube::Error>) -> Result<Option<T>, kube::Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(kube::Error::Api(status)) if status.code == 404 => Ok(None),
        Err(e) => Err(e),
    }
}

fn transport(error: impl Into<anyhow::Error>, message: &'static str) -> SyncError {
    SyncError::Transport(error.into().context(message))
}

/// API handle for `certificates.cert-manager.io/v1`
fn certificate_resource() -> kube::discovery::ApiResource {
    kube::discovery::ApiResource {
        group: "cert-manager.io".to_string(),
        version: "v1".to_string(),
        api_version: "cert-manager.io/v1".to_string(),
        kind: "Certificate".to_string(),
        plural: "certificates".to_string(),
    }
}

async fn get_certificate(
    client: &Client,
    name: &str,
    namespace: &str,
) -> Result<Option<DynamicObject>, SyncError> {
    let api: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), namespace, &certificate_resource());

    found(api.get(name).await)
        .map_err(|e| transport(e, "Failed to query the cert-manager certificate"))
}

async fn get_secret(
    client: &Client,
    name: &str,
    namespace: &str,
) -> Result<Option<Secret>, SyncError> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);

    found(api.get(name).await).map_err(|e| transport(e, "Failed to query the certificate secret"))
}

fn certificate_data_from_secret(secret: &Secret, name: &str) -> Result<CertificateData, SyncError> {
    let data = secret
        .data
        .as_ref()
        .ok_or_else(|| SyncError::Transport(anyhow!("secret \"{name}\" has no data")))?;

    Ok(CertificateData {
        crt: secret_entry(data, name, "tls.crt")?,
        key: secret_entry(data, name, "tls.key")?,
    })
}

fn secret_entry(
    data: &BTreeMap<String, ByteString>,
    secret: &str,
    key: &str,
) -> Result<String, SyncError> {
    let value = data.get(key).ok_or_else(|| {
        SyncError::Transport(anyhow!("secret \"{secret}\" has no \"{key}\" entry"))
    })?;

    String::from_utf8(value.0.clone()).map_err(|_| {
        SyncError::Transport(anyhow!("secret \"{secret}\" entry \"{key}\" is not valid UTF-8"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kubeconfig(context_namespace: Option<&str>) -> Kubeconfig {
        let mut context = json!({"cluster": "prod", "user": "prod-admin"});
        if let Some(namespace) = context_namespace {
            context["namespace"] = json!(namespace);
        }
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Config",
            "current-context": "prod",
            "contexts": [{"name": "prod", "context": context}],
            "clusters": [{"name": "prod", "cluster": {"server": "https://kube.example.com"}}],
            "users": [{"name": "prod-admin", "user": {}}],
        }))
        .expect("valid kubeconfig fixture")
    }

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(
            serde_json::from_value(json!({
                "status": "Failure",
                "message": "boom",
                "reason": "TestReason",
                "code": code,
            }))
            .expect("valid error response fixture"),
        )
    }

    #[test]
    fn resolve_context_uses_the_declared_namespace() {
        let (name, namespace) = resolve_context(&kubeconfig(Some("edge")), Some("prod")).unwrap();
        assert_eq!(name, "prod");
        assert_eq!(namespace, "edge");
    }

    #[test]
    fn resolve_context_falls_back_to_the_default_namespace() {
        let (_, namespace) = resolve_context(&kubeconfig(None), None).unwrap();
        assert_eq!(namespace, "default");
    }

    #[test]
    fn resolve_context_defaults_to_the_current_context() {
        let (name, _) = resolve_context(&kubeconfig(Some("edge")), None).unwrap();
        assert_eq!(name, "prod");
    }

    #[test]
    fn resolve_context_rejects_an_unknown_context() {
        let err = resolve_context(&kubeconfig(None), Some("staging")).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
        assert!(err.to_string().contains("staging"));
    }

    #[test]
    fn a_404_is_reported_as_absent() {
        let result: Result<Option<()>, _> = found(Err(api_error(404)));
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn a_non_404_failure_stays_an_error() {
        let result: Result<Option<()>, _> = found(Err(api_error(500)));
        assert!(result.is_err());
    }

    #[test]
    fn a_successful_lookup_is_passed_through() {
        let result = found(Ok(7));
        assert!(matches!(result, Ok(Some(7))));
    }

    #[test]
    fn secret_entries_are_decoded_to_plaintext() {
        // Values are the base64 transport encoding of CRTDATA / KEYDATA.
        let secret: Secret = serde_json::from_value(json!({
            "metadata": {"name": "web-cert-tls"},
            "data": {
                "tls.crt": "Q1JUREFUQQ==",
                "tls.key": "S0VZREFUQQ==",
            },
        }))
        .unwrap();

        let data = certificate_data_from_secret(&secret, "web-cert-tls").unwrap();
        assert_eq!(data.crt, "CRTDATA");
        assert_eq!(data.key, "KEYDATA");
    }

    #[test]
    fn a_secret_without_a_key_entry_is_a_transport_failure() {
        let secret: Secret = serde_json::from_value(json!({
            "metadata": {"name": "web-cert-tls"},
            "data": {"tls.crt": "Q1JUREFUQQ=="},
        }))
        .unwrap();

        let err = certificate_data_from_secret(&secret, "web-cert-tls").unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
        assert!(err.to_string().contains("tls.key"));
    }
}
