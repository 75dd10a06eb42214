//! Sync Workflow
//!
//! Fetches the certificate material from the cluster, then upserts it
//! into Azion. Strictly sequential; the first failure aborts the run.

use tracing::info;

use crate::azion::{AzionClient, Credentials};
use crate::cert_manager::CertManagerSource;
use crate::error::SyncError;

/// Which cert-manager certificate to read, and where
#[derive(Debug, Clone)]
pub struct ClusterCertificateRef {
    pub name: String,
    /// Defaults to the kube context's namespace
    pub namespace: Option<String>,
    /// Defaults to the kubeconfig's current context
    pub context: Option<String>,
}

/// Copy one certificate from the cluster to Azion and return the id of
/// the Azion digital certificate.
pub async fn run(
    source: &CertManagerSource,
    sink: &AzionClient,
    certificate: &ClusterCertificateRef,
    azion_name: &str,
    credentials: &Credentials,
) -> Result<u64, SyncError> {
    info!(certificate = %certificate.name, "Fetching certificate material from the cluster");
    let data = source
        .fetch(
            &certificate.name,
            certificate.namespace.as_deref(),
            certificate.context.as_deref(),
        )
        .await?;

    info!(name = %azion_name, "Syncing certificate to Azion");
    let id = sink.upsert_certificate(azion_name, &data, credentials).await?;

    info!(id, "Certificate synced");
    Ok(id)
}
