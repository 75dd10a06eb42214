//! Azion Certificate Sync Library
//!
//! Copies a TLS certificate managed by cert-manager in a Kubernetes
//! cluster into the Azion digital certificate store.

pub mod azion;
pub mod cert_manager;
pub mod error;
pub mod sync;

pub use azion::{AzionClient, Credentials};
pub use cert_manager::{CertManagerSource, CertificateData};
pub use error::SyncError;
pub use sync::ClusterCertificateRef;
