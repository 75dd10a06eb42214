//! Sync Error Taxonomy
//!
//! Every failure surfaced to the caller is one of these kinds; leaf API
//! calls classify their own failures at the call site and nothing is
//! retried.

use thiserror::Error;

/// Errors that can occur while syncing a certificate
#[derive(Debug, Error)]
pub enum SyncError {
    /// Kube configuration is unusable (unknown context, unreadable config)
    #[error("{0}")]
    Configuration(String),

    /// A cluster-side object is missing ("certificate" or "certificate secret")
    #[error("cert-manager {0} not found")]
    NotFound(&'static str),

    /// The Azion auth endpoint rejected the credentials
    #[error("Invalid Azion credentials")]
    InvalidCredentials,

    /// The Azion auth call itself failed
    #[error("Cannot authenticate to Azion. Reason: {0}")]
    Authentication(String),

    /// The Azion certificate create call failed
    #[error("Cannot create certificate in Azion. Reason: {0}")]
    Create(String),

    /// The Azion certificate update call failed
    #[error("Cannot update certificate \"{id}\" in Azion. Reason: {reason}")]
    Update { id: u64, reason: String },

    /// Unexpected failure talking to either remote system
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_messages_name_the_missing_object() {
        assert_eq!(
            SyncError::NotFound("certificate").to_string(),
            "cert-manager certificate not found"
        );
        assert_eq!(
            SyncError::NotFound("certificate secret").to_string(),
            "cert-manager certificate secret not found"
        );
    }

    #[test]
    fn update_message_carries_the_certificate_id() {
        let err = SyncError::Update {
            id: 7,
            reason: "server exploded".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot update certificate \"7\" in Azion. Reason: server exploded"
        );
    }
}
