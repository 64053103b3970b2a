//! Error types for certificate management.
//!
//! Every error here is `Clone`: a failed issuance is shared by all callers
//! that were waiting on it, so each waiter receives its own copy.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use autocert_config::ConfigurationError;

use crate::acme::AcmeError;

/// An identifier policy description could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("unable to create a policy check based upon '{0}'")]
    Unhandled(String),
}

/// Failures reading or writing persisted certificates and account keys.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("storage I/O failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("failed to serialize entry '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: Arc<serde_json::Error>,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

/// Certificate material that cannot be parsed or loaded into TLS.
#[derive(Debug, Clone, Error)]
pub enum CertificateError {
    #[error("no certificates found in PEM data")]
    EmptyChain,

    #[error("no private key found in PEM data")]
    MissingKey,

    #[error("invalid PEM data: {0}")]
    Pem(String),

    #[error("invalid X.509 certificate: {0}")]
    X509(String),

    #[error("certificate entry has no identifiers")]
    NoIdentifiers,

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Errors returned by [`Manager`](crate::Manager) operations.
#[derive(Debug, Clone, Error)]
pub enum AutoCertError {
    /// The identifier set may not be certified, either because the ACME
    /// server rejected it or because every name was denied and there is no
    /// fallback identity to degrade to.
    #[error("identifiers not allowed: {}", .0.join(", "))]
    IdentifierNotAllowed(Vec<String>),

    #[error(transparent)]
    Acme(#[from] AcmeError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error("terms of service {} were not accepted by any configured acceptor", .0.as_deref().unwrap_or("(none advertised)"))]
    TermsOfServiceRejected(Option<String>),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Identifier(#[from] IdentifierError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unhandled_message() {
        let err = IdentifierError::Unhandled("bad/desc".to_string());
        assert_eq!(
            err.to_string(),
            "unable to create a policy check based upon 'bad/desc'"
        );
    }

    #[test]
    fn test_not_allowed_lists_identifiers() {
        let err = AutoCertError::IdentifierNotAllowed(vec![
            "a.example.com".to_string(),
            "b.example.com".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "identifiers not allowed: a.example.com, b.example.com"
        );
    }

    #[test]
    fn test_tos_rejected_without_uri() {
        let err = AutoCertError::TermsOfServiceRejected(None);
        assert!(err.to_string().contains("(none advertised)"));
    }
}
