//! ACME client errors

use thiserror::Error;

/// Errors raised while talking to an ACME server
///
/// Messages are captured as strings so the error can be cloned and handed to
/// every caller waiting on the same issuance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcmeError {
    /// Directory metadata could not be fetched
    #[error("failed to fetch ACME directory: {0}")]
    Directory(String),

    /// Account registration or lookup failed
    #[error("ACME account registration failed: {0}")]
    Account(String),

    /// Stored account credentials could not be decoded
    #[error("invalid ACME account credentials: {0}")]
    Credentials(String),

    /// The external account binding key is malformed
    #[error("invalid external account binding: {0}")]
    ExternalAccountBinding(String),

    /// The order could not be created
    #[error("failed to create ACME order: {0}")]
    Order(String),

    /// An authorization could not be completed
    #[error("authorization for '{identifier}' failed: {message}")]
    Authorization { identifier: String, message: String },

    /// The order could not be finalized or the chain downloaded
    #[error("failed to finalize ACME order: {0}")]
    Finalize(String),

    /// The order did not reach the expected state in time
    #[error("timed out waiting for ACME order to become {0}")]
    Timeout(String),

    /// The server refused to issue for one of the identifiers
    #[error("ACME server rejected identifier: {0}")]
    RejectedIdentifier(String),

    /// The identifier kind cannot be ordered by this client
    #[error("unsupported identifier '{0}'")]
    UnsupportedIdentifier(String),
}
