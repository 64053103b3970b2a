//! Automatic TLS certificates over ACME
//!
//! `autocert` provisions, caches and renews certificates for a TLS server:
//!
//! - [`IdentifierPolicy`] decides which requested names may be certified and
//!   derives a fallback identity when none are
//! - [`Manager`] caches certificates by identifier set, issues missing or
//!   expiring ones through an [`AcmeClient`], and guarantees at most one
//!   issuance per identifier set at a time
//! - [`ManagedCertificate`] exposes an issued certificate and a memoized
//!   rustls [`ServerConfig`](rustls::ServerConfig)
//! - [`SniAcceptor`] resolves each connection's SNI name to a certificate
//!   during the handshake
//! - [`RenewalScheduler`] re-checks cached certificates in the background
//!
//! # Example
//!
//! ```no_run
//! use autocert::{ConfigParams, SniAcceptor, TermsOfServiceAcceptor};
//!
//! # async fn serve() -> Result<(), Box<dyn std::error::Error>> {
//! let acceptor = SniAcceptor::from_params(ConfigParams {
//!     name: Some("edge".to_string()),
//!     allow_identifiers: Some(vec!["*.example.com".to_string()]),
//!     tos_acceptors: Some(vec![TermsOfServiceAcceptor::any()]),
//!     ..Default::default()
//! })?;
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:443").await?;
//! let (stream, _) = listener.accept().await?;
//! let tls = acceptor.accept(stream).await?;
//! # drop(tls);
//! # Ok(())
//! # }
//! ```

pub mod acme;
pub mod certificate;
pub mod errors;
mod flight;
pub mod manager;
pub mod policy;
pub mod scheduler;
pub mod sni;
pub mod storage;

pub use acme::{AccountKey, AcmeClient, AcmeError, ChallengeStore, InstantAcmeClient};
pub use certificate::{CacheEntry, ManagedCertificate};
pub use errors::{AutoCertError, CertificateError, IdentifierError, StorageError};
pub use manager::Manager;
pub use policy::{IdentifierPolicy, PolicyCheck};
pub use scheduler::{RenewalReport, RenewalScheduler};
pub use sni::{AcceptError, SetupError, SniAcceptor};

pub use autocert_config::{
    AcmeEnvironment, ConfigField, ConfigParams, Configuration, ConfigurationError,
    ExternalAccountBinding, TermsOfServiceAcceptor,
};
