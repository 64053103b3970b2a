//! ACME client seam
//!
//! The [`Manager`](crate::Manager) drives issuance through the [`AcmeClient`]
//! trait so the protocol implementation can be swapped out. The production
//! implementation is [`InstantAcmeClient`], built on `instant-acme`.
//!
//! # Issuance Flow
//!
//! 1. [`AcmeClient::terms_of_service`] reports the directory's terms URI so the
//!    manager can check it against the configured acceptors
//! 2. [`AcmeClient::create_account`] registers once; the returned
//!    [`AccountKey`] is persisted and reused for every later order
//! 3. [`AcmeClient::new_order`] opens an order for the resolved identifiers
//! 4. [`AcmeClient::authorize`] completes the pending authorizations; HTTP-01
//!    key authorizations are published to a [`ChallengeStore`] for an external
//!    responder to serve from `/.well-known/acme-challenge/<token>`
//! 5. [`AcmeClient::finalize`] generates a key and CSR, finalizes the order and
//!    downloads the certificate chain

mod challenge;
mod client;
mod error;

pub use challenge::{ChallengeStore, ACME_CHALLENGE_PREFIX};
pub use client::InstantAcmeClient;
pub use error::AcmeError;

use std::fmt;

use async_trait::async_trait;
use autocert_config::ExternalAccountBinding;

/// Serialized ACME account credentials, including the account key pair
///
/// The contents are opaque to everything except the client that created them.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountKey(String);

impl AccountKey {
    pub fn new(serialized: impl Into<String>) -> Self {
        Self(serialized.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccountKey(..)")
    }
}

/// Parameters for registering an account
#[derive(Debug, Clone, Default)]
pub struct AccountRequest {
    /// Contact email, without the `mailto:` scheme
    pub contact: Option<String>,
    /// Whether the directory's terms of service are agreed to
    pub terms_of_service_agreed: bool,
    pub external_account_binding: Option<ExternalAccountBinding>,
}

/// A freshly issued certificate and the key it was issued for
#[derive(Clone)]
pub struct IssuedCertificate {
    /// PEM certificate chain, leaf first
    pub cert_chain_pem: String,
    /// PEM private key
    pub key_pem: String,
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("cert_chain_pem", &self.cert_chain_pem.len())
            .finish_non_exhaustive()
    }
}

/// ACME protocol operations needed for issuance
#[async_trait]
pub trait AcmeClient: Send + Sync + 'static {
    /// In-progress order state
    type Order: Send;

    /// Terms-of-service URI advertised by the directory, if any
    async fn terms_of_service(&self) -> Result<Option<String>, AcmeError>;

    /// Register a new account
    async fn create_account(&self, request: &AccountRequest) -> Result<AccountKey, AcmeError>;

    /// Open an order for `identifiers`
    async fn new_order(
        &self,
        account: &AccountKey,
        identifiers: &[String],
    ) -> Result<Self::Order, AcmeError>;

    /// Complete every pending authorization and wait for the order to be ready
    async fn authorize(&self, order: &mut Self::Order) -> Result<(), AcmeError>;

    /// Finalize the order and download the certificate chain
    async fn finalize(&self, order: &mut Self::Order) -> Result<IssuedCertificate, AcmeError>;
}
