//! SNI-driven TLS acceptor
//!
//! Each connection's ClientHello is read first; the requested server name is
//! resolved to a certificate through the [`Manager`] and the handshake then
//! completes with that certificate's server configuration. Resolution is
//! asynchronous, so a slow issuance for one name never blocks handshakes for
//! other names.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rustls::server::Acceptor;
use rustls::ServerConfig;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;
use tracing::{debug, warn};

use autocert_config::{ConfigLoadError, ConfigParams, Configuration};

use crate::acme::{AcmeClient, ChallengeStore, InstantAcmeClient};
use crate::errors::AutoCertError;
use crate::manager::Manager;

/// Errors building an acceptor from configuration
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Load(#[from] ConfigLoadError),

    #[error(transparent)]
    Manager(#[from] AutoCertError),
}

/// Errors accepting a single TLS connection
#[derive(Debug, Error)]
pub enum AcceptError {
    #[error("failed to read ClientHello: {0}")]
    ClientHello(#[source] io::Error),

    #[error("no certificate for server name '{server_name}': {source}")]
    Resolve {
        server_name: String,
        #[source]
        source: AutoCertError,
    },

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),
}

/// TLS acceptor that provisions certificates on demand
pub struct SniAcceptor<C: AcmeClient = InstantAcmeClient> {
    manager: Manager<C>,
}

impl<C: AcmeClient> Clone for SniAcceptor<C> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
        }
    }
}

impl SniAcceptor<InstantAcmeClient> {
    /// Build the full stack from parameters plus `ACME_*` environment fallbacks
    pub fn from_params(params: ConfigParams) -> Result<Self, SetupError> {
        Self::from_configuration(Configuration::from_params(params)?)
    }

    pub fn from_configuration(config: Configuration) -> Result<Self, SetupError> {
        let manager = Manager::with_challenges(config, ChallengeStore::new())?;
        Ok(Self::new(manager))
    }

    /// HTTP-01 key authorizations to serve while orders are in progress
    pub fn challenges(&self) -> &ChallengeStore {
        self.manager.challenges()
    }
}

impl<C: AcmeClient> SniAcceptor<C> {
    pub fn new(manager: Manager<C>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Manager<C> {
        &self.manager
    }

    /// Recommended interval for background renewal checks
    pub fn check_every(&self) -> Duration {
        self.manager.check_every()
    }

    /// Server configuration for a requested server name
    ///
    /// A missing name resolves like any denied name, through the fallback
    /// identity.
    pub async fn resolve(&self, server_name: Option<&str>) -> Result<Arc<ServerConfig>, AutoCertError> {
        let cert = self
            .manager
            .managed_certificate(server_name.unwrap_or_default(), &[], Utc::now())
            .await?;
        Ok(cert.secure_context()?)
    }

    /// Complete a TLS handshake on `stream`
    pub async fn accept<IO>(&self, stream: IO) -> Result<TlsStream<IO>, AcceptError>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let start = LazyConfigAcceptor::new(Acceptor::default(), stream)
            .await
            .map_err(AcceptError::ClientHello)?;

        let server_name = start.client_hello().server_name().map(str::to_string);
        debug!(server_name = ?server_name, "Received ClientHello");

        let config = self
            .resolve(server_name.as_deref())
            .await
            .map_err(|source| {
                warn!(server_name = ?server_name, error = %source, "Certificate resolution failed");
                AcceptError::Resolve {
                    server_name: server_name.clone().unwrap_or_default(),
                    source,
                }
            })?;

        start
            .into_stream(config)
            .await
            .map_err(AcceptError::Handshake)
    }
}

impl<C: AcmeClient> std::fmt::Debug for SniAcceptor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniAcceptor")
            .field("manager", &self.manager)
            .finish()
    }
}
