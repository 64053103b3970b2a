//! `instant-acme` backed client

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, ExternalAccountKey,
    Identifier, NewAccount, NewOrder, Order, OrderStatus, Problem,
};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use serde::Deserialize;
use tracing::{debug, info, trace, warn};

use autocert_config::ExternalAccountBinding;

use super::{AccountKey, AccountRequest, AcmeClient, AcmeError, ChallengeStore, IssuedCertificate};

/// Timeout for directory metadata requests
const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(30);

/// First delay between order status polls
const POLL_INITIAL_DELAY: Duration = Duration::from_millis(250);

/// Upper bound for the delay between order status polls
const POLL_MAX_DELAY: Duration = Duration::from_secs(8);

/// Status polls before giving up on an order
const POLL_MAX_ATTEMPTS: u32 = 30;

/// Problem type suffix for identifiers the CA refuses to certify
const REJECTED_IDENTIFIER: &str = ":rejectedIdentifier";

/// ACME client speaking to a single directory
///
/// HTTP-01 key authorizations are published to the [`ChallengeStore`] while an
/// order is being authorized and withdrawn once it completes.
#[derive(Debug, Clone)]
pub struct InstantAcmeClient {
    directory_url: String,
    challenges: ChallengeStore,
    http: reqwest::Client,
}

impl InstantAcmeClient {
    pub fn new(directory_url: impl Into<String>, challenges: ChallengeStore) -> Result<Self, AcmeError> {
        let http = reqwest::Client::builder()
            .timeout(DIRECTORY_TIMEOUT)
            .build()
            .map_err(|e| AcmeError::Directory(e.to_string()))?;

        Ok(Self {
            directory_url: directory_url.into(),
            challenges,
            http,
        })
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    /// Store that receives HTTP-01 key authorizations
    pub fn challenges(&self) -> &ChallengeStore {
        &self.challenges
    }

    fn withdraw_all(&self, order: &mut PendingOrder) {
        for token in order.tokens.drain(..) {
            self.challenges.withdraw(&token);
        }
    }
}

/// An order in progress
pub struct PendingOrder {
    order: Order,
    identifiers: Vec<String>,
    tokens: Vec<String>,
}

impl fmt::Debug for PendingOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOrder")
            .field("identifiers", &self.identifiers)
            .field("tokens", &self.tokens.len())
            .finish_non_exhaustive()
    }
}

/// Subset of the ACME directory document
#[derive(Debug, Default, Deserialize)]
struct DirectoryDocument {
    #[serde(default)]
    meta: Option<DirectoryMeta>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryMeta {
    #[serde(default)]
    terms_of_service: Option<String>,
}

#[async_trait]
impl AcmeClient for InstantAcmeClient {
    type Order = PendingOrder;

    async fn terms_of_service(&self) -> Result<Option<String>, AcmeError> {
        let directory: DirectoryDocument = self
            .http
            .get(&self.directory_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AcmeError::Directory(e.to_string()))?
            .json()
            .await
            .map_err(|e| AcmeError::Directory(e.to_string()))?;

        let tos = directory.meta.and_then(|meta| meta.terms_of_service);
        debug!(directory_url = %self.directory_url, terms_of_service = ?tos, "Fetched ACME directory");
        Ok(tos)
    }

    async fn create_account(&self, request: &AccountRequest) -> Result<AccountKey, AcmeError> {
        let contact_address = request.contact.as_deref().map(contact_uri);
        let contact: Vec<&str> = contact_address.iter().map(String::as_str).collect();
        let external_account = request
            .external_account_binding
            .as_ref()
            .map(external_account_key)
            .transpose()?;

        let (_account, credentials) = Account::create(
            &NewAccount {
                contact: &contact,
                terms_of_service_agreed: request.terms_of_service_agreed,
                only_return_existing: false,
            },
            &self.directory_url,
            external_account.as_ref(),
        )
        .await
        .map_err(|e| classify(e, AcmeError::Account))?;

        let serialized =
            serde_json::to_string(&credentials).map_err(|e| AcmeError::Credentials(e.to_string()))?;

        info!(
            directory_url = %self.directory_url,
            contact = ?request.contact,
            external_account_binding = request.external_account_binding.is_some(),
            "Registered ACME account"
        );
        Ok(AccountKey::new(serialized))
    }

    /// IP identifiers are refused up front; `instant-acme` 0.7 only models
    /// DNS identifiers.
    async fn new_order(
        &self,
        account: &AccountKey,
        identifiers: &[String],
    ) -> Result<PendingOrder, AcmeError> {
        if let Some(ip) = identifiers.iter().find(|id| id.parse::<IpAddr>().is_ok()) {
            return Err(AcmeError::UnsupportedIdentifier(ip.clone()));
        }

        let credentials: AccountCredentials = serde_json::from_str(account.as_str())
            .map_err(|e| AcmeError::Credentials(e.to_string()))?;
        let account = Account::from_credentials(credentials)
            .await
            .map_err(|e| classify(e, AcmeError::Credentials))?;

        let acme_identifiers: Vec<Identifier> = identifiers
            .iter()
            .map(|id| Identifier::Dns(id.clone()))
            .collect();
        let order = account
            .new_order(&NewOrder {
                identifiers: &acme_identifiers,
            })
            .await
            .map_err(|e| classify(e, AcmeError::Order))?;

        info!(identifiers = ?identifiers, "Created ACME order");
        Ok(PendingOrder {
            order,
            identifiers: identifiers.to_vec(),
            tokens: Vec::new(),
        })
    }

    async fn authorize(&self, pending: &mut PendingOrder) -> Result<(), AcmeError> {
        let result = authorize_order(&self.challenges, pending).await;
        self.withdraw_all(pending);
        result
    }

    async fn finalize(&self, pending: &mut PendingOrder) -> Result<IssuedCertificate, AcmeError> {
        let mut params = CertificateParams::new(pending.identifiers.clone())
            .map_err(|e| AcmeError::Finalize(e.to_string()))?;
        let mut name = DistinguishedName::new();
        if let Some(first) = pending.identifiers.first() {
            name.push(DnType::CommonName, first.clone());
        }
        params.distinguished_name = name;

        let key = KeyPair::generate().map_err(|e| AcmeError::Finalize(e.to_string()))?;
        let csr = params
            .serialize_request(&key)
            .map_err(|e| AcmeError::Finalize(e.to_string()))?;

        pending
            .order
            .finalize(csr.der())
            .await
            .map_err(|e| classify(e, AcmeError::Finalize))?;

        poll_order(&mut pending.order, &[OrderStatus::Valid], "valid").await?;

        let cert_chain_pem = pending
            .order
            .certificate()
            .await
            .map_err(|e| classify(e, AcmeError::Finalize))?
            .ok_or_else(|| AcmeError::Finalize("server returned no certificate".to_string()))?;

        info!(identifiers = ?pending.identifiers, "Downloaded certificate chain");
        Ok(IssuedCertificate {
            cert_chain_pem,
            key_pem: key.serialize_pem(),
        })
    }
}

/// Publish HTTP-01 responses for every pending authorization and wait for the
/// order to become ready
async fn authorize_order(
    challenges: &ChallengeStore,
    pending: &mut PendingOrder,
) -> Result<(), AcmeError> {
    let authorizations = pending
        .order
        .authorizations()
        .await
        .map_err(|e| classify(e, AcmeError::Order))?;

    for authz in &authorizations {
        let Identifier::Dns(identifier) = &authz.identifier;

        match &authz.status {
            AuthorizationStatus::Valid => {
                trace!(identifier = %identifier, "Authorization already valid");
                continue;
            }
            AuthorizationStatus::Pending => {}
            status => {
                return Err(AcmeError::Authorization {
                    identifier: identifier.clone(),
                    message: format!("unexpected status {status:?}"),
                });
            }
        }

        let challenge = authz
            .challenges
            .iter()
            .find(|c| c.r#type == ChallengeType::Http01)
            .ok_or_else(|| AcmeError::Authorization {
                identifier: identifier.clone(),
                message: "no HTTP-01 challenge offered".to_string(),
            })?;

        let key_authorization = pending.order.key_authorization(challenge);
        challenges.publish(&challenge.token, key_authorization.as_str());
        pending.tokens.push(challenge.token.clone());

        pending
            .order
            .set_challenge_ready(&challenge.url)
            .await
            .map_err(|e| classify(e, AcmeError::Order))?;

        debug!(identifier = %identifier, token = %challenge.token, "HTTP-01 challenge ready");
    }

    poll_order(
        &mut pending.order,
        &[OrderStatus::Ready, OrderStatus::Valid],
        "ready",
    )
    .await
}

/// Refresh the order with exponential backoff until it reaches one of `done`
async fn poll_order(order: &mut Order, done: &[OrderStatus], target: &str) -> Result<(), AcmeError> {
    let mut delay = POLL_INITIAL_DELAY;

    for attempt in 1..=POLL_MAX_ATTEMPTS {
        let state = order
            .refresh()
            .await
            .map_err(|e| classify(e, AcmeError::Order))?;
        let status = state.status;

        if done.contains(&status) {
            trace!(attempt, status = ?status, "ACME order reached target status");
            return Ok(());
        }

        if status == OrderStatus::Invalid {
            let problem = state.error.as_ref();
            let detail = problem
                .and_then(|p| p.detail.clone())
                .unwrap_or_else(|| "no detail provided".to_string());
            warn!(detail = %detail, "ACME order became invalid");
            return Err(if problem.is_some_and(is_rejected_identifier) {
                AcmeError::RejectedIdentifier(detail)
            } else {
                AcmeError::Order(format!("order became invalid: {detail}"))
            });
        }

        trace!(attempt, status = ?status, delay_ms = delay.as_millis() as u64, "Waiting for ACME order");
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(POLL_MAX_DELAY);
    }

    Err(AcmeError::Timeout(target.to_string()))
}

fn is_rejected_identifier(problem: &Problem) -> bool {
    problem
        .r#type
        .as_deref()
        .is_some_and(|kind| kind.ends_with(REJECTED_IDENTIFIER))
}

/// Map a protocol error, singling out rejected identifiers
fn classify(error: instant_acme::Error, wrap: fn(String) -> AcmeError) -> AcmeError {
    if let instant_acme::Error::Api(problem) = &error {
        if is_rejected_identifier(problem) {
            return AcmeError::RejectedIdentifier(
                problem.detail.clone().unwrap_or_else(|| error.to_string()),
            );
        }
    }
    wrap(error.to_string())
}

fn contact_uri(contact: &str) -> String {
    if contact.starts_with("mailto:") {
        contact.to_string()
    } else {
        format!("mailto:{contact}")
    }
}

fn external_account_key(binding: &ExternalAccountBinding) -> Result<ExternalAccountKey, AcmeError> {
    let key = URL_SAFE_NO_PAD
        .decode(binding.hmac_key.trim().trim_end_matches('='))
        .map_err(|e| AcmeError::ExternalAccountBinding(e.to_string()))?;
    Ok(ExternalAccountKey::new(binding.kid.clone(), &key))
}
