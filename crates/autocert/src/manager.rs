//! Certificate manager
//!
//! The [`Manager`] turns requested server names into ready-to-serve
//! certificates:
//!
//! 1. Requested names are filtered through the identifier policies. When none
//!    is allowed the manager degrades to the policies' fallback identity.
//! 2. The resolved identifier set is fingerprinted and looked up in the cache.
//! 3. A missing or expiring entry is (re)issued through the [`AcmeClient`].
//!    Issuance is single-flighted per fingerprint, so concurrent requests for
//!    the same names produce one order.
//!
//! The ACME account is registered lazily on first issuance and persisted
//! under the work directory for reuse.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use autocert_config::{
    accepts_any, Configuration, ExternalAccountBinding, TermsOfServiceAcceptor,
};

use crate::acme::{
    AccountKey, AccountRequest, AcmeClient, AcmeError, ChallengeStore, InstantAcmeClient,
};
use crate::certificate::{CacheEntry, ManagedCertificate};
use crate::errors::AutoCertError;
use crate::flight::Flights;
use crate::policy::{allowed_by_any, IdentifierPolicy};
use crate::storage::{FileStore, MemoryStore, Store};

/// Automatic certificate manager
///
/// Cheap to clone; clones share caches, the account and in-flight issuances.
pub struct Manager<C: AcmeClient = InstantAcmeClient> {
    inner: Arc<Inner<C>>,
}

impl<C: AcmeClient> Clone for Manager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// State shared by every clone of a [`Manager`]
///
/// # Thread Safety
///
/// All fields are either immutable after construction or synchronize
/// internally, so `Inner` is shared behind an `Arc` without an outer lock.
struct Inner<C: AcmeClient> {
    /// Validated configuration snapshot
    config: Configuration,
    /// Compiled `allow_identifiers`, in configured order
    policies: Vec<IdentifierPolicy>,
    /// Name certified when no requested identifier is allowed
    fallback_identifier: Option<String>,
    client: C,
    /// Issued certificates keyed by fingerprint (`cache_dir` or memory)
    certificates: Arc<dyn Store>,
    /// Account credentials under `work_dir`
    accounts: FileStore,
    /// Registered at most once per manager
    account_key: OnceCell<AccountKey>,
    /// In-flight issuances keyed by fingerprint
    flights: Flights<CacheEntry>,
}

impl Manager<InstantAcmeClient> {
    /// Manager backed by `instant-acme`, publishing HTTP-01 responses to `challenges`
    pub fn with_challenges(
        config: Configuration,
        challenges: ChallengeStore,
    ) -> Result<Self, AutoCertError> {
        config.validate()?;
        let directory_url = config.directory_url().unwrap_or_default().to_string();
        let client = InstantAcmeClient::new(directory_url, challenges)?;
        Self::assemble(config, client)
    }

    /// HTTP-01 key authorizations of orders in progress
    pub fn challenges(&self) -> &ChallengeStore {
        self.inner.client.challenges()
    }
}

impl<C: AcmeClient> Manager<C> {
    /// Validate `config` and build a manager around `client`
    pub fn new(config: Configuration, client: C) -> Result<Self, AutoCertError> {
        config.validate()?;
        Self::assemble(config, client)
    }

    fn assemble(config: Configuration, client: C) -> Result<Self, AutoCertError> {
        let policies = IdentifierPolicy::build(config.allow_identifiers())?;
        let fallback_identifier = IdentifierPolicy::fallback_identifier(&policies);

        let certificates: Arc<dyn Store> = match config.cache_dir() {
            Some(dir) => Arc::new(FileStore::new(dir)?),
            None => Arc::new(MemoryStore::new()),
        };
        let accounts = FileStore::new(config.work_dir())?;

        info!(
            name = %config.name(),
            directory_url = ?config.directory_url(),
            policies = policies.len(),
            fallback_identifier = ?fallback_identifier,
            cache_dir = ?config.cache_dir(),
            "Initialized certificate manager"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                policies,
                fallback_identifier,
                client,
                certificates,
                accounts,
                account_key: OnceCell::new(),
                flights: Flights::new(),
            }),
        })
    }

    /// Certificate covering `primary` and `alternates`, as of `as_of`
    ///
    /// Denied names are dropped. If no name is allowed the certificate is
    /// issued for the fallback identifier instead; without a fallback this
    /// fails with [`AutoCertError::IdentifierNotAllowed`].
    pub async fn managed_certificate(
        &self,
        primary: &str,
        alternates: &[String],
        as_of: DateTime<Utc>,
    ) -> Result<ManagedCertificate, AutoCertError> {
        let identifiers = self.resolve_identifiers(primary, alternates)?;
        let fingerprint = Self::fingerprint(&identifiers);

        if let Some(entry) = self.inner.cached_entry(&fingerprint)? {
            let cert = ManagedCertificate::new(entry)?;
            if !self.needs_renewal(&cert, as_of) {
                debug!(fingerprint = %fingerprint, serial = %cert.serial(), "Serving cached certificate");
                return Ok(cert);
            }
            info!(
                fingerprint = %fingerprint,
                serial = %cert.serial(),
                valid_to = %cert.valid_to(),
                "Cached certificate needs renewal"
            );
        }

        let inner = Arc::clone(&self.inner);
        let key = fingerprint.clone();
        let entry = self
            .inner
            .flights
            .run(&fingerprint, move || async move {
                inner.issue(&key, identifiers, as_of).await
            })
            .await?;

        Ok(ManagedCertificate::new(entry)?)
    }

    /// Requested names narrowed by policy, or the fallback identity
    fn resolve_identifiers(
        &self,
        primary: &str,
        alternates: &[String],
    ) -> Result<Vec<String>, AutoCertError> {
        let mut requested: Vec<String> = Vec::with_capacity(alternates.len() + 1);
        for name in std::iter::once(primary).chain(alternates.iter().map(String::as_str)) {
            if !requested.iter().any(|seen| seen.eq_ignore_ascii_case(name)) {
                requested.push(name.to_string());
            }
        }

        let (allowed, denied): (Vec<String>, Vec<String>) = requested
            .into_iter()
            .partition(|name| allowed_by_any(&self.inner.policies, name));

        if !allowed.is_empty() {
            if !denied.is_empty() {
                warn!(denied = ?denied, allowed = ?allowed, "Dropping identifiers not allowed by policy");
            }
            return Ok(allowed);
        }

        match &self.inner.fallback_identifier {
            Some(fallback) => {
                warn!(
                    denied = ?denied,
                    fallback = %fallback,
                    "No requested identifier is allowed, using fallback identity"
                );
                Ok(vec![fallback.clone()])
            }
            None => Err(AutoCertError::IdentifierNotAllowed(denied)),
        }
    }

    /// Identifiers not allowed by any policy, in input order
    pub fn denied_identifiers<S: AsRef<str>>(&self, identifiers: &[S]) -> Vec<String> {
        identifiers
            .iter()
            .map(AsRef::as_ref)
            .filter(|id| !allowed_by_any(&self.inner.policies, id))
            .map(str::to_string)
            .collect()
    }

    /// Cache key for an identifier set
    ///
    /// Lowercase hex SHA-256 of the sorted, de-duplicated, lowercased
    /// identifiers joined by newlines. Independent of request order.
    pub fn fingerprint<S: AsRef<str>>(identifiers: &[S]) -> String {
        let mut normalized: Vec<String> = identifiers
            .iter()
            .map(|id| id.as_ref().to_ascii_lowercase())
            .collect();
        normalized.sort();
        normalized.dedup();
        hex::encode(Sha256::digest(normalized.join("\n").as_bytes()))
    }

    /// The ACME account key, registering the account on first use
    ///
    /// Concurrent first callers share a single registration.
    pub async fn account_key(&self) -> Result<AccountKey, AutoCertError> {
        self.inner.account_key().await
    }

    /// Raw persisted cache entry for `fingerprint`
    pub fn cache_fetch(&self, fingerprint: &str) -> Result<Option<String>, AutoCertError> {
        Ok(self.inner.certificates.fetch(fingerprint)?)
    }

    /// Identifier sets of every cached certificate
    pub fn cached_identifier_sets(&self) -> Result<Vec<Vec<String>>, AutoCertError> {
        let mut sets = Vec::new();
        for key in self.inner.certificates.keys()? {
            let Some(raw) = self.inner.certificates.fetch(&key)? else {
                continue;
            };
            match CacheEntry::from_json(&raw) {
                Ok(entry) => sets.push(entry.identifiers),
                Err(e) => debug!(key = %key, error = %e, "Skipping unreadable cache entry"),
            }
        }
        Ok(sets)
    }

    /// Whether `cert` should be renewed at `as_of` under the configured thresholds
    pub fn needs_renewal(&self, cert: &ManagedCertificate, as_of: DateTime<Utc>) -> bool {
        needs_renewal_between(
            cert.valid_from_date(),
            cert.valid_to_date(),
            Some(self.inner.config.renew_before_seconds()),
            Some(self.inner.config.renew_before_fraction()),
            as_of,
        )
    }

    /// `valid_to - before_seconds`, unless that would precede issuance
    pub fn renew_after_from_seconds(
        cert: &ManagedCertificate,
        before_seconds: Option<i64>,
    ) -> Option<DateTime<Utc>> {
        renew_after_seconds(cert.valid_from_date(), cert.valid_to_date(), before_seconds)
    }

    /// `valid_to` minus `before_fraction` of the validity window, for a fraction in (0, 1]
    ///
    /// `None` when the point would not fall strictly after `valid_from`, so a
    /// fraction of `1.0` never forces renewal at issuance.
    pub fn renew_after_from_fraction(
        cert: &ManagedCertificate,
        before_fraction: Option<f64>,
    ) -> Option<DateTime<Utc>> {
        renew_after_fraction(cert.valid_from_date(), cert.valid_to_date(), before_fraction)
    }

    pub fn configuration(&self) -> &Configuration {
        &self.inner.config
    }

    pub fn client(&self) -> &C {
        &self.inner.client
    }

    pub fn policies(&self) -> &[IdentifierPolicy] {
        &self.inner.policies
    }

    /// Name certified when no requested identifier is allowed
    pub fn fallback_identifier(&self) -> Option<&str> {
        self.inner.fallback_identifier.as_deref()
    }

    pub fn name(&self) -> &str {
        self.inner.config.name()
    }

    pub fn directory_url(&self) -> Option<&str> {
        self.inner.config.directory_url()
    }

    pub fn contact(&self) -> Option<&str> {
        self.inner.config.contact()
    }

    pub fn external_account_binding(&self) -> Option<&ExternalAccountBinding> {
        self.inner.config.external_account_binding()
    }

    pub fn tos_acceptors(&self) -> &[TermsOfServiceAcceptor] {
        self.inner.config.tos_acceptors()
    }

    pub fn renew_before_seconds(&self) -> i64 {
        self.inner.config.renew_before_seconds()
    }

    pub fn renew_before_fraction(&self) -> f64 {
        self.inner.config.renew_before_fraction()
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.inner.config.cache_dir()
    }

    pub fn work_dir(&self) -> &Path {
        self.inner.config.work_dir()
    }

    pub fn check_every_seconds(&self) -> u64 {
        self.inner.config.check_every_seconds()
    }

    /// Recommended interval between background renewal checks
    pub fn check_every(&self) -> Duration {
        self.inner.config.check_every()
    }
}

impl<C: AcmeClient> std::fmt::Debug for Manager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("name", &self.inner.config.name())
            .field("policies", &self.inner.policies.len())
            .field("fallback_identifier", &self.inner.fallback_identifier)
            .field("in_flight", &self.inner.flights.len())
            .finish_non_exhaustive()
    }
}

impl<C: AcmeClient> Inner<C> {
    fn cached_entry(&self, fingerprint: &str) -> Result<Option<CacheEntry>, AutoCertError> {
        let Some(raw) = self.certificates.fetch(fingerprint)? else {
            return Ok(None);
        };
        match CacheEntry::from_json(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "Discarding unreadable cache entry");
                if let Err(e) = self.certificates.delete(fingerprint) {
                    warn!(fingerprint = %fingerprint, error = %e, "Failed to remove unreadable cache entry");
                }
                Ok(None)
            }
        }
    }

    fn is_fresh(&self, entry: &CacheEntry, as_of: DateTime<Utc>) -> bool {
        !needs_renewal_between(
            entry.valid_from,
            entry.valid_to,
            Some(self.config.renew_before_seconds()),
            Some(self.config.renew_before_fraction()),
            as_of,
        )
    }

    /// Issue and persist a certificate; runs inside the single-flight slot
    ///
    /// # Arguments
    ///
    /// * `fingerprint` - Cache key of `identifiers`
    /// * `identifiers` - Resolved identifiers, primary first
    /// * `as_of` - Instant freshness of a concurrently issued entry is judged at
    ///
    /// # Errors
    ///
    /// Returns the ACME or storage failure unchanged, except a rejected
    /// identifier set which becomes [`AutoCertError::IdentifierNotAllowed`].
    /// The cache is only written after a successful issuance.
    async fn issue(
        &self,
        fingerprint: &str,
        identifiers: Vec<String>,
        as_of: DateTime<Utc>,
    ) -> Result<CacheEntry, AutoCertError> {
        if let Some(entry) = self.cached_entry(fingerprint)? {
            if self.is_fresh(&entry, as_of) {
                debug!(fingerprint = %fingerprint, "Certificate was issued while waiting");
                return Ok(entry);
            }
        }

        let start = tokio::time::Instant::now();
        info!(fingerprint = %fingerprint, identifiers = ?identifiers, "Issuing certificate");

        let account = self.account_key().await?;

        // Order, authorize and finalize; nothing is cached until this succeeds
        let issued = self
            .order_certificate(&account, &identifiers)
            .await
            .map_err(|e| match e {
                AcmeError::RejectedIdentifier(detail) => {
                    warn!(identifiers = ?identifiers, detail = %detail, "ACME server rejected identifiers");
                    AutoCertError::IdentifierNotAllowed(identifiers.clone())
                }
                other => {
                    warn!(fingerprint = %fingerprint, error = %other, "Certificate issuance failed");
                    AutoCertError::Acme(other)
                }
            })?;

        // Validity is read from the leaf, so an unparsable chain is never stored
        let entry = CacheEntry::from_issued(identifiers, issued)?;
        let serialized = entry
            .to_json()
            .map_err(|e| crate::errors::StorageError::Serialize {
                key: fingerprint.to_string(),
                source: Arc::new(e),
            })?;
        self.certificates.store(fingerprint, &serialized)?;

        info!(
            fingerprint = %fingerprint,
            valid_to = %entry.valid_to,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Certificate issued"
        );
        Ok(entry)
    }

    async fn order_certificate(
        &self,
        account: &AccountKey,
        identifiers: &[String],
    ) -> Result<crate::acme::IssuedCertificate, AcmeError> {
        let mut order = self.client.new_order(account, identifiers).await?;
        self.client.authorize(&mut order).await?;
        self.client.finalize(&mut order).await
    }

    async fn account_key(&self) -> Result<AccountKey, AutoCertError> {
        self.account_key
            .get_or_try_init(|| self.load_or_register_account())
            .await
            .cloned()
    }

    async fn load_or_register_account(&self) -> Result<AccountKey, AutoCertError> {
        let key = format!("account-{}", self.config.name());

        if let Some(stored) = self.accounts.fetch(&key)? {
            debug!(account = %key, "Loaded stored ACME account");
            return Ok(AccountKey::new(stored));
        }

        let terms_of_service = self.client.terms_of_service().await?;
        if !accepts_any(self.config.tos_acceptors(), terms_of_service.as_deref()) {
            warn!(terms_of_service = ?terms_of_service, "Terms of service not accepted");
            return Err(AutoCertError::TermsOfServiceRejected(terms_of_service));
        }

        let request = AccountRequest {
            contact: self.config.contact().map(str::to_string),
            terms_of_service_agreed: true,
            external_account_binding: self.config.external_account_binding().cloned(),
        };
        let account = self.client.create_account(&request).await?;
        self.accounts.store(&key, account.as_str())?;

        info!(account = %key, terms_of_service = ?terms_of_service, "Registered ACME account");
        Ok(account)
    }
}

fn renew_after_seconds(
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
    before_seconds: Option<i64>,
) -> Option<DateTime<Utc>> {
    let seconds = before_seconds.filter(|s| *s > 0)?;
    if seconds >= (valid_to - valid_from).num_seconds() {
        return None;
    }
    valid_to.checked_sub_signed(TimeDelta::try_seconds(seconds)?)
}

fn renew_after_fraction(
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
    before_fraction: Option<f64>,
) -> Option<DateTime<Utc>> {
    let fraction = before_fraction.filter(|f| *f > 0.0 && *f <= 1.0)?;
    let window_ms = (valid_to - valid_from).num_milliseconds() as f64;
    let before = TimeDelta::try_milliseconds((window_ms * fraction).round() as i64)?;
    // Must fall strictly after issuance
    valid_to
        .checked_sub_signed(before)
        .filter(|at| *at > valid_from)
}

/// True once `as_of` reaches the earlier usable renewal point, or expiry
/// when neither threshold is usable
fn needs_renewal_between(
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
    before_seconds: Option<i64>,
    before_fraction: Option<f64>,
    as_of: DateTime<Utc>,
) -> bool {
    let renew_at = [
        renew_after_seconds(valid_from, valid_to, before_seconds),
        renew_after_fraction(valid_from, valid_to, before_fraction),
    ]
    .into_iter()
    .flatten()
    .min()
    .unwrap_or(valid_to);

    as_of >= renew_at
}
