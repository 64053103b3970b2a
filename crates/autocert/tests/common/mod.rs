//! Scripted ACME client shared by the integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use rcgen::{CertificateParams, DnType, KeyPair, SerialNumber};

use autocert::acme::{AccountRequest, IssuedCertificate};
use autocert::{
    AccountKey, AcmeClient, AcmeEnvironment, AcmeError, ConfigParams, Configuration, Manager,
    TermsOfServiceAcceptor,
};

pub const DIRECTORY_URL: &str = "https://acme.test/directory";

/// In-process ACME server stand-in that self-signs every order
pub struct MockAcme {
    accounts: AtomicUsize,
    orders: AtomicUsize,
    serial: AtomicU64,
    failures: AtomicUsize,
    authorize_delay: Duration,
    reject_identifiers: bool,
    terms_of_service: Option<String>,
    valid_from: Mutex<DateTime<Utc>>,
    lifetime: TimeDelta,
    last_account_request: Mutex<Option<AccountRequest>>,
}

pub struct MockOrder {
    identifiers: Vec<String>,
}

impl MockAcme {
    pub fn new() -> Self {
        Self {
            accounts: AtomicUsize::new(0),
            orders: AtomicUsize::new(0),
            serial: AtomicU64::new(0),
            failures: AtomicUsize::new(0),
            authorize_delay: Duration::ZERO,
            reject_identifiers: false,
            terms_of_service: Some("https://acme.test/terms-v1.pdf".to_string()),
            valid_from: Mutex::new(whole_seconds(Utc::now()) - TimeDelta::hours(1)),
            lifetime: TimeDelta::days(30),
            last_account_request: Mutex::new(None),
        }
    }

    pub fn with_authorize_delay(mut self, delay: Duration) -> Self {
        self.authorize_delay = delay;
        self
    }

    pub fn with_terms_of_service(mut self, terms: Option<&str>) -> Self {
        self.terms_of_service = terms.map(str::to_string);
        self
    }

    pub fn with_valid_from(self, valid_from: DateTime<Utc>) -> Self {
        self.set_valid_from(valid_from);
        self
    }

    /// Every order fails with `rejectedIdentifier`
    pub fn rejecting_identifiers(mut self) -> Self {
        self.reject_identifiers = true;
        self
    }

    /// Fail the next `count` authorizations
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Start of validity for certificates issued from now on
    pub fn set_valid_from(&self, valid_from: DateTime<Utc>) {
        *self.valid_from.lock() = whole_seconds(valid_from);
    }

    pub fn lifetime(&self) -> TimeDelta {
        self.lifetime
    }

    pub fn accounts(&self) -> usize {
        self.accounts.load(Ordering::SeqCst)
    }

    pub fn orders(&self) -> usize {
        self.orders.load(Ordering::SeqCst)
    }

    pub fn last_account_request(&self) -> Option<AccountRequest> {
        self.last_account_request.lock().clone()
    }
}

#[async_trait]
impl AcmeClient for MockAcme {
    type Order = MockOrder;

    async fn terms_of_service(&self) -> Result<Option<String>, AcmeError> {
        Ok(self.terms_of_service.clone())
    }

    async fn create_account(&self, request: &AccountRequest) -> Result<AccountKey, AcmeError> {
        let n = self.accounts.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_account_request.lock() = Some(request.clone());
        Ok(AccountKey::new(format!("{{\"account\":{n}}}")))
    }

    async fn new_order(
        &self,
        _account: &AccountKey,
        identifiers: &[String],
    ) -> Result<MockOrder, AcmeError> {
        self.orders.fetch_add(1, Ordering::SeqCst);
        if self.reject_identifiers {
            return Err(AcmeError::RejectedIdentifier(format!(
                "policy forbids issuing for {}",
                identifiers.join(", ")
            )));
        }
        Ok(MockOrder {
            identifiers: identifiers.to_vec(),
        })
    }

    async fn authorize(&self, _order: &mut MockOrder) -> Result<(), AcmeError> {
        if !self.authorize_delay.is_zero() {
            tokio::time::sleep(self.authorize_delay).await;
        }
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(AcmeError::Order("order became invalid".to_string()));
        }
        Ok(())
    }

    async fn finalize(&self, order: &mut MockOrder) -> Result<IssuedCertificate, AcmeError> {
        let n = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
        let mut serial = vec![0x01];
        serial.extend_from_slice(&n.to_be_bytes());

        let valid_from = *self.valid_from.lock();
        let names: Vec<&str> = order.identifiers.iter().map(String::as_str).collect();
        Ok(self_signed(&names, valid_from, valid_from + self.lifetime, &serial))
    }
}

pub fn whole_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap()
}

pub fn self_signed(
    names: &[&str],
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
    serial: &[u8],
) -> IssuedCertificate {
    let key = KeyPair::generate().unwrap();
    let mut params =
        CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>()).unwrap();
    params.distinguished_name.push(DnType::CommonName, names[0]);
    params.not_before = time::OffsetDateTime::from_unix_timestamp(valid_from.timestamp()).unwrap();
    params.not_after = time::OffsetDateTime::from_unix_timestamp(valid_to.timestamp()).unwrap();
    params.serial_number = Some(SerialNumber::from_slice(serial));
    let cert = params.self_signed(&key).unwrap();

    IssuedCertificate {
        cert_chain_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    }
}

/// Parameters accepted by validation, rooted in `dir`
pub fn params(dir: &Path, allow: &[&str]) -> ConfigParams {
    ConfigParams {
        name: Some("test".to_string()),
        directory_url: Some(DIRECTORY_URL.to_string()),
        contact: Some("ops@lcl.host".to_string()),
        allow_identifiers: Some(allow.iter().map(|s| s.to_string()).collect()),
        tos_acceptors: Some(vec![TermsOfServiceAcceptor::any()]),
        work_dir: Some(dir.join("work")),
        ..Default::default()
    }
}

pub fn manager_with(params: ConfigParams, client: MockAcme) -> Manager<MockAcme> {
    let config = Configuration::resolve(params, AcmeEnvironment::default());
    Manager::new(config, client).unwrap()
}

pub fn manager(dir: &Path, allow: &[&str], client: MockAcme) -> Manager<MockAcme> {
    manager_with(params(dir, allow), client)
}
