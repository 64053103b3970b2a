//! Issued certificates and their TLS server configuration
//!
//! A [`CacheEntry`] is the persisted form of an issued certificate. A
//! [`ManagedCertificate`] wraps one entry for use: it parses the chain once,
//! exposes the certificate's metadata, and lazily builds a rustls
//! [`ServerConfig`] that is memoized for the lifetime of the instance.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::OnceCell;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use rustls::ServerConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;
use x509_parser::prelude::*;

use crate::acme::IssuedCertificate;
use crate::errors::CertificateError;

/// Persisted certificate record, keyed by the identifier-set fingerprint
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// PEM certificate chain, leaf first
    pub cert_pem: String,
    /// PEM private key
    pub key_pem: String,
    /// Identifiers the certificate was requested for, in request order
    pub identifiers: Vec<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

impl CacheEntry {
    /// Build an entry from a freshly issued chain, reading validity from the leaf
    pub fn from_issued(
        identifiers: Vec<String>,
        issued: IssuedCertificate,
    ) -> Result<Self, CertificateError> {
        let chain = parse_chain(&issued.cert_chain_pem)?;
        let leaf = parse_leaf(&chain[0])?;

        Ok(Self {
            cert_pem: issued.cert_chain_pem,
            key_pem: issued.key_pem,
            identifiers,
            valid_from: leaf.valid_from,
            valid_to: leaf.valid_to,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("identifiers", &self.identifiers)
            .field("valid_from", &self.valid_from)
            .field("valid_to", &self.valid_to)
            .finish_non_exhaustive()
    }
}

/// An issued certificate ready to serve
///
/// Read-only. A renewed certificate is a new instance, so a secure context
/// built from one instance is never shared with another.
pub struct ManagedCertificate {
    entry: CacheEntry,
    cert_chain: Vec<CertificateDer<'static>>,
    serial: String,
    secure_context: OnceCell<Arc<ServerConfig>>,
}

impl ManagedCertificate {
    pub fn new(entry: CacheEntry) -> Result<Self, CertificateError> {
        if entry.identifiers.is_empty() {
            return Err(CertificateError::NoIdentifiers);
        }

        let cert_chain = parse_chain(&entry.cert_pem)?;
        let leaf = parse_leaf(&cert_chain[0])?;

        Ok(Self {
            entry,
            cert_chain,
            serial: leaf.serial,
            secure_context: OnceCell::new(),
        })
    }

    /// Parse a persisted [`CacheEntry`] and wrap it
    pub fn from_json(json: &str) -> Result<Self, CertificateError> {
        let entry = CacheEntry::from_json(json).map_err(|e| CertificateError::Pem(e.to_string()))?;
        Self::new(entry)
    }

    pub fn cert_pem(&self) -> &str {
        &self.entry.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.entry.key_pem
    }

    /// DER certificates, leaf first
    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }

    /// The primary identifier
    pub fn common_name(&self) -> &str {
        &self.entry.identifiers[0]
    }

    /// Every identifier on the certificate, in request order
    pub fn all_names(&self) -> &[String] {
        &self.entry.identifiers
    }

    pub fn identifiers(&self) -> &[String] {
        self.all_names()
    }

    /// Serial number as uppercase hex without separators
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Serial number as colon separated hex pairs (`01:AB:...`)
    pub fn hex_serial(&self) -> String {
        let bytes = self.serial.as_bytes();
        bytes
            .chunks(2)
            .map(|pair| String::from_utf8_lossy(pair))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Start of validity, RFC 3339
    pub fn valid_from(&self) -> String {
        self.entry
            .valid_from
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// End of validity, RFC 3339
    pub fn valid_to(&self) -> String {
        self.entry.valid_to.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn valid_from_date(&self) -> DateTime<Utc> {
        self.entry.valid_from
    }

    pub fn valid_to_date(&self) -> DateTime<Utc> {
        self.entry.valid_to
    }

    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }

    /// TLS server configuration for this certificate
    ///
    /// Built on first use; later calls return the same `Arc`.
    pub fn secure_context(&self) -> Result<Arc<ServerConfig>, CertificateError> {
        self.secure_context
            .get_or_try_init(|| self.build_secure_context())
            .cloned()
    }

    fn build_secure_context(&self) -> Result<Arc<ServerConfig>, CertificateError> {
        let key = rustls_pemfile::private_key(&mut self.entry.key_pem.as_bytes())
            .map_err(|e| CertificateError::Pem(e.to_string()))?
            .ok_or(CertificateError::MissingKey)?;

        let provider = CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(self.cert_chain.clone(), key)?;

        debug!(
            common_name = %self.common_name(),
            serial = %self.serial,
            "Built TLS server configuration"
        );
        Ok(Arc::new(config))
    }
}

impl fmt::Debug for ManagedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedCertificate")
            .field("identifiers", &self.entry.identifiers)
            .field("serial", &self.serial)
            .field("valid_from", &self.entry.valid_from)
            .field("valid_to", &self.entry.valid_to)
            .finish_non_exhaustive()
    }
}

/// Leaf certificate details
struct LeafInfo {
    serial: String,
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
}

/// Parse every certificate in a PEM bundle; the result is never empty
fn parse_chain(pem: &str) -> Result<Vec<CertificateDer<'static>>, CertificateError> {
    let chain = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CertificateError::Pem(e.to_string()))?;

    if chain.is_empty() {
        return Err(CertificateError::EmptyChain);
    }
    Ok(chain)
}

fn parse_leaf(der: &CertificateDer<'_>) -> Result<LeafInfo, CertificateError> {
    let (_, cert) =
        parse_x509_certificate(der.as_ref()).map_err(|e| CertificateError::X509(e.to_string()))?;

    let validity = cert.validity();
    let valid_from = timestamp(validity.not_before.timestamp())?;
    let valid_to = timestamp(validity.not_after.timestamp())?;

    Ok(LeafInfo {
        serial: serial_hex(cert.raw_serial()),
        valid_from,
        valid_to,
    })
}

fn timestamp(seconds: i64) -> Result<DateTime<Utc>, CertificateError> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| CertificateError::X509(format!("validity timestamp {seconds} out of range")))
}

/// Uppercase hex of a DER integer, without the sign padding byte
fn serial_hex(raw: &[u8]) -> String {
    let trimmed = match raw {
        [0, rest @ ..] if !rest.is_empty() => rest,
        _ => raw,
    };
    hex::encode_upper(trimmed)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use rcgen::{CertificateParams, DnType, KeyPair, SerialNumber};

    /// Self-signed certificate for `names` with the given validity and serial
    pub(crate) fn self_signed(
        names: &[&str],
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
        serial: &[u8],
    ) -> IssuedCertificate {
        let key = KeyPair::generate().unwrap();
        let mut params =
            CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
                .unwrap();
        params.distinguished_name.push(DnType::CommonName, names[0]);
        params.not_before = ::time::OffsetDateTime::from_unix_timestamp(valid_from.timestamp()).unwrap();
        params.not_after = ::time::OffsetDateTime::from_unix_timestamp(valid_to.timestamp()).unwrap();
        params.serial_number = Some(SerialNumber::from_slice(serial));
        let cert = params.self_signed(&key).unwrap();

        IssuedCertificate {
            cert_chain_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        }
    }

    const SERIAL: [u8; 12] = [
        0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x01, 0x23, 0x45, 0x67,
    ];

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn entry(names: &[&str]) -> CacheEntry {
        let issued = self_signed(names, t0(), t0() + Duration::days(30), &SERIAL);
        CacheEntry::from_issued(names.iter().map(|n| n.to_string()).collect(), issued).unwrap()
    }

    #[test]
    fn test_entry_reads_validity_from_leaf() {
        let entry = entry(&["managed.lcl.host"]);
        assert_eq!(entry.valid_from, t0());
        assert_eq!(entry.valid_to, t0() + Duration::days(30));
    }

    #[test]
    fn test_entry_json_shape() {
        let json = entry(&["managed.lcl.host"]).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        for field in ["certPem", "keyPem", "identifiers", "validFrom", "validTo"] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert_eq!(value["validFrom"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_managed_certificate_metadata() {
        let cert = ManagedCertificate::new(entry(&["managed.lcl.host", "alt.lcl.host"])).unwrap();

        assert_eq!(cert.common_name(), "managed.lcl.host");
        assert_eq!(cert.all_names(), ["managed.lcl.host", "alt.lcl.host"]);
        assert_eq!(cert.identifiers(), cert.all_names());
        assert_eq!(cert.cert_chain().len(), 1);
        assert_eq!(cert.valid_from(), "2023-11-14T22:13:20Z");
        assert_eq!(cert.valid_to_date() - cert.valid_from_date(), Duration::days(30));
        assert!(cert.cert_pem().contains("BEGIN CERTIFICATE"));
        assert!(cert.key_pem().contains("PRIVATE KEY"));
    }

    #[test]
    fn test_serial_formats() {
        let cert = ManagedCertificate::new(entry(&["serial.lcl.host"])).unwrap();

        assert_eq!(cert.serial(), "123456789ABCDEF001234567");
        assert_eq!(cert.serial().len(), 24);
        assert_eq!(cert.hex_serial(), "12:34:56:78:9A:BC:DE:F0:01:23:45:67");
        assert_eq!(cert.hex_serial().len(), 35);
    }

    #[test]
    fn test_serial_hex_strips_sign_byte() {
        assert_eq!(serial_hex(&[0x00, 0x9a, 0x01]), "9A01");
        assert_eq!(serial_hex(&[0x00]), "00");
        assert_eq!(serial_hex(&[0x7f]), "7F");
    }

    #[test]
    fn test_secure_context_is_memoized() {
        let cert = ManagedCertificate::new(entry(&["context.lcl.host"])).unwrap();

        let first = cert.secure_context().unwrap();
        let second = cert.secure_context().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = ManagedCertificate::new(cert.entry().clone()).unwrap();
        assert!(!Arc::ptr_eq(&first, &other.secure_context().unwrap()));
    }

    #[test]
    fn test_rejects_bad_material() {
        let mut bad = entry(&["bad.lcl.host"]);
        bad.cert_pem = "not a certificate".to_string();
        assert!(matches!(
            ManagedCertificate::new(bad),
            Err(CertificateError::EmptyChain)
        ));

        let mut keyless = entry(&["bad.lcl.host"]);
        keyless.key_pem = String::new();
        let cert = ManagedCertificate::new(keyless).unwrap();
        assert!(matches!(
            cert.secure_context(),
            Err(CertificateError::MissingKey)
        ));

        let mut unnamed = entry(&["bad.lcl.host"]);
        unnamed.identifiers.clear();
        assert!(matches!(
            ManagedCertificate::new(unnamed),
            Err(CertificateError::NoIdentifiers)
        ));
    }
}
