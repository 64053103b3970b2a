//! Autocert configuration
//!
//! Resolves the settings a certificate manager runs with. Values are merged in
//! priority order:
//!
//! 1. Explicit parameters ([`ConfigParams`], from code or a TOML file)
//! 2. `ACME_*` environment fallbacks ([`AcmeEnvironment`])
//! 3. Built-in defaults
//!
//! The result is an immutable [`Configuration`]. [`Configuration::validate`]
//! checks every field and creates the working and cache directories.
//!
//! # Example
//!
//! ```toml
//! name = "edge"
//! directory-url = "https://acme.example.test/directory"
//! contact = "ops@example.com"
//! allow-identifiers = ["example.com", "*.example.com"]
//! tos-acceptors = ["regex:^https://acme.example.test/"]
//! cache-dir = "/var/lib/autocert"
//! renew-before-seconds = 1209600
//! ```

mod env;
mod error;
pub mod tos;

pub use env::{AcmeEnvironment, ENV_PREFIX};
pub use error::{ConfigField, ConfigLoadError, ConfigurationError};
pub use tos::{accepts_any, TermsOfServiceAcceptor};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tracing::{debug, trace};

use env::non_empty;

/// Renew 30 days before expiry unless configured otherwise
pub const DEFAULT_RENEW_BEFORE_SECONDS: i64 = 60 * 60 * 24 * 30;

/// Renew once half of the validity window has elapsed unless configured otherwise
pub const DEFAULT_RENEW_BEFORE_FRACTION: f64 = 0.5;

/// Recommended interval between background renewal checks
pub const DEFAULT_CHECK_EVERY_SECONDS: u64 = 60 * 60;

/// External account binding credentials issued by the CA
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExternalAccountBinding {
    /// Key identifier
    pub kid: String,
    /// Base64url encoded HMAC key
    pub hmac_key: String,
}

impl ExternalAccountBinding {
    pub fn new(kid: impl Into<String>, hmac_key: impl Into<String>) -> Self {
        Self {
            kid: kid.into(),
            hmac_key: hmac_key.into(),
        }
    }
}

/// Unresolved configuration parameters
///
/// Every field is optional; missing values fall back to the environment and
/// then to defaults during [`Configuration::resolve`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConfigParams {
    /// Label isolating this manager's account and cache entries
    pub name: Option<String>,
    /// ACME directory URL
    pub directory_url: Option<String>,
    /// Contact email used for account registration
    pub contact: Option<String>,
    /// External account binding
    pub external_account_binding: Option<ExternalAccountBinding>,
    /// Identifier policy descriptions, a single string or a list
    #[serde(default, deserialize_with = "one_or_many")]
    pub allow_identifiers: Option<Vec<String>>,
    /// Terms-of-service acceptors, a single acceptor or a list
    #[serde(default, deserialize_with = "one_or_many")]
    pub tos_acceptors: Option<Vec<TermsOfServiceAcceptor>>,
    /// Renew this many seconds before expiry
    pub renew_before_seconds: Option<i64>,
    /// Renew when this fraction of the validity window remains
    pub renew_before_fraction: Option<f64>,
    /// Recommended interval between renewal checks
    pub check_every_seconds: Option<u64>,
    /// Directory for issued certificates (in-memory cache when unset)
    pub cache_dir: Option<PathBuf>,
    /// Directory for account keys
    pub work_dir: Option<PathBuf>,
}

impl ConfigParams {
    /// Load parameters from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let params = toml::from_str(&content).map_err(|source| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded autocert configuration file");
        Ok(params)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(
        Option::<OneOrMany<T>>::deserialize(deserializer)?.map(|value| match value {
            OneOrMany::One(one) => vec![one],
            OneOrMany::Many(many) => many,
        }),
    )
}

/// Resolved, immutable configuration snapshot
#[derive(Debug, Clone)]
pub struct Configuration {
    name: Option<String>,
    directory_url: Option<String>,
    contact: Option<String>,
    external_account_binding: Option<ExternalAccountBinding>,
    allow_identifiers: Vec<String>,
    tos_acceptors: Vec<TermsOfServiceAcceptor>,
    renew_before_seconds: i64,
    renew_before_fraction: f64,
    check_every_seconds: u64,
    cache_dir: Option<PathBuf>,
    work_dir: PathBuf,
}

impl Configuration {
    /// Merge parameters with environment fallbacks and defaults
    pub fn resolve(params: ConfigParams, env: AcmeEnvironment) -> Self {
        let directory_url = non_empty(params.directory_url.as_deref())
            .or(non_empty(env.directory_url.as_deref()))
            .map(str::to_string);
        let contact = non_empty(params.contact.as_deref())
            .or(non_empty(env.contact.as_deref()))
            .map(str::to_string);

        let external_account_binding = params.external_account_binding.or_else(|| {
            let kid = non_empty(env.kid.as_deref())?;
            let hmac_key = non_empty(env.hmac_key.as_deref())?;
            Some(ExternalAccountBinding::new(kid, hmac_key))
        });

        let allow_identifiers = params
            .allow_identifiers
            .filter(|ids| !ids.is_empty())
            .or_else(|| env.allow_identifiers())
            .unwrap_or_default();

        let config = Self {
            name: params.name,
            directory_url,
            contact,
            external_account_binding,
            allow_identifiers,
            tos_acceptors: params.tos_acceptors.unwrap_or_default(),
            renew_before_seconds: params
                .renew_before_seconds
                .or(env.renew_before_seconds)
                .unwrap_or(DEFAULT_RENEW_BEFORE_SECONDS),
            renew_before_fraction: params
                .renew_before_fraction
                .or(env.renew_before_fraction)
                .unwrap_or(DEFAULT_RENEW_BEFORE_FRACTION),
            check_every_seconds: params
                .check_every_seconds
                .or(env.check_every_seconds)
                .unwrap_or(DEFAULT_CHECK_EVERY_SECONDS),
            cache_dir: params.cache_dir,
            work_dir: params
                .work_dir
                .unwrap_or_else(|| std::env::temp_dir().join("autocert")),
        };

        trace!(
            name = ?config.name,
            directory_url = ?config.directory_url,
            allow_identifiers = ?config.allow_identifiers,
            "Resolved autocert configuration"
        );

        config
    }

    /// Resolve against the current process environment
    pub fn from_params(params: ConfigParams) -> Result<Self, ConfigLoadError> {
        Ok(Self::resolve(params, AcmeEnvironment::from_env()?))
    }

    /// True when there is enough configuration to request certificates
    pub fn enabled(&self) -> bool {
        self.directory_url.is_some() && !self.allow_identifiers.is_empty()
    }

    /// Validate every field, creating `work_dir` and `cache_dir` if needed
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let directory_url = self.directory_url.as_deref().ok_or_else(|| {
            ConfigurationError::new(ConfigField::DirectoryUrl, "an ACME directory URL is required")
        })?;
        url::Url::parse(directory_url).map_err(|e| {
            ConfigurationError::new(
                ConfigField::DirectoryUrl,
                format!("'{directory_url}' is not a valid URL: {e}"),
            )
        })?;

        if self.allow_identifiers.is_empty() {
            return Err(ConfigurationError::new(
                ConfigField::AllowIdentifiers,
                "at least one identifier policy is required",
            ));
        }

        if non_empty(self.name.as_deref()).is_none() {
            return Err(ConfigurationError::new(ConfigField::Name, "a name is required"));
        }

        if self.renew_before_seconds <= 0 {
            return Err(ConfigurationError::new(
                ConfigField::RenewBeforeSeconds,
                format!("must be a positive number, got {}", self.renew_before_seconds),
            ));
        }

        if !(self.renew_before_fraction.is_finite() && self.renew_before_fraction > 0.0) {
            return Err(ConfigurationError::new(
                ConfigField::RenewBeforeFraction,
                format!("must be a positive number, got {}", self.renew_before_fraction),
            ));
        }

        if self.check_every_seconds == 0 {
            return Err(ConfigurationError::new(
                ConfigField::CheckEverySeconds,
                "must be a positive number",
            ));
        }

        if self.tos_acceptors.is_empty() {
            return Err(ConfigurationError::new(
                ConfigField::TosAcceptors,
                "at least one terms-of-service acceptor is required",
            ));
        }

        ensure_writable_dir(&self.work_dir, ConfigField::WorkDir)?;
        if let Some(cache_dir) = &self.cache_dir {
            ensure_writable_dir(cache_dir, ConfigField::CacheDir)?;
        }

        Ok(())
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn directory_url(&self) -> Option<&str> {
        self.directory_url.as_deref()
    }

    pub fn contact(&self) -> Option<&str> {
        self.contact.as_deref()
    }

    pub fn external_account_binding(&self) -> Option<&ExternalAccountBinding> {
        self.external_account_binding.as_ref()
    }

    /// Identifier policy descriptions, in configured order
    pub fn allow_identifiers(&self) -> &[String] {
        &self.allow_identifiers
    }

    pub fn tos_acceptors(&self) -> &[TermsOfServiceAcceptor] {
        &self.tos_acceptors
    }

    pub fn renew_before_seconds(&self) -> i64 {
        self.renew_before_seconds
    }

    pub fn renew_before_fraction(&self) -> f64 {
        self.renew_before_fraction
    }

    pub fn check_every_seconds(&self) -> u64 {
        self.check_every_seconds
    }

    /// Recommended interval between renewal checks
    pub fn check_every(&self) -> Duration {
        Duration::from_secs(self.check_every_seconds)
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}

/// Create `path` if missing and make sure files can be written inside it
fn ensure_writable_dir(path: &Path, field: ConfigField) -> Result<(), ConfigurationError> {
    fs::create_dir_all(path).map_err(|e| {
        ConfigurationError::new(field, format!("cannot create {}: {}", path.display(), e))
    })?;

    tempfile::NamedTempFile::new_in(path).map_err(|e| {
        ConfigurationError::new(field, format!("{} is not writable: {}", path.display(), e))
    })?;

    trace!(field = %field, path = %path.display(), "Directory is writable");
    Ok(())
}
