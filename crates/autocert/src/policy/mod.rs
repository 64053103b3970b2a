//! Identifier authorization policy
//!
//! Each configured description (`auth.example.com`, `*.example.com`,
//! `10.0.0.0/8`, ...) compiles into one [`PolicyCheck`]. An identifier is
//! allowed when any configured policy allows it.
//!
//! Descriptions are matched against a fixed registry probed in priority
//! order: wildcard hostname, plain hostname, then IP address or CIDR block.

mod hostname;
mod ip;
mod wildcard;

pub use hostname::HostnameCheck;
pub use ip::IpAddressCheck;
pub use wildcard::WildcardHostnameCheck;

use tracing::trace;

use crate::errors::IdentifierError;

/// Longest hostname accepted, in bytes
const MAX_HOSTNAME_LEN: usize = 253;

/// Longest single label accepted, in bytes
const MAX_LABEL_LEN: usize = 63;

/// Candidates with fewer labels are too generic to serve as a fallback name
const MIN_FALLBACK_LABELS: usize = 3;

/// A compiled identifier check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyCheck {
    WildcardHostname(WildcardHostnameCheck),
    Hostname(HostnameCheck),
    IpAddress(IpAddressCheck),
}

impl PolicyCheck {
    pub fn allow(&self, identifier: &str) -> bool {
        match self {
            PolicyCheck::WildcardHostname(check) => check.allow(identifier),
            PolicyCheck::Hostname(check) => check.allow(identifier),
            PolicyCheck::IpAddress(check) => check.allow(identifier),
        }
    }

    pub fn deny(&self, identifier: &str) -> bool {
        !self.allow(identifier)
    }

    /// The description this check was compiled from
    pub fn description(&self) -> &str {
        match self {
            PolicyCheck::WildcardHostname(check) => check.description(),
            PolicyCheck::Hostname(check) => check.description(),
            PolicyCheck::IpAddress(check) => check.description(),
        }
    }

    /// Name this check contributes when choosing a fallback identity
    fn fallback_candidate(&self) -> Option<&str> {
        match self {
            PolicyCheck::WildcardHostname(check) => Some(check.suffix()),
            PolicyCheck::Hostname(check) => Some(check.description()),
            PolicyCheck::IpAddress(_) => None,
        }
    }
}

/// One entry of the check registry
struct Registration {
    handles: fn(&str) -> bool,
    build: fn(&str) -> Option<PolicyCheck>,
}

/// Probed in order; the first registration that handles a description wins
const REGISTRY: &[Registration] = &[
    Registration {
        handles: WildcardHostnameCheck::handles,
        build: |d| Some(PolicyCheck::WildcardHostname(WildcardHostnameCheck::new(d))),
    },
    Registration {
        handles: HostnameCheck::handles,
        build: |d| Some(PolicyCheck::Hostname(HostnameCheck::new(d))),
    },
    Registration {
        handles: IpAddressCheck::handles,
        build: |d| IpAddressCheck::new(d).map(PolicyCheck::IpAddress),
    },
];

/// A single compiled identifier policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierPolicy {
    check: PolicyCheck,
}

impl IdentifierPolicy {
    /// Compile one description
    pub fn new(description: &str) -> Result<Self, IdentifierError> {
        let check = REGISTRY
            .iter()
            .find(|registration| (registration.handles)(description))
            .and_then(|registration| (registration.build)(description))
            .ok_or_else(|| IdentifierError::Unhandled(description.to_string()))?;

        trace!(description = %description, check = ?check, "Compiled identifier policy");
        Ok(Self { check })
    }

    /// Compile descriptions in order, one policy per description
    pub fn build<I, S>(descriptions: I) -> Result<Vec<Self>, IdentifierError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        descriptions
            .into_iter()
            .map(|description| Self::new(description.as_ref()))
            .collect()
    }

    pub fn allow(&self, identifier: &str) -> bool {
        self.check.allow(identifier)
    }

    pub fn deny(&self, identifier: &str) -> bool {
        self.check.deny(identifier)
    }

    pub fn description(&self) -> &str {
        self.check.description()
    }

    pub fn check(&self) -> &PolicyCheck {
        &self.check
    }

    /// Pick the name to certify when no requested identifier is allowed
    ///
    /// Wildcard policies contribute their suffix and hostname policies
    /// contribute themselves; IP policies never contribute. Candidates need
    /// at least three labels. The candidate with the fewest labels wins, and
    /// ties go to the earliest configured policy.
    pub fn fallback_identifier(policies: &[IdentifierPolicy]) -> Option<String> {
        policies
            .iter()
            .filter_map(|policy| policy.check.fallback_candidate())
            .map(|candidate| (candidate, candidate.split('.').count()))
            .filter(|(_, labels)| *labels >= MIN_FALLBACK_LABELS)
            .min_by_key(|(_, labels)| *labels)
            .map(|(candidate, _)| candidate.to_string())
    }
}

/// Whether any policy allows `identifier`
pub fn allowed_by_any(policies: &[IdentifierPolicy], identifier: &str) -> bool {
    policies.iter().any(|policy| policy.allow(identifier))
}

pub(crate) fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

pub(crate) fn is_valid_hostname(hostname: &str) -> bool {
    !hostname.is_empty()
        && hostname.len() <= MAX_HOSTNAME_LEN
        && hostname.split('.').all(is_valid_label)
}
