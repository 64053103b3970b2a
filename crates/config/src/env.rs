//! `ACME_*` environment fallbacks
//!
//! Environment values are captured once into an [`AcmeEnvironment`] and then
//! merged into [`Configuration`](crate::Configuration) during resolution.
//! Nothing else in the workspace reads the process environment.

use serde::Deserialize;

/// Prefix shared by every fallback variable
pub const ENV_PREFIX: &str = "ACME_";

/// Snapshot of the `ACME_*` environment variables
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AcmeEnvironment {
    /// `ACME_DIRECTORY_URL`
    pub directory_url: Option<String>,
    /// `ACME_CONTACT`
    pub contact: Option<String>,
    /// `ACME_KID`
    pub kid: Option<String>,
    /// `ACME_HMAC_KEY`
    pub hmac_key: Option<String>,
    /// `ACME_ALLOW_IDENTIFIERS`, comma separated
    pub allow_identifiers: Option<String>,
    /// `ACME_RENEW_BEFORE_SECONDS`
    pub renew_before_seconds: Option<i64>,
    /// `ACME_RENEW_BEFORE_FRACTION`
    pub renew_before_fraction: Option<f64>,
    /// `ACME_CHECK_EVERY_SECONDS`
    pub check_every_seconds: Option<u64>,
}

impl AcmeEnvironment {
    /// Read the current process environment
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed(ENV_PREFIX).from_env()
    }

    /// Build from explicit `(name, value)` pairs, e.g. `("ACME_KID", "...")`
    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX).from_iter(vars)
    }

    /// Allow identifiers split on commas, empty entries dropped
    pub fn allow_identifiers(&self) -> Option<Vec<String>> {
        let raw = non_empty(self.allow_identifiers.as_deref())?;
        let identifiers: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        (!identifiers.is_empty()).then_some(identifiers)
    }
}

/// Treats empty and whitespace-only values as unset
pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_reads_prefixed_values() {
        let env = AcmeEnvironment::from_vars(vars(&[
            ("ACME_DIRECTORY_URL", "https://ca.test/acme"),
            ("ACME_KID", "kid"),
            ("ACME_HMAC_KEY", "hmacKey"),
            ("ACME_RENEW_BEFORE_SECONDS", "42"),
            ("UNRELATED", "ignored"),
        ]))
        .unwrap();

        assert_eq!(env.directory_url.as_deref(), Some("https://ca.test/acme"));
        assert_eq!(env.kid.as_deref(), Some("kid"));
        assert_eq!(env.hmac_key.as_deref(), Some("hmacKey"));
        assert_eq!(env.renew_before_seconds, Some(42));
        assert!(env.contact.is_none());
    }

    #[test]
    fn test_allow_identifiers_are_comma_separated() {
        let env = AcmeEnvironment::from_vars(vars(&[(
            "ACME_ALLOW_IDENTIFIERS",
            "env.lcl.host, *.env.lcl.host,,",
        )]))
        .unwrap();

        assert_eq!(
            env.allow_identifiers(),
            Some(vec!["env.lcl.host".to_string(), "*.env.lcl.host".to_string()])
        );
    }

    #[test]
    fn test_blank_allow_identifiers_are_unset() {
        let env = AcmeEnvironment::from_vars(vars(&[("ACME_ALLOW_IDENTIFIERS", " ")])).unwrap();
        assert!(env.allow_identifiers().is_none());
    }

    #[test]
    fn test_malformed_number_is_an_error() {
        let result = AcmeEnvironment::from_vars(vars(&[("ACME_RENEW_BEFORE_SECONDS", "soon")]));
        assert!(result.is_err());
    }
}
