//! Terms-of-service acceptors
//!
//! An ACME directory may advertise a terms-of-service URI that must be agreed
//! to before an account can be registered. Acceptors decide whether that URI
//! is acceptable; a configured list is combined with OR semantics.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Prefix used for regex acceptors in configuration files
const REGEX_PREFIX: &str = "regex:";

/// Predicate over a terms-of-service URI
#[derive(Clone, Deserialize)]
#[serde(try_from = "String")]
pub enum TermsOfServiceAcceptor {
    /// Accepts every URI, including a directory that advertises none
    Any,
    /// Accepts URIs matching the pattern
    Regex(Regex),
}

impl TermsOfServiceAcceptor {
    /// Acceptor that agrees to any terms of service
    pub fn any() -> Self {
        TermsOfServiceAcceptor::Any
    }

    /// Acceptor that agrees to terms of service whose URI matches `pattern`
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(TermsOfServiceAcceptor::Regex(Regex::new(pattern)?))
    }

    /// The pattern of a regex acceptor
    pub fn pattern(&self) -> Option<&Regex> {
        match self {
            TermsOfServiceAcceptor::Any => None,
            TermsOfServiceAcceptor::Regex(regex) => Some(regex),
        }
    }

    /// Whether this acceptor agrees to the given terms-of-service URI
    pub fn accept(&self, uri: Option<&str>) -> bool {
        match self {
            TermsOfServiceAcceptor::Any => true,
            TermsOfServiceAcceptor::Regex(regex) => uri.is_some_and(|uri| regex.is_match(uri)),
        }
    }
}

/// True if any acceptor in the list agrees to `uri`.
pub fn accepts_any(acceptors: &[TermsOfServiceAcceptor], uri: Option<&str>) -> bool {
    acceptors.iter().any(|acceptor| acceptor.accept(uri))
}

impl fmt::Debug for TermsOfServiceAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermsOfServiceAcceptor::Any => f.write_str("Any"),
            TermsOfServiceAcceptor::Regex(regex) => {
                f.debug_tuple("Regex").field(&regex.as_str()).finish()
            }
        }
    }
}

/// Error parsing an acceptor from its configuration-file form
#[derive(Debug, Error)]
pub enum AcceptorParseError {
    #[error("unknown terms-of-service acceptor '{0}' (expected 'any' or 'regex:<pattern>')")]
    Unknown(String),

    #[error("invalid terms-of-service pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl FromStr for TermsOfServiceAcceptor {
    type Err = AcceptorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("any") {
            return Ok(TermsOfServiceAcceptor::Any);
        }
        match trimmed.strip_prefix(REGEX_PREFIX) {
            Some(pattern) => Ok(TermsOfServiceAcceptor::regex(pattern)?),
            None => Err(AcceptorParseError::Unknown(trimmed.to_string())),
        }
    }
}

impl TryFrom<String> for TermsOfServiceAcceptor {
    type Error = AcceptorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_any_accepts_uri() {
        assert!(TermsOfServiceAcceptor::any().accept(Some("tos_uri")));
    }

    #[test]
    fn test_any_accepts_missing_uri() {
        assert!(TermsOfServiceAcceptor::any().accept(None));
    }

    #[test]
    fn test_regex_matches() {
        let accept = TermsOfServiceAcceptor::regex(r"(?i)^https://example.com").unwrap();
        assert!(accept.accept(Some("https://example.com/tos")));
        assert!(accept.accept(Some("HTTPS://EXAMPLE.COM/tos")));
    }

    #[test]
    fn test_regex_rejects_non_matching() {
        let accept = TermsOfServiceAcceptor::regex(r"(?i)^https://example.com").unwrap();
        assert!(!accept.accept(Some("https://example.net/")));
        assert!(!accept.accept(None));
    }

    #[test]
    fn test_regex_is_stored() {
        let accept = TermsOfServiceAcceptor::regex(r"^https://regex.example.com").unwrap();
        assert_eq!(
            accept.pattern().map(Regex::as_str),
            Some(r"^https://regex.example.com")
        );
        assert!(TermsOfServiceAcceptor::any().pattern().is_none());
    }

    #[test]
    fn test_list_has_or_semantics() {
        let acceptors = vec![
            TermsOfServiceAcceptor::regex(r"^https://example.com").unwrap(),
            TermsOfServiceAcceptor::regex(r"^https://example.test").unwrap(),
        ];
        assert!(accepts_any(&acceptors, Some("https://example.test/terms")));
        assert!(!accepts_any(&acceptors, Some("https://other.test/terms")));
        assert!(!accepts_any(&[], Some("https://example.com")));
    }

    #[test]
    fn test_parse_from_config_form() {
        assert!(matches!(
            "any".parse::<TermsOfServiceAcceptor>(),
            Ok(TermsOfServiceAcceptor::Any)
        ));
        let parsed: TermsOfServiceAcceptor = "regex:^https://ca.test/".parse().unwrap();
        assert!(parsed.accept(Some("https://ca.test/tos.pdf")));
        assert!(matches!(
            "sometimes".parse::<TermsOfServiceAcceptor>(),
            Err(AcceptorParseError::Unknown(_))
        ));
        assert!(matches!(
            "regex:(".parse::<TermsOfServiceAcceptor>(),
            Err(AcceptorParseError::Pattern(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_any_accepts_everything(uri in ".*") {
            prop_assert!(TermsOfServiceAcceptor::any().accept(Some(&uri)));
        }
    }
}
