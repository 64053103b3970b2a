//! Single-label wildcard matching (`*.example.com`)

use super::{is_valid_hostname, is_valid_label};

const WILDCARD_PREFIX: &str = "*.";

/// Allows exactly one label in front of a fixed suffix
///
/// `*.example.com` allows `api.example.com` but neither `example.com` nor
/// `a.b.example.com`. The leading label of a candidate must itself be a valid
/// hostname label, or the literal `*` so that the wildcard name itself is
/// allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardHostnameCheck {
    description: String,
    suffix: String,
}

impl WildcardHostnameCheck {
    /// True for `*.` followed by a valid hostname
    pub fn handles(description: &str) -> bool {
        description
            .strip_prefix(WILDCARD_PREFIX)
            .is_some_and(is_valid_hostname)
    }

    pub(crate) fn new(description: &str) -> Self {
        let suffix = description
            .strip_prefix(WILDCARD_PREFIX)
            .unwrap_or(description)
            .to_string();
        Self {
            description: description.to_string(),
            suffix,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The description with its wildcard label removed
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn allow(&self, identifier: &str) -> bool {
        let Some((label, rest)) = identifier.split_once('.') else {
            return false;
        };
        rest.eq_ignore_ascii_case(&self.suffix) && (label == "*" || is_valid_label(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(description: &str) -> WildcardHostnameCheck {
        assert!(WildcardHostnameCheck::handles(description));
        WildcardHostnameCheck::new(description)
    }

    #[test]
    fn test_handles() {
        assert!(WildcardHostnameCheck::handles("*.example.com"));
        assert!(WildcardHostnameCheck::handles("*.lcl.host"));
        assert!(!WildcardHostnameCheck::handles("example.com"));
        assert!(!WildcardHostnameCheck::handles("*example.com"));
        assert!(!WildcardHostnameCheck::handles("*.*.example.com"));
        assert!(!WildcardHostnameCheck::handles("api.*.example.com"));
        assert!(!WildcardHostnameCheck::handles("*."));
    }

    #[test]
    fn test_covers_exactly_one_label() {
        let check = check("*.example.com");
        assert_eq!(check.suffix(), "example.com");
        assert!(check.allow("api.example.com"));
        assert!(check.allow("API.EXAMPLE.COM"));
        assert!(!check.allow("example.com"));
        assert!(!check.allow("a.b.example.com"));
        assert!(!check.allow(".example.com"));
        assert!(!check.allow("com"));
    }

    #[test]
    fn test_leading_label_must_be_valid() {
        let check = check("*.example.com");
        assert!(!check.allow("-bad.example.com"));
        assert!(!check.allow("bad-.example.com"));
        assert!(!check.allow("b_d.example.com"));
        assert!(!check.allow(&format!("{}.example.com", "a".repeat(64))));
        assert!(check.allow(&format!("{}.example.com", "a".repeat(63))));
    }

    #[test]
    fn test_allows_the_wildcard_name_itself() {
        let check = check("*.host.example.com");
        assert!(check.allow("*.host.example.com"));
        assert!(!check.allow("api.*.host.example.com"));
        assert!(!check.allow("api.hostDexample.com"));
    }
}
