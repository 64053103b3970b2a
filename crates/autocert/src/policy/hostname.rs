//! Exact hostname matching

use std::net::IpAddr;

use super::is_valid_hostname;

/// Allows a single hostname, compared case-insensitively
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostnameCheck {
    description: String,
}

impl HostnameCheck {
    /// True for syntactically valid hostnames that are not IP literals
    pub fn handles(description: &str) -> bool {
        description.parse::<IpAddr>().is_err() && is_valid_hostname(description)
    }

    pub(crate) fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn allow(&self, identifier: &str) -> bool {
        identifier.eq_ignore_ascii_case(&self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_handles() {
        assert!(HostnameCheck::handles("auth.example.com"));
        assert!(HostnameCheck::handles("localhost"));
        assert!(!HostnameCheck::handles("*.example.com"));
        assert!(!HostnameCheck::handles("192.168.1.1"));
        assert!(!HostnameCheck::handles("192.168.1.1/24"));
        assert!(!HostnameCheck::handles("-bad.example.com"));
        assert!(!HostnameCheck::handles(""));
    }

    #[test]
    fn test_allow_is_case_insensitive() {
        let check = HostnameCheck::new("auth.example.com");
        assert!(check.allow("auth.example.com"));
        assert!(check.allow("AUTH.Example.COM"));
        assert!(!check.allow("auth.example.co"));
        assert!(!check.allow("api.auth.example.com"));
        assert!(!check.allow(""));
    }

    proptest! {
        #[test]
        fn prop_allows_itself_in_any_case(h in "[a-z][a-z0-9]{0,10}(\\.[a-z][a-z0-9]{0,10}){1,3}") {
            let check = HostnameCheck::new(&h);
            prop_assert!(check.allow(&h));
            prop_assert!(check.allow(&h.to_uppercase()));
            let hx = format!("{h}x");
            prop_assert!(!check.allow(&hx));
        }
    }
}
