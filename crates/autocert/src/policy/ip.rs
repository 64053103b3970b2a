//! IP address and CIDR block matching

use std::net::IpAddr;

use ipnet::IpNet;

/// Allows a literal IP address or any address inside a CIDR block
///
/// Literal descriptions compare by exact string equality, so `::1` does not
/// allow `0:0:0:0:0:0:0:1`. Identifiers that are not IP addresses are denied.
///
/// Policy only: [`InstantAcmeClient`](crate::acme::InstantAcmeClient) cannot
/// order IP identifiers with `instant-acme` 0.7 and fails such orders with
/// [`AcmeError::UnsupportedIdentifier`](crate::acme::AcmeError::UnsupportedIdentifier).
/// Issuing for an allowed address needs an [`AcmeClient`](crate::acme::AcmeClient)
/// that supports IP identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpAddressCheck {
    description: String,
    network: Option<IpNet>,
}

impl IpAddressCheck {
    pub fn handles(description: &str) -> bool {
        description.parse::<IpAddr>().is_ok() || description.parse::<IpNet>().is_ok()
    }

    pub(crate) fn new(description: &str) -> Option<Self> {
        let network = if description.parse::<IpAddr>().is_ok() {
            None
        } else {
            Some(description.parse::<IpNet>().ok()?)
        };
        Some(Self {
            description: description.to_string(),
            network,
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The CIDR block, if the description is not a literal address
    pub fn network(&self) -> Option<&IpNet> {
        self.network.as_ref()
    }

    pub fn allow(&self, identifier: &str) -> bool {
        match &self.network {
            None => identifier == self.description,
            Some(network) => identifier
                .parse::<IpAddr>()
                .is_ok_and(|addr| network.contains(&addr)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles() {
        assert!(IpAddressCheck::handles("192.168.1.42"));
        assert!(IpAddressCheck::handles("192.168.1.1/24"));
        assert!(IpAddressCheck::handles("fd00::/8"));
        assert!(IpAddressCheck::handles("::1"));
        assert!(!IpAddressCheck::handles("example.com"));
        assert!(!IpAddressCheck::handles("192.168.1.1/33"));
    }

    #[test]
    fn test_cidr_containment() {
        let check = IpAddressCheck::new("192.168.1.1/24").unwrap();
        assert!(check.network().is_some());
        assert!(check.allow("192.168.1.42"));
        assert!(check.allow("192.168.1.255"));
        assert!(!check.allow("192.168.2.42"));
        assert!(!check.allow("example.com"));
        assert!(!check.allow("fd00::1"));
    }

    #[test]
    fn test_literal_is_exact() {
        let check = IpAddressCheck::new("192.168.1.42").unwrap();
        assert!(check.network().is_none());
        assert!(check.allow("192.168.1.42"));
        assert!(!check.allow("192.168.1.43"));
        assert!(!check.allow("192.168.1.42/32"));
        assert!(!check.allow("host.example.com"));
    }

    #[test]
    fn test_ipv6_block() {
        let check = IpAddressCheck::new("fd00::/8").unwrap();
        assert!(check.allow("fd12:3456::1"));
        assert!(!check.allow("fe80::1"));
    }
}
