// # Local Identity Trait
//
// Enumerates the host's own IPv4 addresses so the engine can recognize the
// instance's primary private address and refuse to release it.
//
// ## Implementations
//
// - Netlink-based (Linux): `eni-ip-netlink` crate

use async_trait::async_trait;
use std::net::Ipv4Addr;

/// Trait for local identity resolvers
///
/// # Trust Level: Semi-Trusted
///
/// Resolvers may perform platform-specific I/O (Netlink, sysfs) but never
/// call the control plane and never decide what to mutate.
#[async_trait]
pub trait LocalIdentity: Send + Sync {
    /// Non-loopback IPv4 addresses configured on the host, in enumeration order
    async fn local_ipv4_addresses(&self) -> Result<Vec<Ipv4Addr>, crate::Error>;

    /// The address treated as the instance's own primary address
    ///
    /// The first enumerated address belongs to the lowest-indexed interface,
    /// which carries the instance's primary private address.
    async fn primary_address(&self) -> Result<Option<Ipv4Addr>, crate::Error> {
        Ok(self.local_ipv4_addresses().await?.into_iter().next())
    }
}

/// A fixed set of addresses, for hosts where enumeration is unavailable
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    addresses: Vec<Ipv4Addr>,
}

impl StaticIdentity {
    /// Create a resolver that always reports the given addresses
    pub fn new(addresses: Vec<Ipv4Addr>) -> Self {
        Self {
            addresses: addresses.into_iter().filter(|a| !a.is_loopback()).collect(),
        }
    }
}

#[async_trait]
impl LocalIdentity for StaticIdentity {
    async fn local_ipv4_addresses(&self) -> Result<Vec<Ipv4Addr>, crate::Error> {
        Ok(self.addresses.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_identity_skips_loopback_and_reports_first_as_primary() {
        let identity = StaticIdentity::new(vec![
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::new(10, 0, 0, 10),
            Ipv4Addr::new(10, 0, 1, 10),
        ]);

        let addresses = identity.local_ipv4_addresses().await.unwrap();
        assert_eq!(addresses.len(), 2);
        assert_eq!(
            identity.primary_address().await.unwrap(),
            Some(Ipv4Addr::new(10, 0, 0, 10))
        );
    }

    #[tokio::test]
    async fn empty_identity_has_no_primary() {
        let identity = StaticIdentity::default();
        assert_eq!(identity.primary_address().await.unwrap(), None);
    }
}
