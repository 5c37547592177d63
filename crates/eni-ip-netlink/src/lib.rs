// # Netlink Local Identity
//
// This crate provides a Netlink-based `LocalIdentity` for Linux systems.
//
// ## Implementation
//
// Each call opens a route Netlink socket, dumps all addresses, and closes
// the socket again. The connection task spawned for the dump ends as soon
// as the handle is dropped, so nothing outlives the call.
//
// Addresses are reported in interface-index order. The lowest-indexed
// non-loopback interface carries the instance's primary private address, so
// the first reported address is the primary.
//
// ## Platform Support
//
// Netlink is Linux-only. On other platforms the resolver compiles but every
// call fails with a local identity error.

use async_trait::async_trait;
use eni_core::traits::LocalIdentity;
use eni_core::{Error, Result};
use std::net::Ipv4Addr;

/// Netlink-based resolver for the host's IPv4 addresses
#[derive(Debug, Clone, Default)]
pub struct NetlinkIdentity {
    /// Only report addresses on this interface index, when set
    link_index: Option<u32>,
}

impl NetlinkIdentity {
    /// Resolver over all interfaces
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver restricted to one interface index
    pub fn for_link(link_index: u32) -> Self {
        Self {
            link_index: Some(link_index),
        }
    }
}

/// Order dumped (interface index, address) pairs and drop loopback entries
///
/// The sort is stable, so addresses on one interface keep dump order.
fn ordered_ipv4(mut entries: Vec<(u32, Ipv4Addr)>) -> Vec<Ipv4Addr> {
    entries.retain(|(_, address)| !address.is_loopback());
    entries.sort_by_key(|(index, _)| *index);
    entries.into_iter().map(|(_, address)| address).collect()
}

#[cfg(target_os = "linux")]
mod platform {
    use super::*;
    use futures::StreamExt;
    use netlink_packet_route::AddressFamily;
    use netlink_packet_route::address::AddressAttribute;
    use std::net::IpAddr;

    /// Dump IPv4 addresses as (interface index, address) pairs
    pub(super) async fn dump_ipv4(link_index: Option<u32>) -> Result<Vec<(u32, Ipv4Addr)>> {
        let (connection, handle, _) = rtnetlink::new_connection()
            .map_err(|e| Error::local_identity(format!("unable to create netlink socket: {}", e)))?;
        tokio::spawn(connection);

        let mut request = handle.address().get();
        if let Some(index) = link_index {
            request = request.set_link_index_filter(index);
        }
        let mut addresses = request.execute();

        let mut entries = Vec::new();
        while let Some(message) = addresses.next().await {
            let message = message
                .map_err(|e| Error::local_identity(format!("netlink address dump failed: {}", e)))?;
            if message.header.family != AddressFamily::Inet {
                continue;
            }
            for attribute in &message.attributes {
                if let AddressAttribute::Address(IpAddr::V4(v4)) = attribute {
                    entries.push((message.header.index, *v4));
                    break;
                }
            }
        }

        Ok(entries)
    }
}

#[cfg(target_os = "linux")]
#[async_trait]
impl LocalIdentity for NetlinkIdentity {
    async fn local_ipv4_addresses(&self) -> Result<Vec<Ipv4Addr>> {
        let entries = platform::dump_ipv4(self.link_index).await?;
        let addresses = ordered_ipv4(entries);
        tracing::debug!("Enumerated {} local IPv4 address(es)", addresses.len());
        Ok(addresses)
    }
}

#[cfg(not(target_os = "linux"))]
#[async_trait]
impl LocalIdentity for NetlinkIdentity {
    async fn local_ipv4_addresses(&self) -> Result<Vec<Ipv4Addr>> {
        Err(Error::local_identity(
            "Netlink local identity is only supported on Linux",
        ))
    }
}
