//! Public address allocation and binding
//!
//! Allocate and associate are two remote calls with no transaction between
//! them. When association fails the allocation is either left in place and
//! reported as leaked, or released again if
//! `release_unassociated_allocations` is set.

use super::{EngineEvent, EniEngine};
use crate::error::Result;
use crate::snapshot::PublicAddressRecord;
use crate::traits::AssociateAddressRequest;
use std::net::Ipv4Addr;
use tracing::{debug, error, info, warn};

impl EniEngine {
    /// Allocate a new public address and bind it to a private address
    ///
    /// The snapshot is not updated; callers needing fresh state must re-load.
    ///
    /// # Parameters
    ///
    /// - `interface_id`: Interface carrying the private address
    /// - `private_address`: The private address to bind
    pub async fn allocate_and_bind(
        &self,
        interface_id: &str,
        private_address: Ipv4Addr,
    ) -> Result<PublicAddressRecord> {
        debug!("Allocating public address for {} on {}", private_address, interface_id);

        let allocation = self
            .control_plane
            .allocate_public_address()
            .await
            .map_err(|e| self.mutation_error("allocate_public_address", e))?;

        let request = AssociateAddressRequest {
            interface_id: interface_id.to_string(),
            allocation_id: allocation.allocation_id.clone(),
            private_address,
        };

        let association_id = match self.control_plane.associate_address(&request).await {
            Ok(association_id) => association_id,
            Err(e) => {
                let err = self.mutation_error("associate_address", e);
                self.handle_unassociated(&allocation.allocation_id, private_address, &err)
                    .await;
                return Err(err);
            }
        };

        info!(
            "Bound {} -> {} on {} ({})",
            allocation.public_address, private_address, interface_id, allocation.allocation_id
        );
        self.emit_event(EngineEvent::AddressBound {
            interface_id: interface_id.to_string(),
            private_address,
            public_address: allocation.public_address,
            allocation_id: allocation.allocation_id.clone(),
        });

        Ok(PublicAddressRecord {
            allocation_id: allocation.allocation_id,
            association_id: Some(association_id),
            public_address: allocation.public_address,
            private_address: Some(private_address),
            network_interface_id: Some(interface_id.to_string()),
        })
    }

    /// Deal with an allocation whose association failed
    async fn handle_unassociated(
        &self,
        allocation_id: &str,
        private_address: Ipv4Addr,
        cause: &crate::Error,
    ) {
        if !self.release_unassociated_allocations {
            warn!(
                "Allocation {} left unassociated after binding {} failed: {}",
                allocation_id, private_address, cause
            );
            self.emit_event(EngineEvent::AllocationLeaked {
                allocation_id: allocation_id.to_string(),
                private_address,
                error: cause.to_string(),
            });
            return;
        }

        match self.control_plane.release_public_address(allocation_id).await {
            Ok(()) => {
                info!(
                    "Released allocation {} after binding {} failed",
                    allocation_id, private_address
                );
                self.emit_event(EngineEvent::AllocationCompensated {
                    allocation_id: allocation_id.to_string(),
                    private_address,
                });
            }
            Err(release_err) => {
                error!(
                    "Failed to release unassociated allocation {}: {}",
                    allocation_id, release_err
                );
                self.emit_event(EngineEvent::AllocationLeaked {
                    allocation_id: allocation_id.to_string(),
                    private_address,
                    error: release_err.to_string(),
                });
            }
        }
    }

    /// Bind every given address, attempting all before surfacing a failure
    ///
    /// Returns the created records, or the first failure once every address
    /// has been attempted.
    pub(super) async fn bind_addresses(
        &self,
        interface_id: &str,
        addresses: &[Ipv4Addr],
    ) -> Result<Vec<PublicAddressRecord>> {
        let mut records = Vec::with_capacity(addresses.len());
        let mut first_error = None;

        for &address in addresses {
            match self.allocate_and_bind(interface_id, address).await {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!("Failed to bind public address to {}: {}", address, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(records),
        }
    }
}
