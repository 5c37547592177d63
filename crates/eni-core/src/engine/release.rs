//! Public address release and reattach

use super::{EngineEvent, EniEngine};
use crate::error::{Error, Result};
use crate::snapshot::{InstanceSnapshot, PublicAddressRecord};
use std::net::Ipv4Addr;
use tracing::{info, warn};

/// Result of a release request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The public address was unbound and released
    Released {
        private_address: Ipv4Addr,
        allocation_id: String,
    },

    /// The public address was released and a new one bound in its place
    Reattached {
        private_address: Ipv4Addr,
        released_allocation_id: String,
        record: PublicAddressRecord,
    },

    /// The address is the instance's own primary address; nothing was changed
    PrimaryAddressProtected { address: Ipv4Addr },
}

impl EniEngine {
    /// Unbind and release the public address bound to `private_address`
    ///
    /// With `reattach`, a new public address is allocated and bound to the
    /// same private address afterwards.
    ///
    /// # Returns
    ///
    /// - `Ok(ReleaseOutcome::PrimaryAddressProtected)`: Refused without any mutation
    /// - `Err(Error::NotBound)`: The snapshot has no binding for the address
    /// - `Err(Error::RemoteMutation)`: Disassociate, release or rebinding failed
    pub async fn release(
        &self,
        snapshot: &InstanceSnapshot,
        private_address: Ipv4Addr,
        reattach: bool,
    ) -> Result<ReleaseOutcome> {
        if snapshot.is_protected(private_address) {
            warn!("Unable to remove primary address {}", private_address);
            self.emit_event(EngineEvent::PrimaryAddressProtected {
                address: private_address,
            });
            return Ok(ReleaseOutcome::PrimaryAddressProtected {
                address: private_address,
            });
        }

        let record = snapshot
            .binding_for(private_address)
            .ok_or(Error::NotBound(private_address))?;
        let association_id = record
            .association_id
            .as_deref()
            .ok_or(Error::NotBound(private_address))?;

        info!(
            "Releasing {} from {} ({})",
            record.public_address, private_address, record.allocation_id
        );

        // Not transactional: a failure between the two calls leaves the
        // allocation in place without a binding.
        self.control_plane
            .disassociate_address(association_id)
            .await
            .map_err(|e| self.mutation_error("disassociate_address", e))?;
        self.control_plane
            .release_public_address(&record.allocation_id)
            .await
            .map_err(|e| self.mutation_error("release_public_address", e))?;

        self.emit_event(EngineEvent::AddressReleased {
            private_address,
            allocation_id: record.allocation_id.clone(),
        });

        if !reattach {
            return Ok(ReleaseOutcome::Released {
                private_address,
                allocation_id: record.allocation_id.clone(),
            });
        }

        let interface_id = record
            .network_interface_id
            .clone()
            .or_else(|| {
                snapshot
                    .interface_for(private_address)
                    .map(|i| i.interface_id.clone())
            })
            .ok_or_else(|| {
                Error::load(format!("no interface known for {}", private_address))
            })?;

        let interface = self.refresh_interface(&interface_id).await?;
        if !interface.contains(private_address) {
            return Err(Error::load(format!(
                "{} is no longer assigned to {}",
                private_address, interface_id
            )));
        }

        let new_record = self
            .allocate_and_bind(&interface.interface_id, private_address)
            .await?;

        Ok(ReleaseOutcome::Reattached {
            private_address,
            released_allocation_id: record.allocation_id.clone(),
            record: new_record,
        })
    }
}
