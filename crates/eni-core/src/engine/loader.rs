//! Instance state loading
//!
//! Builds one consistent [`InstanceSnapshot`] per cycle. No remote state is
//! changed here; any failed fetch fails the whole load.

use super::EniEngine;
use crate::error::{Error, Result};
use crate::snapshot::InstanceSnapshot;
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// Metadata path holding the instance identifier
const INSTANCE_ID_PATH: &str = "instance-id";

impl EniEngine {
    /// Load a snapshot of the instance's interfaces and public addresses
    ///
    /// # Returns
    ///
    /// - `Ok(InstanceSnapshot)`: A complete snapshot
    /// - `Err(Error::Load)`: If any fetch failed; no partial snapshot is returned
    pub async fn load(&self) -> Result<InstanceSnapshot> {
        let instance_id = self
            .control_plane
            .instance_metadata(INSTANCE_ID_PATH)
            .await
            .map_err(|e| Error::load(format!("instance metadata: {}", e)))?;
        let instance_id = instance_id.trim().to_string();
        if instance_id.is_empty() {
            return Err(Error::load("instance metadata returned an empty instance id"));
        }

        debug!("Loading state for instance {}", instance_id);

        // The three fetches are independent of each other.
        let (primary_address, description, addresses) = tokio::try_join!(
            self.resolve_primary_address(),
            async {
                self.control_plane
                    .describe_instance(&instance_id)
                    .await
                    .map_err(|e| Error::load(format!("describe instance {}: {}", instance_id, e)))
            },
            async {
                self.control_plane
                    .describe_addresses(&instance_id)
                    .await
                    .map_err(|e| Error::load(format!("describe addresses: {}", e)))
            },
        )?;

        if description.instance_id != instance_id {
            return Err(Error::load(format!(
                "described instance {} does not match {}",
                description.instance_id, instance_id
            )));
        }

        let snapshot = InstanceSnapshot::assemble(description, addresses, primary_address);

        info!(
            "Loaded instance {} ({}): {} interface(s), {} bound public address(es)",
            snapshot.instance_id(),
            snapshot.hardware_class(),
            snapshot.interfaces().len(),
            snapshot.binding_count()
        );

        Ok(snapshot)
    }

    /// Resolve the local primary address, enumerating interfaces only once
    async fn resolve_primary_address(&self) -> Result<Option<Ipv4Addr>> {
        self.primary_address
            .get_or_try_init(|| async {
                let primary = self
                    .identity
                    .primary_address()
                    .await
                    .map_err(|e| Error::load(format!("local identity: {}", e)))?;
                match primary {
                    Some(address) => debug!("Local primary address: {}", address),
                    None => debug!("No non-loopback IPv4 address found locally"),
                }
                Ok::<_, Error>(primary)
            })
            .await
            .copied()
    }
}
