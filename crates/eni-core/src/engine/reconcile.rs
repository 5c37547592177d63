//! Interface reconciliation
//!
//! Drives the instance toward its hardware-class capacity: every attached
//! interface filled to the per-interface address limit, every private
//! address bound to a public address, and interfaces added until the
//! interface limit is reached.

use super::{EngineEvent, EniEngine};
use crate::capacity::CapacityLimits;
use crate::error::{Error, Result};
use crate::snapshot::{InstanceSnapshot, InterfaceView, PublicAddressRecord};
use crate::traits::{AttachInterfaceRequest, CreateInterfaceRequest};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, info};

/// An interface created during reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedInterface {
    /// Interface identifier
    pub interface_id: String,
    /// Device index it was attached at
    pub device_index: u32,
}

/// Summary of one reconciliation run
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    /// Instance that was reconciled
    pub instance_id: String,
    /// Limits that were applied
    pub limits: CapacityLimits,
    /// Secondary private addresses requested across all interfaces
    pub addresses_requested: usize,
    /// Attached interfaces that received additional addresses
    pub interfaces_filled: usize,
    /// Interfaces created and attached, in creation order
    pub interfaces_created: Vec<CreatedInterface>,
    /// Public addresses bound
    pub bindings: Vec<PublicAddressRecord>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: Option<DateTime<Utc>>,
}

impl ReconcileReport {
    fn new(instance_id: &str, limits: CapacityLimits) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            limits,
            addresses_requested: 0,
            interfaces_filled: 0,
            interfaces_created: Vec::new(),
            bindings: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Number of mutating remote calls the run issued
    pub fn mutation_count(&self) -> usize {
        // A binding is allocate + associate; a new interface is create + attach.
        self.interfaces_filled + self.interfaces_created.len() * 2 + self.bindings.len() * 2
    }

    /// Whether the instance was already at capacity
    pub fn is_noop(&self) -> bool {
        self.addresses_requested == 0
            && self.interfaces_created.is_empty()
            && self.bindings.is_empty()
    }
}

impl EniEngine {
    /// Converge the instance described by `snapshot` to its capacity
    ///
    /// Existing interfaces are completed before new interfaces are added.
    /// A failed mutation aborts the remaining steps; nothing is rolled back.
    ///
    /// # Returns
    ///
    /// - `Ok(ReconcileReport)`: What was changed
    /// - `Err(Error::UnknownHardwareClass)`: No capacity entry; nothing was changed
    /// - `Err(Error::RemoteMutation)`: A mutation failed partway
    pub async fn reconcile(&self, snapshot: &InstanceSnapshot) -> Result<ReconcileReport> {
        let limits = self
            .capacity
            .lookup(snapshot.hardware_class())
            .ok_or_else(|| Error::unknown_hardware_class(snapshot.hardware_class()))?;

        info!(
            "Reconciling {} ({}): target {} interface(s) x {} address(es)",
            snapshot.instance_id(),
            snapshot.hardware_class(),
            limits.max_interfaces,
            limits.max_addresses_per_interface
        );
        self.emit_event(EngineEvent::CycleStarted {
            instance_id: snapshot.instance_id().to_string(),
            hardware_class: snapshot.hardware_class().to_string(),
        });

        let mut report = ReconcileReport::new(snapshot.instance_id(), limits);

        for interface in snapshot.interfaces() {
            let current = self.fill_interface(interface, limits, &mut report).await?;

            let unbound = current.unbound_addresses();
            if unbound.is_empty() {
                debug!("All addresses on {} are bound", current.interface_id);
                continue;
            }
            let records = self.bind_addresses(&current.interface_id, &unbound).await?;
            report.bindings.extend(records);
        }

        let missing = limits
            .max_interfaces
            .saturating_sub(snapshot.interfaces().len());
        for device_index in free_device_indices(snapshot.interfaces(), missing)? {
            self.add_interface(snapshot, device_index, limits, &mut report)
                .await?;
        }

        report.finished_at = Some(Utc::now());
        info!(
            "Reconciled {}: {} address(es) requested, {} interface(s) created, {} binding(s)",
            snapshot.instance_id(),
            report.addresses_requested,
            report.interfaces_created.len(),
            report.bindings.len()
        );
        self.emit_event(EngineEvent::CycleFinished {
            instance_id: snapshot.instance_id().to_string(),
            mutations: report.mutation_count(),
        });

        Ok(report)
    }

    /// Request missing private addresses on an interface
    ///
    /// Returns the interface as it should be used for binding: re-fetched if
    /// addresses were requested, unchanged otherwise.
    async fn fill_interface(
        &self,
        interface: &InterfaceView,
        limits: CapacityLimits,
        report: &mut ReconcileReport,
    ) -> Result<InterfaceView> {
        let deficit = limits
            .max_addresses_per_interface
            .saturating_sub(interface.address_count());
        if deficit == 0 {
            return Ok(interface.clone());
        }

        info!(
            "Requesting {} secondary address(es) on {}",
            deficit, interface.interface_id
        );
        self.control_plane
            .assign_secondary_addresses(&interface.interface_id, deficit)
            .await
            .map_err(|e| self.mutation_error("assign_secondary_addresses", e))?;

        report.addresses_requested += deficit;
        report.interfaces_filled += 1;
        self.emit_event(EngineEvent::AddressesRequested {
            interface_id: interface.interface_id.clone(),
            count: deficit,
        });

        // The new addresses are unbound and must be visible to the binding pass.
        let mut refreshed = self.refresh_interface(&interface.interface_id).await?;
        if refreshed.device_index.is_none() {
            refreshed.device_index = interface.device_index;
        }
        Ok(refreshed)
    }

    /// Create an interface, attach it at `device_index` and bind all its addresses
    async fn add_interface(
        &self,
        snapshot: &InstanceSnapshot,
        device_index: u32,
        limits: CapacityLimits,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let request = CreateInterfaceRequest {
            subnet_id: snapshot.subnet_id().to_string(),
            // The primary address counts toward the per-interface limit.
            secondary_address_count: limits.max_addresses_per_interface.saturating_sub(1),
            security_group_ids: snapshot.security_group_ids().to_vec(),
            description: self.interface_description.clone(),
        };

        debug!("Creating interface for device index {}", device_index);
        let created = self
            .control_plane
            .create_interface(&request)
            .await
            .map_err(|e| self.mutation_error("create_interface", e))?;

        info!(
            "Attaching {} to {} at device index {}",
            created.interface_id,
            snapshot.instance_id(),
            device_index
        );
        self.control_plane
            .attach_interface(&AttachInterfaceRequest {
                interface_id: created.interface_id.clone(),
                instance_id: snapshot.instance_id().to_string(),
                device_index,
            })
            .await
            .map_err(|e| self.mutation_error("attach_interface", e))?;

        report.interfaces_created.push(CreatedInterface {
            interface_id: created.interface_id.clone(),
            device_index,
        });
        self.emit_event(EngineEvent::InterfaceCreated {
            interface_id: created.interface_id.clone(),
            device_index,
        });

        // A new interface has no bindings, so every address is bound.
        let addresses: Vec<_> = created.private_addresses.iter().map(|a| a.address).collect();
        let records = self.bind_addresses(&created.interface_id, &addresses).await?;
        report.bindings.extend(records);

        Ok(())
    }
}

/// Device indices for `count` new interfaces
///
/// Candidates start at the number of attached interfaces and skip any index
/// already taken, so a gap below that count is never filled.
fn free_device_indices(attached: &[InterfaceView], count: usize) -> Result<Vec<u32>> {
    let start = u32::try_from(attached.len())
        .map_err(|_| Error::config(format!("too many attached interfaces: {}", attached.len())))?;
    let occupied: HashSet<u32> = attached.iter().filter_map(|i| i.device_index).collect();

    Ok((start..=u32::MAX)
        .filter(|index| !occupied.contains(index))
        .take(count)
        .collect())
}
