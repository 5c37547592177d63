//! Instance inventory model
//!
//! An [`InstanceSnapshot`] is built once per reconciliation cycle and never
//! mutated. Steps that change remote state fetch fresh sub-views (for example
//! a refreshed [`InterfaceView`]) instead of writing back into the snapshot.

use std::collections::HashMap;
use std::net::Ipv4Addr;

/// A private address on an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivateAddress {
    /// The private IPv4 address
    pub address: Ipv4Addr,
    /// Whether a public address is currently bound to it
    pub has_public_binding: bool,
}

impl PrivateAddress {
    /// A private address with no public binding
    pub fn unbound(address: Ipv4Addr) -> Self {
        Self {
            address,
            has_public_binding: false,
        }
    }

    /// A private address with a public binding
    pub fn bound(address: Ipv4Addr) -> Self {
        Self {
            address,
            has_public_binding: true,
        }
    }
}

/// One attached (or freshly created) network interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceView {
    /// Interface identifier (e.g. "eni-0abc")
    pub interface_id: String,
    /// Device index, when the interface is attached
    pub device_index: Option<u32>,
    /// Private addresses; the first entry is the interface's primary address
    pub private_addresses: Vec<PrivateAddress>,
}

impl InterfaceView {
    /// Create a new interface view
    pub fn new(interface_id: impl Into<String>, private_addresses: Vec<PrivateAddress>) -> Self {
        Self {
            interface_id: interface_id.into(),
            device_index: None,
            private_addresses,
        }
    }

    /// Set the device index
    pub fn with_device_index(mut self, device_index: u32) -> Self {
        self.device_index = Some(device_index);
        self
    }

    /// The interface's primary private address
    pub fn primary_address(&self) -> Option<Ipv4Addr> {
        self.private_addresses.first().map(|a| a.address)
    }

    /// Number of private addresses currently on the interface
    pub fn address_count(&self) -> usize {
        self.private_addresses.len()
    }

    /// Private addresses lacking a public binding, in interface order
    pub fn unbound_addresses(&self) -> Vec<Ipv4Addr> {
        self.private_addresses
            .iter()
            .filter(|a| !a.has_public_binding)
            .map(|a| a.address)
            .collect()
    }

    /// Whether the interface carries the given private address
    pub fn contains(&self, address: Ipv4Addr) -> bool {
        self.private_addresses.iter().any(|a| a.address == address)
    }
}

/// A public (elastic) address and its current binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicAddressRecord {
    /// Handle for releasing the address resource
    pub allocation_id: String,
    /// Handle for unbinding; present only while bound
    pub association_id: Option<String>,
    /// The public address (informational)
    pub public_address: Ipv4Addr,
    /// Private address the public address is bound to
    pub private_address: Option<Ipv4Addr>,
    /// Interface carrying the bound private address
    pub network_interface_id: Option<String>,
}

/// Full description of an instance as returned by the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescription {
    /// Instance identifier
    pub instance_id: String,
    /// Hardware class (instance type)
    pub hardware_class: String,
    /// Subnet new interfaces are created in
    pub subnet_id: String,
    /// Security groups new interfaces are created with
    pub security_group_ids: Vec<String>,
    /// Attached interfaces in device order
    pub interfaces: Vec<InterfaceView>,
}

/// Immutable per-cycle view of an instance's interface and address inventory
#[derive(Debug, Clone)]
pub struct InstanceSnapshot {
    instance_id: String,
    hardware_class: String,
    subnet_id: String,
    security_group_ids: Vec<String>,
    interfaces: Vec<InterfaceView>,
    address_index: HashMap<Ipv4Addr, PublicAddressRecord>,
    primary_address: Option<Ipv4Addr>,
}

impl InstanceSnapshot {
    /// Assemble a snapshot from an instance description and its bound public addresses
    ///
    /// Interfaces are ordered by device index; records without a private
    /// address are not indexed. `primary_address` is the instance's own
    /// address as recognized on the host.
    pub fn assemble(
        description: InstanceDescription,
        addresses: Vec<PublicAddressRecord>,
        primary_address: Option<Ipv4Addr>,
    ) -> Self {
        let mut interfaces = description.interfaces;
        // Attached interfaces sort by index; anything without one goes last.
        interfaces.sort_by_key(|i| i.device_index.unwrap_or(u32::MAX));

        let address_index = addresses
            .into_iter()
            .filter_map(|record| record.private_address.map(|ip| (ip, record)))
            .collect();

        Self {
            instance_id: description.instance_id,
            hardware_class: description.hardware_class,
            subnet_id: description.subnet_id,
            security_group_ids: description.security_group_ids,
            interfaces,
            address_index,
            primary_address,
        }
    }

    /// Instance identifier
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Hardware class used to look up capacity limits
    pub fn hardware_class(&self) -> &str {
        &self.hardware_class
    }

    /// Subnet new interfaces are created in
    pub fn subnet_id(&self) -> &str {
        &self.subnet_id
    }

    /// Security groups new interfaces are created with
    pub fn security_group_ids(&self) -> &[String] {
        &self.security_group_ids
    }

    /// Interfaces in device order
    pub fn interfaces(&self) -> &[InterfaceView] {
        &self.interfaces
    }

    /// The instance's own primary private address, if recognized locally
    pub fn primary_address(&self) -> Option<Ipv4Addr> {
        self.primary_address
    }

    /// Whether the address must never be released
    pub fn is_protected(&self, address: Ipv4Addr) -> bool {
        self.primary_address == Some(address)
    }

    /// The public address currently bound to a private address
    pub fn binding_for(&self, address: Ipv4Addr) -> Option<&PublicAddressRecord> {
        self.address_index.get(&address)
    }

    /// Number of indexed public-address bindings
    pub fn binding_count(&self) -> usize {
        self.address_index.len()
    }

    /// The interface carrying a private address
    pub fn interface_for(&self, address: Ipv4Addr) -> Option<&InterfaceView> {
        self.interfaces.iter().find(|i| i.contains(address))
    }
}
