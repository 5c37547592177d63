// # Control-Plane Trait
//
// Defines the interface to the cloud control plane: the only component that
// reads or mutates remote interface and address state.
//
// ## Implementations
//
// - EC2: `eni-provider-ec2` crate
//
// ## Usage
//
// ```rust,ignore
// use eni_core::ControlPlane;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let control_plane = /* ControlPlane implementation */;
//
//     let instance_id = control_plane.instance_metadata("instance-id").await?;
//     let description = control_plane.describe_instance(&instance_id).await?;
//     println!("{} interfaces", description.interfaces.len());
//
//     Ok(())
// }
// ```

use crate::snapshot::{InstanceDescription, InterfaceView, PublicAddressRecord};
use async_trait::async_trait;
use std::net::Ipv4Addr;

/// Parameters for creating a network interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInterfaceRequest {
    /// Subnet to create the interface in
    pub subnet_id: String,
    /// Number of secondary private addresses, not counting the primary
    pub secondary_address_count: usize,
    /// Security groups to attach
    pub security_group_ids: Vec<String>,
    /// Free-form description stored on the interface
    pub description: String,
}

/// Parameters for attaching an interface to an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachInterfaceRequest {
    /// Interface to attach
    pub interface_id: String,
    /// Instance to attach to
    pub instance_id: String,
    /// Device index for the attachment
    pub device_index: u32,
}

/// Parameters for binding a public address to a private address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociateAddressRequest {
    /// Interface carrying the private address
    pub interface_id: String,
    /// Allocation to bind
    pub allocation_id: String,
    /// Private address to bind to
    pub private_address: Ipv4Addr,
}

/// A freshly allocated public address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Allocation handle
    pub allocation_id: String,
    /// The allocated public address
    pub public_address: Ipv4Addr,
}

/// Trait for control-plane client implementations
///
/// Each method is one remote call. Implementations must be thread-safe and
/// usable across async tasks.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - Perform API calls to the control plane and the metadata service
/// - Parse provider-specific responses into the types in [`crate::snapshot`]
/// - Return success or failure
///
/// ## Forbidden Capabilities
/// - Retry or back off (a later cycle repairs partial progress)
/// - Spawn tasks or threads
/// - Cache state beyond a single request
/// - Decide whether a mutation is needed (owned by `EniEngine`)
///
/// A provider that fails returns an error. It never compensates for earlier
/// calls; ordering and compensation are owned by the engine.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetch an instance metadata value (e.g. "instance-id")
    async fn instance_metadata(&self, path: &str) -> Result<String, crate::Error>;

    /// Describe one instance, including attached interfaces and addresses
    ///
    /// Fails if the identifier matches anything other than exactly one instance.
    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<InstanceDescription, crate::Error>;

    /// List the public addresses currently bound to the instance
    async fn describe_addresses(
        &self,
        instance_id: &str,
    ) -> Result<Vec<PublicAddressRecord>, crate::Error>;

    /// Describe the given interfaces with their current private addresses
    async fn describe_interfaces(
        &self,
        interface_ids: &[String],
    ) -> Result<Vec<InterfaceView>, crate::Error>;

    /// Create a detached interface; the result lists its private addresses
    async fn create_interface(
        &self,
        request: &CreateInterfaceRequest,
    ) -> Result<InterfaceView, crate::Error>;

    /// Attach an interface at a device index; returns the attachment id
    async fn attach_interface(
        &self,
        request: &AttachInterfaceRequest,
    ) -> Result<String, crate::Error>;

    /// Request additional secondary private addresses on an interface
    async fn assign_secondary_addresses(
        &self,
        interface_id: &str,
        count: usize,
    ) -> Result<(), crate::Error>;

    /// Allocate a VPC-scoped public address
    async fn allocate_public_address(&self) -> Result<Allocation, crate::Error>;

    /// Bind an allocation to a private address; returns the association id
    async fn associate_address(
        &self,
        request: &AssociateAddressRequest,
    ) -> Result<String, crate::Error>;

    /// Remove a binding; the allocation stays allocated
    async fn disassociate_address(&self, association_id: &str) -> Result<(), crate::Error>;

    /// Return an allocation to the provider's pool
    async fn release_public_address(&self, allocation_id: &str) -> Result<(), crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

/// Helper trait for constructing control-plane clients from configuration
///
/// Construction is async because credential and region resolution may
/// perform I/O.
#[async_trait]
pub trait ControlPlaneFactory: Send + Sync {
    /// Create a ControlPlane instance from configuration
    async fn create(
        &self,
        config: &crate::config::ControlPlaneConfig,
    ) -> Result<Box<dyn ControlPlane>, crate::Error>;
}
