//! Core traits for the ENI reconciler
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`ControlPlane`]: Read and mutate remote interface/address state
//! - [`LocalIdentity`]: Enumerate the host's own IPv4 addresses
//! - [`CapacityTable`](crate::capacity::CapacityTable): Per-hardware-class limits

pub mod control_plane;
pub mod local_identity;

pub use control_plane::{
    Allocation, AssociateAddressRequest, AttachInterfaceRequest, ControlPlane,
    ControlPlaneFactory, CreateInterfaceRequest,
};
pub use local_identity::{LocalIdentity, StaticIdentity};
