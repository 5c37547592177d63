// # eni-core
//
// Core library for keeping one instance's network interfaces and elastic
// addresses converged with the capacity of its hardware class.
//
// ## Architecture Overview
//
// - **ControlPlane**: Trait for remote reads and mutations (describe, create,
//   attach, assign, allocate, associate, disassociate, release)
// - **LocalIdentity**: Trait for enumerating the host's own IPv4 addresses
// - **CapacityTable**: Lookup of interface/address limits by hardware class
// - **InstanceSnapshot**: Immutable per-cycle view of the inventory
// - **EniEngine**: Loads snapshots, reconciles them, releases addresses
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from cloud and host specifics
// 2. **Immutable Snapshots**: Mutations never write back into a snapshot
// 3. **Sequential Mutations**: One remote mutation at a time, in a fixed order
// 4. **Convergence**: Re-running a cycle repairs partial progress; a converged
//    instance produces no mutations

pub mod capacity;
pub mod config;
pub mod engine;
pub mod error;
pub mod snapshot;
pub mod traits;

// Re-export core types for convenience
pub use capacity::{CapacityLimits, CapacityTable, StaticCapacityTable};
pub use config::{ControlPlaneConfig, EngineConfig, EniConfig};
pub use engine::{EngineEvent, EniEngine, ReconcileReport, ReleaseOutcome};
pub use error::{Error, Result};
pub use snapshot::{
    InstanceDescription, InstanceSnapshot, InterfaceView, PrivateAddress, PublicAddressRecord,
};
pub use traits::{ControlPlane, ControlPlaneFactory, LocalIdentity, StaticIdentity};
