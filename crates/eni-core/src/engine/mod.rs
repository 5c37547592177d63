//! Core reconciliation engine
//!
//! The EniEngine is responsible for:
//! - Loading one consistent snapshot of the instance's inventory
//! - Closing address deficits on attached interfaces
//! - Binding a public address to every private address lacking one
//! - Creating and attaching interfaces up to the hardware-class limit
//! - Releasing (and optionally replacing) a public address
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ LocalIdentity │   │ ControlPlane │   │ CapacityTable │
//! └───────────────┘   └──────────────┘   └───────────────┘
//!         │                  │                   │
//!         └──────────────────┼───────────────────┘
//!                            ▼
//!                    ┌──────────────┐
//!                    │  EniEngine   │── EngineEvent ──▶ (monitoring)
//!                    └──────────────┘
//!                            │
//!        load() ──▶ InstanceSnapshot ──▶ reconcile() / release()
//! ```
//!
//! ## Cycle Flow
//!
//! 1. Resolve the local primary address, fetch the instance id, describe the
//!    instance and its bound public addresses
//! 2. Look up capacity limits for the hardware class
//! 3. Per attached interface: request missing private addresses, re-fetch,
//!    bind public addresses to unbound private addresses
//! 4. Create, attach and bind new interfaces at device indices
//!    `len(interfaces)..max_interfaces`
//!
//! Mutations are strictly sequential. Nothing is rolled back on failure; the
//! next cycle observes partial progress and continues from there.

mod binder;
mod loader;
mod reconcile;
mod release;

pub use reconcile::{CreatedInterface, ReconcileReport};
pub use release::ReleaseOutcome;

use crate::capacity::CapacityTable;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::snapshot::InterfaceView;
use crate::traits::{ControlPlane, LocalIdentity};
use std::net::Ipv4Addr;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{OnceCell, mpsc};
use tracing::{debug, warn};

/// Events emitted by the EniEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Reconciliation started for an instance
    CycleStarted {
        instance_id: String,
        hardware_class: String,
    },

    /// Secondary private addresses requested on an interface
    AddressesRequested { interface_id: String, count: usize },

    /// New interface created and attached
    InterfaceCreated {
        interface_id: String,
        device_index: u32,
    },

    /// Public address bound to a private address
    AddressBound {
        interface_id: String,
        private_address: Ipv4Addr,
        public_address: Ipv4Addr,
        allocation_id: String,
    },

    /// Allocation left in place after its association failed
    AllocationLeaked {
        allocation_id: String,
        private_address: Ipv4Addr,
        error: String,
    },

    /// Allocation released after its association failed
    AllocationCompensated {
        allocation_id: String,
        private_address: Ipv4Addr,
    },

    /// Public address unbound and released
    AddressReleased {
        private_address: Ipv4Addr,
        allocation_id: String,
    },

    /// Release refused for the instance's own primary address
    PrimaryAddressProtected { address: Ipv4Addr },

    /// Reconciliation finished
    CycleFinished {
        instance_id: String,
        mutations: usize,
    },
}

/// Core reconciliation engine
///
/// ## Lifecycle
///
/// 1. Create with [`EniEngine::new()`]
/// 2. Take a snapshot with [`EniEngine::load()`]
/// 3. Converge with [`EniEngine::reconcile()`] or release with [`EniEngine::release()`]
/// 4. Discard the snapshot; load a fresh one for the next cycle
///
/// ## Threading
///
/// A single engine must not run two cycles against the same instance at
/// once. Callers schedule one invocation at a time.
pub struct EniEngine {
    /// Control-plane client for remote reads and mutations
    control_plane: Box<dyn ControlPlane>,

    /// Resolver for the host's own addresses
    identity: Box<dyn LocalIdentity>,

    /// Capacity limits by hardware class
    capacity: Box<dyn CapacityTable>,

    /// Primary address, resolved once per engine
    primary_address: OnceCell<Option<Ipv4Addr>>,

    /// Release allocations whose association failed
    release_unassociated_allocations: bool,

    /// Description stored on created interfaces
    interface_description: String,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl EniEngine {
    /// Create a new engine
    ///
    /// # Parameters
    ///
    /// - `control_plane`: Control-plane client implementation
    /// - `identity`: Local identity resolver
    /// - `capacity`: Capacity table
    /// - `config`: Engine settings
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        control_plane: Box<dyn ControlPlane>,
        identity: Box<dyn LocalIdentity>,
        capacity: Box<dyn CapacityTable>,
        config: EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let engine = Self {
            control_plane,
            identity,
            capacity,
            primary_address: OnceCell::new(),
            release_unassociated_allocations: config.release_unassociated_allocations,
            interface_description: config.interface_description,
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Load a fresh snapshot and converge it
    pub async fn run_cycle(&self) -> Result<ReconcileReport> {
        let snapshot = self.load().await?;
        self.reconcile(&snapshot).await
    }

    /// Re-fetch a single interface after a mutation changed it
    async fn refresh_interface(&self, interface_id: &str) -> Result<InterfaceView> {
        let interfaces = self
            .control_plane
            .describe_interfaces(&[interface_id.to_string()])
            .await
            .map_err(|e| {
                Error::load(format!(
                    "refresh of interface {} after mutation: {}",
                    interface_id, e
                ))
            })?;

        interfaces
            .into_iter()
            .find(|i| i.interface_id == interface_id)
            .ok_or_else(|| {
                Error::load(format!(
                    "interface {} not found on refresh after mutation",
                    interface_id
                ))
            })
    }

    /// Map a provider failure during a mutation
    fn mutation_error(&self, operation: &'static str, err: Error) -> Error {
        Error::remote_mutation(
            operation,
            format!("{}: {}", self.control_plane.provider_name(), err),
        )
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            Err(TrySendError::Closed(event)) => {
                debug!("Event receiver dropped, discarding {:?}", event);
            }
        }
    }
}
