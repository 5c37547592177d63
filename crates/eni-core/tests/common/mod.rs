//! Test doubles and common utilities for reconciliation contract tests
//!
//! `FakeEc2` keeps an in-memory model of one instance's interfaces and
//! allocations, records every call, and can be told to fail specific calls.

#![allow(dead_code)]

use eni_core::capacity::{CapacityLimits, StaticCapacityTable};
use eni_core::config::EngineConfig;
use eni_core::error::{Error, Result};
use eni_core::snapshot::{InstanceDescription, InterfaceView, PrivateAddress, PublicAddressRecord};
use eni_core::traits::{
    Allocation, AssociateAddressRequest, AttachInterfaceRequest, ControlPlane,
    CreateInterfaceRequest, StaticIdentity,
};
use eni_core::{EngineEvent, EniEngine};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Hardware class with 3 interfaces of 5 addresses each
pub const TEST_CLASS: &str = "test.3x5";
/// Hardware class with 2 interfaces of 2 addresses each
pub const SMALL_CLASS: &str = "test.2x2";
/// Hardware class with a single interface of 5 addresses
pub const SINGLE_CLASS: &str = "test.1x5";

/// One remote call as observed by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Metadata(String),
    DescribeInstance(String),
    DescribeAddresses(String),
    DescribeInterfaces(Vec<String>),
    CreateInterface { secondary_address_count: usize },
    AttachInterface { interface_id: String, device_index: u32 },
    AssignSecondary { interface_id: String, count: usize },
    Allocate { allocation_id: String },
    Associate { allocation_id: String, private_address: Ipv4Addr },
    Disassociate { association_id: String },
    Release { allocation_id: String },
}

impl Call {
    /// Whether the call changes remote state
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Call::Metadata(_)
                | Call::DescribeInstance(_)
                | Call::DescribeAddresses(_)
                | Call::DescribeInterfaces(_)
        )
    }

    fn operation(&self) -> &'static str {
        match self {
            Call::Metadata(_) => "instance_metadata",
            Call::DescribeInstance(_) => "describe_instance",
            Call::DescribeAddresses(_) => "describe_addresses",
            Call::DescribeInterfaces(_) => "describe_interfaces",
            Call::CreateInterface { .. } => "create_interface",
            Call::AttachInterface { .. } => "attach_interface",
            Call::AssignSecondary { .. } => "assign_secondary_addresses",
            Call::Allocate { .. } => "allocate_public_address",
            Call::Associate { .. } => "associate_address",
            Call::Disassociate { .. } => "disassociate_address",
            Call::Release { .. } => "release_public_address",
        }
    }
}

#[derive(Debug, Clone)]
struct FakeInterface {
    id: String,
    device_index: Option<u32>,
    addresses: Vec<Ipv4Addr>,
}

#[derive(Debug, Clone)]
struct FakeAssociation {
    association_id: String,
    interface_id: String,
    private_address: Ipv4Addr,
}

#[derive(Debug, Clone)]
struct FakeAllocation {
    public_address: Ipv4Addr,
    association: Option<FakeAssociation>,
}

#[derive(Debug)]
struct FakeState {
    instance_id: String,
    hardware_class: String,
    interfaces: Vec<FakeInterface>,
    allocations: BTreeMap<String, FakeAllocation>,
    calls: Vec<Call>,
    op_counts: HashMap<&'static str, usize>,
    failures: HashSet<(&'static str, usize)>,
    next_private: u32,
    next_id: u32,
}

impl FakeState {
    fn private_address(&mut self) -> Ipv4Addr {
        let ip = Ipv4Addr::from(u32::from(Ipv4Addr::new(10, 0, 0, 10)) + self.next_private);
        self.next_private += 1;
        ip
    }

    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }

    /// Record a call and fail it if a failure was scheduled
    fn record(&mut self, call: Call) -> Result<()> {
        let op = call.operation();
        let count = self.op_counts.entry(op).or_insert(0);
        *count += 1;
        let nth = *count;
        self.calls.push(call);
        if self.failures.remove(&(op, nth)) {
            return Err(Error::provider("fake", format!("injected failure on {} #{}", op, nth)));
        }
        Ok(())
    }

    fn binding_of(&self, address: Ipv4Addr) -> Option<(&String, &FakeAllocation)> {
        self.allocations.iter().find(|(_, a)| {
            a.association
                .as_ref()
                .is_some_and(|assoc| assoc.private_address == address)
        })
    }

    fn view(&self, iface: &FakeInterface) -> InterfaceView {
        let addresses = iface
            .addresses
            .iter()
            .map(|&address| PrivateAddress {
                address,
                has_public_binding: self.binding_of(address).is_some(),
            })
            .collect();
        InterfaceView {
            interface_id: iface.id.clone(),
            device_index: iface.device_index,
            private_addresses: addresses,
        }
    }

    fn allocate(&mut self) -> (String, Ipv4Addr) {
        let allocation_id = self.id("eipalloc");
        let public_address = Ipv4Addr::new(54, 0, 0, (self.allocations.len() % 250) as u8 + 1);
        self.allocations.insert(
            allocation_id.clone(),
            FakeAllocation {
                public_address,
                association: None,
            },
        );
        (allocation_id, public_address)
    }

    fn associate(&mut self, allocation_id: &str, interface_id: &str, address: Ipv4Addr) -> String {
        let association_id = self.id("eipassoc");
        if let Some(allocation) = self.allocations.get_mut(allocation_id) {
            allocation.association = Some(FakeAssociation {
                association_id: association_id.clone(),
                interface_id: interface_id.to_string(),
                private_address: address,
            });
        }
        association_id
    }
}

/// In-memory EC2 control plane; clones share state
#[derive(Clone)]
pub struct FakeEc2 {
    state: Arc<Mutex<FakeState>>,
}

impl FakeEc2 {
    /// An instance with no interfaces yet
    pub fn new(instance_id: &str, hardware_class: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                instance_id: instance_id.to_string(),
                hardware_class: hardware_class.to_string(),
                interfaces: Vec::new(),
                allocations: BTreeMap::new(),
                calls: Vec::new(),
                op_counts: HashMap::new(),
                failures: HashSet::new(),
                next_private: 0,
                next_id: 0,
            })),
        }
    }

    /// Attach an interface with `addresses` private addresses, the first
    /// `bound` of which have a public binding
    pub fn with_interface(self, addresses: usize, bound: usize) -> Self {
        let device_index = self.state.lock().unwrap().interfaces.len() as u32;
        self.with_interface_at(addresses, bound, device_index)
    }

    /// Add an attached interface at an explicit device index
    pub fn with_interface_at(self, addresses: usize, bound: usize, device_index: u32) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let id = state.id("eni");
            let ips: Vec<_> = (0..addresses).map(|_| state.private_address()).collect();
            for &ip in ips.iter().take(bound) {
                let (allocation_id, _) = state.allocate();
                state.associate(&allocation_id, &id, ip);
            }
            state.interfaces.push(FakeInterface {
                id,
                device_index: Some(device_index),
                addresses: ips,
            });
        }
        self
    }

    /// Fail the `nth` (1-based) call of `operation`
    pub fn fail_call(&self, operation: &'static str, nth: usize) {
        self.state.lock().unwrap().failures.insert((operation, nth));
    }

    /// Every call observed so far
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Mutating calls observed so far
    pub fn mutation_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    /// Forget recorded calls, keeping inventory
    pub fn clear_calls(&self) {
        let mut state = self.state.lock().unwrap();
        state.calls.clear();
        state.op_counts.clear();
    }

    /// Attached interfaces as (id, device index, address count), in device order
    pub fn attached_interfaces(&self) -> Vec<(String, u32, usize)> {
        let state = self.state.lock().unwrap();
        let mut attached: Vec<_> = state
            .interfaces
            .iter()
            .filter_map(|i| i.device_index.map(|d| (i.id.clone(), d, i.addresses.len())))
            .collect();
        attached.sort_by_key(|(_, d, _)| *d);
        attached
    }

    /// Private addresses of an interface
    pub fn addresses_of(&self, interface_id: &str) -> Vec<Ipv4Addr> {
        let state = self.state.lock().unwrap();
        state
            .interfaces
            .iter()
            .find(|i| i.id == interface_id)
            .map(|i| i.addresses.clone())
            .unwrap_or_default()
    }

    /// Whether a private address has a public binding
    pub fn is_bound(&self, address: Ipv4Addr) -> bool {
        self.state.lock().unwrap().binding_of(address).is_some()
    }

    /// Allocation id bound to a private address
    pub fn allocation_for(&self, address: Ipv4Addr) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.binding_of(address).map(|(id, _)| id.clone())
    }

    /// Allocations that exist without a binding
    pub fn unassociated_allocations(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .allocations
            .iter()
            .filter(|(_, a)| a.association.is_none())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether an allocation still exists
    pub fn has_allocation(&self, allocation_id: &str) -> bool {
        self.state.lock().unwrap().allocations.contains_key(allocation_id)
    }
}

#[async_trait::async_trait]
impl ControlPlane for FakeEc2 {
    async fn instance_metadata(&self, path: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::Metadata(path.to_string()))?;
        match path {
            "instance-id" => Ok(format!("{}\n", state.instance_id)),
            _ => Err(Error::provider("fake", format!("unknown metadata path {}", path))),
        }
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceDescription> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::DescribeInstance(instance_id.to_string()))?;
        if instance_id != state.instance_id {
            return Err(Error::provider("fake", format!("expected 1 instance, found 0 for {}", instance_id)));
        }
        let interfaces = state
            .interfaces
            .iter()
            .filter(|i| i.device_index.is_some())
            .map(|i| state.view(i))
            .collect();
        Ok(InstanceDescription {
            instance_id: state.instance_id.clone(),
            hardware_class: state.hardware_class.clone(),
            subnet_id: "subnet-test".to_string(),
            security_group_ids: vec!["sg-test".to_string()],
            interfaces,
        })
    }

    async fn describe_addresses(&self, instance_id: &str) -> Result<Vec<PublicAddressRecord>> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::DescribeAddresses(instance_id.to_string()))?;
        Ok(state
            .allocations
            .iter()
            .filter_map(|(allocation_id, a)| {
                a.association.as_ref().map(|assoc| PublicAddressRecord {
                    allocation_id: allocation_id.clone(),
                    association_id: Some(assoc.association_id.clone()),
                    public_address: a.public_address,
                    private_address: Some(assoc.private_address),
                    network_interface_id: Some(assoc.interface_id.clone()),
                })
            })
            .collect())
    }

    async fn describe_interfaces(&self, interface_ids: &[String]) -> Result<Vec<InterfaceView>> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::DescribeInterfaces(interface_ids.to_vec()))?;
        Ok(state
            .interfaces
            .iter()
            .filter(|i| interface_ids.contains(&i.id))
            .map(|i| state.view(i))
            .collect())
    }

    async fn create_interface(&self, request: &CreateInterfaceRequest) -> Result<InterfaceView> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::CreateInterface {
            secondary_address_count: request.secondary_address_count,
        })?;
        let id = state.id("eni");
        let addresses: Vec<_> = (0..=request.secondary_address_count)
            .map(|_| state.private_address())
            .collect();
        let iface = FakeInterface {
            id,
            device_index: None,
            addresses,
        };
        let view = state.view(&iface);
        state.interfaces.push(iface);
        Ok(view)
    }

    async fn attach_interface(&self, request: &AttachInterfaceRequest) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::AttachInterface {
            interface_id: request.interface_id.clone(),
            device_index: request.device_index,
        })?;
        if state
            .interfaces
            .iter()
            .any(|i| i.device_index == Some(request.device_index))
        {
            return Err(Error::provider(
                "fake",
                format!("device index {} already in use", request.device_index),
            ));
        }
        let attachment_id = state.id("eni-attach");
        let iface = state
            .interfaces
            .iter_mut()
            .find(|i| i.id == request.interface_id)
            .ok_or_else(|| Error::provider("fake", "unknown interface"))?;
        iface.device_index = Some(request.device_index);
        Ok(attachment_id)
    }

    async fn assign_secondary_addresses(&self, interface_id: &str, count: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::AssignSecondary {
            interface_id: interface_id.to_string(),
            count,
        })?;
        let new: Vec<_> = (0..count).map(|_| state.private_address()).collect();
        let iface = state
            .interfaces
            .iter_mut()
            .find(|i| i.id == interface_id)
            .ok_or_else(|| Error::provider("fake", "unknown interface"))?;
        iface.addresses.extend(new);
        Ok(())
    }

    async fn allocate_public_address(&self) -> Result<Allocation> {
        let mut state = self.state.lock().unwrap();
        // The id is only known after allocating; record first for failure injection.
        state.record(Call::Allocate {
            allocation_id: String::new(),
        })?;
        let (allocation_id, public_address) = state.allocate();
        if let Some(Call::Allocate { allocation_id: id }) = state.calls.last_mut() {
            *id = allocation_id.clone();
        }
        Ok(Allocation {
            allocation_id,
            public_address,
        })
    }

    async fn associate_address(&self, request: &AssociateAddressRequest) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::Associate {
            allocation_id: request.allocation_id.clone(),
            private_address: request.private_address,
        })?;
        if !state.allocations.contains_key(&request.allocation_id) {
            return Err(Error::provider("fake", "unknown allocation"));
        }
        let on_interface = state
            .interfaces
            .iter()
            .any(|i| i.id == request.interface_id && i.addresses.contains(&request.private_address));
        if !on_interface {
            return Err(Error::provider("fake", "address not on interface"));
        }
        Ok(state.associate(
            &request.allocation_id,
            &request.interface_id,
            request.private_address,
        ))
    }

    async fn disassociate_address(&self, association_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::Disassociate {
            association_id: association_id.to_string(),
        })?;
        let allocation = state
            .allocations
            .values_mut()
            .find(|a| {
                a.association
                    .as_ref()
                    .is_some_and(|assoc| assoc.association_id == association_id)
            })
            .ok_or_else(|| Error::provider("fake", "unknown association"))?;
        allocation.association = None;
        Ok(())
    }

    async fn release_public_address(&self, allocation_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::Release {
            allocation_id: allocation_id.to_string(),
        })?;
        let associated = state
            .allocations
            .get(allocation_id)
            .map(|a| a.association.is_some());
        match associated {
            None => Err(Error::provider("fake", "unknown allocation")),
            Some(true) => Err(Error::provider("fake", "allocation is still associated")),
            Some(false) => {
                state.allocations.remove(allocation_id);
                Ok(())
            }
        }
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

/// Capacity table with the test hardware classes
pub fn test_capacity() -> StaticCapacityTable {
    StaticCapacityTable::builtin()
        .with_entry(TEST_CLASS, CapacityLimits::new(3, 5))
        .with_entry(SMALL_CLASS, CapacityLimits::new(2, 2))
        .with_entry(SINGLE_CLASS, CapacityLimits::new(1, 5))
}

/// Build an engine over a shared fake with the given local addresses
pub fn engine_with(
    fake: &FakeEc2,
    local_addresses: Vec<Ipv4Addr>,
    config: EngineConfig,
) -> (EniEngine, mpsc::Receiver<EngineEvent>) {
    EniEngine::new(
        Box::new(fake.clone()),
        Box::new(StaticIdentity::new(local_addresses)),
        Box::new(test_capacity()),
        config,
    )
    .expect("engine construction succeeds")
}

/// Build an engine whose local primary is the first interface's primary
pub fn engine(fake: &FakeEc2) -> (EniEngine, mpsc::Receiver<EngineEvent>) {
    engine_with(fake, vec![first_private()], EngineConfig::default())
}

/// The first private address the fake hands out
pub fn first_private() -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, 10)
}

/// Drain all currently queued events
pub fn drain(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
