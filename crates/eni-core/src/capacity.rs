//! Capacity table
//!
//! Maps a hardware class (instance type) to the number of interfaces it can
//! attach and the number of private IPv4 addresses each interface can carry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Interface and address limits for one hardware class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityLimits {
    /// Maximum attached network interfaces
    pub max_interfaces: usize,
    /// Maximum private IPv4 addresses per interface, primary included
    pub max_addresses_per_interface: usize,
}

impl CapacityLimits {
    /// Create a new set of limits
    pub const fn new(max_interfaces: usize, max_addresses_per_interface: usize) -> Self {
        Self {
            max_interfaces,
            max_addresses_per_interface,
        }
    }
}

/// Lookup of capacity limits by hardware class
pub trait CapacityTable: Send + Sync {
    /// Limits for a hardware class, or `None` if unknown
    fn lookup(&self, hardware_class: &str) -> Option<CapacityLimits>;
}

/// (instance type, interfaces, IPv4 addresses per interface)
const BUILTIN_LIMITS: &[(&str, usize, usize)] = &[
    ("t2.nano", 2, 2),
    ("t2.micro", 2, 2),
    ("t2.small", 3, 4),
    ("t2.medium", 3, 6),
    ("t2.large", 3, 12),
    ("t2.xlarge", 3, 15),
    ("t2.2xlarge", 3, 15),
    ("t3.nano", 2, 2),
    ("t3.micro", 2, 2),
    ("t3.small", 3, 4),
    ("t3.medium", 3, 6),
    ("t3.large", 3, 12),
    ("t3.xlarge", 4, 15),
    ("t3.2xlarge", 4, 15),
    ("m4.large", 2, 10),
    ("m4.xlarge", 4, 15),
    ("m4.2xlarge", 4, 15),
    ("m4.4xlarge", 8, 30),
    ("m4.10xlarge", 8, 30),
    ("m4.16xlarge", 8, 30),
    ("m5.large", 3, 10),
    ("m5.xlarge", 4, 15),
    ("m5.2xlarge", 4, 15),
    ("m5.4xlarge", 8, 30),
    ("m5.8xlarge", 8, 30),
    ("m5.12xlarge", 8, 30),
    ("m5.16xlarge", 15, 50),
    ("m5.24xlarge", 15, 50),
    ("c4.large", 3, 10),
    ("c4.xlarge", 4, 15),
    ("c4.2xlarge", 4, 15),
    ("c4.4xlarge", 8, 30),
    ("c4.8xlarge", 8, 30),
    ("c5.large", 3, 10),
    ("c5.xlarge", 4, 15),
    ("c5.2xlarge", 4, 15),
    ("c5.4xlarge", 8, 30),
    ("c5.9xlarge", 8, 30),
    ("c5.12xlarge", 8, 30),
    ("c5.18xlarge", 15, 50),
    ("c5.24xlarge", 15, 50),
    ("r5.large", 3, 10),
    ("r5.xlarge", 4, 15),
    ("r5.2xlarge", 4, 15),
    ("r5.4xlarge", 8, 30),
    ("r5.8xlarge", 8, 30),
    ("r5.12xlarge", 8, 30),
    ("r5.16xlarge", 15, 50),
    ("r5.24xlarge", 15, 50),
];

/// In-memory capacity table seeded with common EC2 instance types
///
/// # Example
///
/// ```rust
/// use eni_core::capacity::{CapacityLimits, CapacityTable, StaticCapacityTable};
/// use std::collections::HashMap;
///
/// let mut overrides = HashMap::new();
/// overrides.insert("x1.custom".to_string(), CapacityLimits::new(2, 4));
///
/// let table = StaticCapacityTable::builtin().with_overrides(overrides);
/// assert_eq!(table.lookup("x1.custom"), Some(CapacityLimits::new(2, 4)));
/// assert_eq!(table.lookup("t3.medium"), Some(CapacityLimits::new(3, 6)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticCapacityTable {
    entries: HashMap<String, CapacityLimits>,
}

impl StaticCapacityTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table holding the built-in instance types
    pub fn builtin() -> Self {
        let entries = BUILTIN_LIMITS
            .iter()
            .map(|&(class, interfaces, addresses)| {
                (class.to_string(), CapacityLimits::new(interfaces, addresses))
            })
            .collect();
        Self { entries }
    }

    /// Add or replace a single entry
    pub fn with_entry(mut self, hardware_class: impl Into<String>, limits: CapacityLimits) -> Self {
        self.entries.insert(hardware_class.into(), limits);
        self
    }

    /// Merge overrides over the current entries; overrides win
    pub fn with_overrides(mut self, overrides: HashMap<String, CapacityLimits>) -> Self {
        self.entries.extend(overrides);
        self
    }

    /// Number of known hardware classes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CapacityTable for StaticCapacityTable {
    fn lookup(&self, hardware_class: &str) -> Option<CapacityLimits> {
        self.entries.get(hardware_class).copied()
    }
}
