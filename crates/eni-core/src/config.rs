//! Configuration types for the ENI reconciler
//!
//! This module defines all configuration structures used throughout the crate.

use crate::capacity::CapacityLimits;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Main reconciler configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EniConfig {
    /// Control-plane client configuration
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    /// Capacity entries merged over the built-in table
    #[serde(default)]
    pub capacity_overrides: HashMap<String, CapacityLimits>,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl EniConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load capacity overrides from a JSON file mapping hardware class to limits
    pub fn capacity_overrides_from_json_file(
        path: impl AsRef<Path>,
    ) -> Result<HashMap<String, CapacityLimits>, crate::Error> {
        let content = std::fs::read_to_string(path)?;
        let overrides = serde_json::from_str(&content)?;
        Ok(overrides)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.control_plane.validate()?;
        self.engine.validate()?;

        for (class, limits) in &self.capacity_overrides {
            if class.is_empty() {
                return Err(crate::Error::config("Capacity override has an empty hardware class"));
            }
            if limits.max_interfaces == 0 || limits.max_addresses_per_interface == 0 {
                return Err(crate::Error::config(format!(
                    "Capacity override for {} must have non-zero limits",
                    class
                )));
            }
        }

        Ok(())
    }
}

/// Control-plane client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlPlaneConfig {
    /// EC2 control plane
    Ec2 {
        /// Region to operate in (e.g. "us-east-1")
        region: String,
        /// Endpoint override, for testing against a local emulator
        #[serde(default)]
        endpoint_url: Option<String>,
        /// Named credentials profile
        #[serde(default)]
        profile: Option<String>,
        /// Perform reads only; log mutations instead of issuing them
        #[serde(default)]
        dry_run: bool,
    },
}

impl ControlPlaneConfig {
    /// Create an EC2 configuration for a region
    pub fn ec2(region: impl Into<String>) -> Self {
        ControlPlaneConfig::Ec2 {
            region: region.into(),
            endpoint_url: None,
            profile: None,
            dry_run: false,
        }
    }

    /// Validate the control-plane configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ControlPlaneConfig::Ec2 {
                region,
                endpoint_url,
                ..
            } => {
                if region.is_empty() {
                    return Err(crate::Error::config("EC2 region cannot be empty"));
                }
                if let Some(url) = endpoint_url
                    && !url.starts_with("https://")
                    && !url.starts_with("http://")
                {
                    return Err(crate::Error::config(format!(
                        "EC2 endpoint URL must use HTTP or HTTPS scheme. Got: {}",
                        url
                    )));
                }
                Ok(())
            }
        }
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        ControlPlaneConfig::ec2("")
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Release an allocation when binding it to a private address fails
    ///
    /// When disabled, the allocation is left in place and reported as leaked
    /// so an external audit can reclaim it.
    #[serde(default)]
    pub release_unassociated_allocations: bool,

    /// Description stored on interfaces the engine creates
    #[serde(default = "default_interface_description")]
    pub interface_description: String,

    /// Capacity of the internal event channel
    ///
    /// When full, new engine events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            release_unassociated_allocations: false,
            interface_description: default_interface_description(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_interface_description() -> String {
    "AUTO".to_string()
}

fn default_event_channel_capacity() -> usize {
    1000
}
