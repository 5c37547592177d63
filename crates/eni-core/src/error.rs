//! Error types for the ENI reconciler
//!
//! This module defines all error types used throughout the crate.

use std::net::Ipv4Addr;
use thiserror::Error;

/// Result type alias for reconciler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the ENI reconciler
#[derive(Error, Debug)]
pub enum Error {
    /// A snapshot fetch failed; no partial snapshot is usable
    #[error("Failed to load instance state: {0}")]
    Load(String),

    /// The capacity table has no entry for the instance's hardware class
    #[error("Unknown hardware class: {0}")]
    UnknownHardwareClass(String),

    /// A mutating control-plane call failed
    #[error("Remote mutation failed ({operation}): {message}")]
    RemoteMutation {
        /// Operation that failed (e.g. "associate_address")
        operation: &'static str,
        /// Error message
        message: String,
    },

    /// Release was requested for a private address with no known public binding
    #[error("No public address bound to {0}")]
    NotBound(Ipv4Addr),

    /// Local interface enumeration errors
    #[error("Local identity error: {0}")]
    LocalIdentity(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Control-plane provider errors
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a load error
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    /// Create an unknown hardware class error
    pub fn unknown_hardware_class(class: impl Into<String>) -> Self {
        Self::UnknownHardwareClass(class.into())
    }

    /// Create a remote mutation error
    pub fn remote_mutation(operation: &'static str, message: impl Into<String>) -> Self {
        Self::RemoteMutation {
            operation,
            message: message.into(),
        }
    }

    /// Create a local identity error
    pub fn local_identity(msg: impl Into<String>) -> Self {
        Self::LocalIdentity(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether this error aborts the current cycle
    ///
    /// Load failures usually precede any mutation, but re-reading an
    /// interface after creating it can also fail with `Load`, in which case
    /// the cycle has already mutated remote state.
    pub fn is_fatal_for_cycle(&self) -> bool {
        matches!(
            self,
            Self::Load(_) | Self::UnknownHardwareClass(_) | Self::Config(_)
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
