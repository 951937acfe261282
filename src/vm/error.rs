//! Error types for the provisioning orchestrator.

use std::fmt;

use thiserror::Error;

use crate::disk::DiskError;
use crate::naming::NamingError;
use crate::resource_client::ClientError;

/// Kind of remote resource named in [`VmError::NotFound`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceKind {
    /// Subnet of a virtual network.
    Subnet,
    /// Reserved public IP address.
    PublicIp,
    /// Load balancer.
    LoadBalancer,
    /// Network interface.
    NetworkInterface,
    /// Availability set.
    AvailabilitySet,
    /// Storage account.
    StorageAccount,
    /// Virtual machine.
    VirtualMachine,
}

impl ResourceKind {
    /// Human readable name used in messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subnet => "subnet",
            Self::PublicIp => "public IP address",
            Self::LoadBalancer => "load balancer",
            Self::NetworkInterface => "network interface",
            Self::AvailabilitySet => "availability set",
            Self::StorageAccount => "storage account",
            Self::VirtualMachine => "virtual machine",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by [`super::VmManager`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VmError {
    /// Raised when the resource pool is unusable before any remote call.
    #[error("invalid resource pool: {message}")]
    Validation {
        /// Description of the problem.
        message: String,
    },
    /// Raised for unknown caching modes and unusable scopes.
    #[error(transparent)]
    Naming(#[from] NamingError),
    /// Raised when a required resource does not exist.
    #[error("Cannot find the {kind} {name}")]
    NotFound {
        /// Kind of the missing resource.
        kind: ResourceKind,
        /// Name (or address) that was looked up.
        name: String,
    },
    /// Raised when the request asks for mutually exclusive resources.
    #[error("{message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },
    /// Raised when a remote resource operation fails.
    #[error(transparent)]
    Client(#[from] ClientError),
    /// Raised when a disk operation fails.
    #[error(transparent)]
    Disk(#[from] DiskError),
    /// Raised when instance creation fails after resources were created;
    /// those resources have been rolled back.
    #[error("failed to provision instance {instance_id}: {source}")]
    ProvisioningFailed {
        /// Instance being provisioned.
        instance_id: String,
        /// Failure that aborted provisioning.
        source: Box<VmError>,
    },
}

impl VmError {
    pub(super) fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }
}
