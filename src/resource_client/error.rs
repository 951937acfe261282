//! Error types for the resource client.

use thiserror::Error;

use crate::control_plane::ControlPlaneError;

/// Errors raised by [`super::ResourceClient`] implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClientError {
    /// Raised when the underlying control-plane call fails.
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
    /// Raised when an operation needs a virtual machine that does not exist.
    #[error("cannot find the virtual machine by name '{name}'")]
    VirtualMachineNotFound {
        /// Virtual machine name.
        name: String,
    },
    /// Raised when detaching a disk the machine does not have.
    #[error("the disk {disk_name} is not attached to the virtual machine {instance_id}")]
    DiskNotAttached {
        /// Disk name.
        disk_name: String,
        /// Instance the disk was expected on.
        instance_id: String,
    },
    /// Raised when every logical unit number is taken.
    #[error("no free lun left on virtual machine {name}")]
    NoFreeLun {
        /// Virtual machine name.
        name: String,
    },
    /// Raised when a resource document lacks expected fields.
    #[error("malformed {resource} document: {message}")]
    Malformed {
        /// Resource kind being decoded.
        resource: String,
        /// Decoder message.
        message: String,
    },
}

impl ClientError {
    pub(crate) fn malformed(resource: &str, err: &serde_json::Error) -> Self {
        Self::Malformed {
            resource: resource.to_owned(),
            message: err.to_string(),
        }
    }
}
