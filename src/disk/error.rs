//! Error types for disk lifecycle operations.

use thiserror::Error;

use crate::naming::NamingError;
use crate::object_store::ObjectStoreError;

/// Errors raised by [`super::DiskManager`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DiskError {
    /// Raised when a disk size is below the minimum of 1 GiB.
    #[error("invalid disk size {size_gib} GiB: must be at least 1 GiB")]
    InvalidSize {
        /// Requested size in GiB.
        size_gib: u32,
    },
    /// Raised when a disk name or its attributes cannot be encoded/decoded.
    #[error(transparent)]
    Naming(#[from] NamingError),
    /// Raised when the object store fails a disk operation.
    #[error("{operation} failed for disk {disk_name}: {source}")]
    Storage {
        /// Disk operation being performed.
        operation: String,
        /// Disk the operation targeted.
        disk_name: String,
        /// Underlying storage failure.
        #[source]
        source: ObjectStoreError,
    },
}

impl DiskError {
    pub(super) fn storage(operation: &str, disk_name: &str, source: ObjectStoreError) -> Self {
        Self::Storage {
            operation: operation.to_owned(),
            disk_name: disk_name.to_owned(),
            source,
        }
    }
}
