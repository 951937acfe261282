//! Settings-registry collaborator.
//!
//! The registry stores the agent settings of every instance (networks, disk
//! to device mappings, environment). Its wire protocol is external; this
//! crate only needs read/update/delete of an opaque JSON document.

use serde_json::Value;
use thiserror::Error;

use crate::CloudFuture;

/// Errors raised by registry implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// Raised when no settings exist for the instance.
    #[error("no settings registered for instance {instance_id}")]
    NotFound {
        /// Instance identifier.
        instance_id: String,
    },
    /// Raised when the registry rejects or fails a request.
    #[error("registry request for instance {instance_id} failed: {message}")]
    Request {
        /// Instance identifier.
        instance_id: String,
        /// Reason reported by the registry.
        message: String,
    },
}

/// Per-instance agent settings store.
pub trait SettingsRegistry: Send + Sync {
    /// Reads the settings of `instance_id`.
    fn read_settings<'a>(&'a self, instance_id: &'a str) -> CloudFuture<'a, Value, RegistryError>;

    /// Replaces the settings of `instance_id`.
    fn update_settings<'a>(
        &'a self,
        instance_id: &'a str,
        settings: &'a Value,
    ) -> CloudFuture<'a, (), RegistryError>;

    /// Removes the settings of `instance_id`; absent entries are ignored.
    fn delete_settings<'a>(&'a self, instance_id: &'a str) -> CloudFuture<'a, (), RegistryError>;
}
