//! Resource pool properties of an instance.

use serde::{Deserialize, Serialize};

use crate::naming::{CachingMode, NamingError};

const DEFAULT_UPDATE_DOMAINS: u32 = 5;
const DEFAULT_FAULT_DOMAINS: u32 = 3;

/// Per-instance provisioning properties.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResourcePoolSpec {
    /// Instance size, e.g. `Standard_D1`.
    pub instance_type: String,
    /// OS disk caching; `ReadWrite` when absent.
    #[serde(default)]
    pub caching: Option<String>,
    /// Availability set to join, created on demand.
    #[serde(default)]
    pub availability_set: Option<String>,
    /// Update domains of a newly created availability set.
    #[serde(default)]
    pub platform_update_domain_count: Option<u32>,
    /// Fault domains of a newly created availability set.
    #[serde(default)]
    pub platform_fault_domain_count: Option<u32>,
    /// Existing load balancer to join.
    #[serde(default)]
    pub load_balancer: Option<String>,
}

impl ResourcePoolSpec {
    /// Pool with only an instance type.
    #[must_use]
    pub fn new(instance_type: impl Into<String>) -> Self {
        Self {
            instance_type: instance_type.into(),
            ..Self::default()
        }
    }

    /// OS disk caching mode.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::InvalidCaching`] for unknown values.
    pub fn os_disk_caching(&self) -> Result<CachingMode, NamingError> {
        self.caching
            .as_deref()
            .map_or(Ok(CachingMode::ReadWrite), str::parse)
    }

    /// Update domain count, defaulting to 5.
    #[must_use]
    pub fn update_domains(&self) -> u32 {
        self.platform_update_domain_count
            .unwrap_or(DEFAULT_UPDATE_DOMAINS)
    }

    /// Fault domain count, defaulting to 3.
    #[must_use]
    pub fn fault_domains(&self) -> u32 {
        self.platform_fault_domain_count
            .unwrap_or(DEFAULT_FAULT_DOMAINS)
    }
}
