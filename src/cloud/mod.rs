//! Facade exposing the provider operations over the orchestrator, the disk
//! manager and the settings registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::disk::{DiskError, DiskManager};
use crate::naming::{CachingMode, DiskTier, InstanceId, NamingError, ResourceName};
use crate::network::{NetworkError, NetworkPlacement, NetworkSpec};
use crate::object_store::ObjectStore;
use crate::registry::{RegistryError, SettingsRegistry};
use crate::resource_client::{ResourceClient, Tags};
use crate::vm::{ResourcePoolSpec, VmError, VmManager};

const MIB_PER_GIB: u64 = 1024;
const MAX_DISK_GIB: u64 = 1024;
const SYSTEM_DEVICE: &str = "/dev/sda";
const EPHEMERAL_DEVICE: &str = "/dev/sdb";
const DELETING_STATE: &str = "Deleting";

/// Errors surfaced by [`Cloud`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloudError {
    /// Raised when a requested disk size is outside the supported range.
    #[error("{message}")]
    InvalidDiskSize {
        /// Description of the violated bound.
        message: String,
    },
    /// Raised for unknown caching modes or tiers in disk properties.
    #[error(transparent)]
    Naming(#[from] NamingError),
    /// Raised when the networks map is unusable.
    #[error(transparent)]
    Network(#[from] NetworkError),
    /// Raised by instance operations.
    #[error(transparent)]
    Vm(#[from] VmError),
    /// Raised by disk operations.
    #[error(transparent)]
    Disk(#[from] DiskError),
    /// Raised when agent settings cannot be read or written.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Raised when stored agent settings lack the persistent disk map.
    #[error("settings of instance {instance_id} have no disks.persistent map")]
    MalformedSettings {
        /// Instance identifier.
        instance_id: String,
    },
}

/// Properties accepted when creating a persistent disk.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct DiskProperties {
    /// Host caching mode; defaults to `None`.
    #[serde(default)]
    pub caching: Option<String>,
    /// Disk tier, `standard` or `premium`; defaults to `standard`.
    #[serde(default, rename = "type")]
    pub disk_type: Option<String>,
}

impl DiskProperties {
    fn caching(&self) -> Result<CachingMode, NamingError> {
        self.caching
            .as_deref()
            .map_or(Ok(CachingMode::None), str::parse)
    }

    fn tier(&self) -> Result<DiskTier, NamingError> {
        self.disk_type
            .as_deref()
            .map_or(Ok(DiskTier::Standard), str::parse)
    }
}

/// Converts a size in MiB to whole GiB within the supported bounds.
///
/// # Errors
///
/// Returns [`CloudError::InvalidDiskSize`] when the size is not a whole
/// number of GiB or lies outside 1 GiB..=1 TiB.
pub fn disk_size_gib(size_mib: u64) -> Result<u32, CloudError> {
    let invalid = |message: &str| CloudError::InvalidDiskSize {
        message: message.to_owned(),
    };
    if size_mib < MIB_PER_GIB {
        return Err(invalid("Azure CPI minimum disk size is 1 GiB"));
    }
    if size_mib > MAX_DISK_GIB * MIB_PER_GIB {
        return Err(invalid("Azure CPI maximum disk size is 1 TiB"));
    }
    if size_mib.checked_rem(MIB_PER_GIB) != Some(0) {
        return Err(invalid("disk size needs to be a whole number of GiB"));
    }
    size_mib
        .checked_div(MIB_PER_GIB)
        .and_then(|gib| u32::try_from(gib).ok())
        .ok_or_else(|| invalid("Azure CPI maximum disk size is 1 TiB"))
}

/// Provider operations over instances, disks and agent settings.
#[derive(Debug)]
pub struct Cloud<C: ResourceClient, S: ObjectStore, R: SettingsRegistry> {
    vms: VmManager<C, S>,
    disks: DiskManager<S>,
    registry: Arc<R>,
}

impl<C: ResourceClient, S: ObjectStore, R: SettingsRegistry> Cloud<C, S, R> {
    /// Creates a facade; disks are managed through the orchestrator's disk
    /// manager.
    #[must_use]
    pub fn new(vms: VmManager<C, S>, registry: Arc<R>) -> Self {
        let disks = vms.disks().clone();
        Self {
            vms,
            disks,
            registry,
        }
    }

    fn default_scope(&self) -> &str {
        self.disks.codec().default_scope()
    }

    /// Provisions an instance and registers its initial agent settings.
    ///
    /// When the settings cannot be written the instance is deleted again.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Network`] for an unusable networks map,
    /// [`CloudError::Vm`] when provisioning fails and
    /// [`CloudError::Registry`] when the settings cannot be written.
    pub async fn create_vm(
        &self,
        agent_id: &str,
        image_uri: &str,
        pool: &ResourcePoolSpec,
        networks: &BTreeMap<String, NetworkSpec>,
        env: &Value,
    ) -> Result<InstanceId, CloudError> {
        info!(agent_id, "creating vm");
        let placement = NetworkPlacement::from_specs(networks)?;
        let seed = Uuid::new_v4().to_string();
        let instance_id = self
            .vms
            .create(&seed, self.default_scope(), image_uri, pool, &placement)
            .await?;

        let settings = json!({
            "vm": { "name": instance_id.as_str() },
            "agent_id": agent_id,
            "networks": networks,
            "disks": {
                "system": SYSTEM_DEVICE,
                "ephemeral": EPHEMERAL_DEVICE,
                "persistent": {},
            },
            "env": env,
        });
        if let Err(err) = self.registry.update_settings(&instance_id, &settings).await {
            warn!(
                instance_id = %instance_id,
                error = %err,
                "registering settings failed, deleting vm"
            );
            if let Err(cleanup) = self.vms.delete(&instance_id).await {
                warn!(
                    instance_id = %instance_id,
                    error = %cleanup,
                    "deleting unregistered vm failed"
                );
            }
            return Err(err.into());
        }
        Ok(instance_id)
    }

    /// Deletes an instance and its agent settings.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Vm`] or [`CloudError::Registry`] when a step
    /// fails.
    pub async fn delete_vm(&self, instance_id: &InstanceId) -> Result<(), CloudError> {
        info!(instance_id = %instance_id, "deleting vm");
        self.vms.delete(instance_id).await?;
        self.registry.delete_settings(instance_id).await?;
        Ok(())
    }

    /// Whether the instance exists and is not being deleted.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Vm`] when the lookup fails.
    pub async fn has_vm(&self, instance_id: &InstanceId) -> Result<bool, CloudError> {
        Ok(self
            .vms
            .find(instance_id)
            .await?
            .is_some_and(|vm| vm.provisioning_state != DELETING_STATE))
    }

    /// Restarts an instance.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Vm`] when the restart fails.
    pub async fn reboot_vm(&self, instance_id: &InstanceId) -> Result<(), CloudError> {
        Ok(self.vms.reboot(instance_id).await?)
    }

    /// Replaces the instance tags.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Vm`] when the update fails.
    pub async fn set_vm_metadata(
        &self,
        instance_id: &InstanceId,
        metadata: &Tags,
    ) -> Result<(), CloudError> {
        Ok(self.vms.set_metadata(instance_id, metadata).await?)
    }

    /// Creates a persistent disk of `size_mib` in the default storage account.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::InvalidDiskSize`] for unsupported sizes,
    /// [`CloudError::Naming`] for an unknown caching mode or disk type and
    /// [`CloudError::Disk`] when allocation fails.
    pub async fn create_disk(
        &self,
        size_mib: u64,
        properties: &DiskProperties,
    ) -> Result<ResourceName, CloudError> {
        let size_gib = disk_size_gib(size_mib)?;
        let caching = properties.caching()?;
        let tier = properties.tier()?;
        Ok(self
            .disks
            .create_disk(self.default_scope(), size_gib, caching, tier)
            .await?)
    }

    /// Deletes a persistent disk.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Disk`] when the deletion fails.
    pub async fn delete_disk(&self, disk: &ResourceName) -> Result<(), CloudError> {
        Ok(self.disks.delete_disk(disk).await?)
    }

    /// Whether the disk exists.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Disk`] when the probe fails.
    pub async fn has_disk(&self, disk: &ResourceName) -> Result<bool, CloudError> {
        Ok(self.disks.has_disk(disk).await?)
    }

    /// Attaches a disk and records its device in the agent settings.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Vm`] when the attachment fails and
    /// [`CloudError::Registry`] when the settings cannot be updated.
    pub async fn attach_disk(
        &self,
        instance_id: &InstanceId,
        disk: &ResourceName,
    ) -> Result<String, CloudError> {
        let device = self.vms.attach_disk(instance_id, disk).await?;
        let mut settings = self.registry.read_settings(instance_id).await?;
        persistent_disks(&mut settings)
            .ok_or_else(|| CloudError::MalformedSettings {
                instance_id: instance_id.to_string(),
            })?
            .insert(disk.to_string(), Value::String(device.clone()));
        self.registry
            .update_settings(instance_id, &settings)
            .await?;
        info!(instance_id = %instance_id, disk = %disk, device = %device, "disk attached");
        Ok(device)
    }

    /// Removes a disk from the agent settings and detaches it.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Registry`] when the settings cannot be updated
    /// and [`CloudError::Vm`] when the detachment fails.
    pub async fn detach_disk(
        &self,
        instance_id: &InstanceId,
        disk: &ResourceName,
    ) -> Result<(), CloudError> {
        let mut settings = self.registry.read_settings(instance_id).await?;
        if let Some(persistent) = persistent_disks(&mut settings) {
            persistent.remove(disk.as_str());
        }
        self.registry
            .update_settings(instance_id, &settings)
            .await?;
        self.vms.detach_disk(instance_id, disk).await?;
        info!(instance_id = %instance_id, disk = %disk, "disk detached");
        Ok(())
    }

    /// Snapshots a disk and returns the snapshot disk name.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Disk`] when the snapshot fails.
    pub async fn snapshot_disk(
        &self,
        disk: &ResourceName,
        metadata: &BTreeMap<String, String>,
    ) -> Result<ResourceName, CloudError> {
        Ok(self.disks.snapshot_disk(disk, metadata).await?)
    }

    /// Deletes a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Disk`] when the deletion fails.
    pub async fn delete_snapshot(&self, snapshot: &ResourceName) -> Result<(), CloudError> {
        Ok(self.disks.delete_disk(snapshot).await?)
    }

    /// Names of the data disks attached to an instance.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Vm`] when the instance does not exist.
    pub async fn get_disks(&self, instance_id: &InstanceId) -> Result<Vec<String>, CloudError> {
        Ok(self
            .vms
            .data_disks(instance_id)
            .await?
            .into_iter()
            .map(|disk| disk.name)
            .collect())
    }
}

fn persistent_disks(settings: &mut Value) -> Option<&mut Map<String, Value>> {
    settings
        .pointer_mut("/disks/persistent")
        .and_then(Value::as_object_mut)
}
