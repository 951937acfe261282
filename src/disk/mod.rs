//! Persistent disk lifecycle over blob storage.
//!
//! Disks are page blobs in the [`DISK_CONTAINER`] of the storage account
//! encoded in their name. Nothing about a disk is stored elsewhere: scope,
//! caching and tier are always recovered through the [`NamingCodec`].

mod error;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::naming::{
    CachingMode, DiskIdentity, DiskTier, InstanceId, NamingCodec, ResourceName,
};
use crate::object_store::{DISK_CONTAINER, ObjectStore};

pub use error::DiskError;

/// Suffix of the diagnostic status blobs left next to OS disks.
pub const STATUS_SUFFIX: &str = ".status";

/// Creates, snapshots, locates and deletes persistent disks.
#[derive(Debug)]
pub struct DiskManager<S: ObjectStore> {
    store: Arc<S>,
    codec: NamingCodec,
}

impl<S: ObjectStore> Clone for DiskManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            codec: self.codec.clone(),
        }
    }
}

impl<S: ObjectStore> DiskManager<S> {
    /// Creates a manager over `store` decoding names with `codec`.
    #[must_use]
    pub const fn new(store: Arc<S>, codec: NamingCodec) -> Self {
        Self { store, codec }
    }

    /// Naming codec used for every disk.
    #[must_use]
    pub const fn codec(&self) -> &NamingCodec {
        &self.codec
    }

    /// Object store holding disk blobs.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Allocates an empty data disk and returns its generated name.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::InvalidSize`] when `size_gib` is zero,
    /// [`DiskError::Naming`] for an unusable scope and
    /// [`DiskError::Storage`] when allocation fails.
    pub async fn create_disk(
        &self,
        scope: &str,
        size_gib: u32,
        caching: CachingMode,
        tier: DiskTier,
    ) -> Result<ResourceName, DiskError> {
        info!(scope, size_gib, %caching, %tier, "creating disk");
        if size_gib < 1 {
            return Err(DiskError::InvalidSize { size_gib });
        }
        let identity = DiskIdentity::data(scope, caching, tier);
        let name = self.codec.encode(&identity)?;
        let blob = NamingCodec::blob_name(&name);
        self.store
            .create_empty_blob(scope, DISK_CONTAINER, &blob, size_gib)
            .await
            .map_err(|err| DiskError::storage("create_disk", &name, err))?;
        info!(disk = %name, "created empty disk blob");
        Ok(name)
    }

    /// Reports whether the disk blob exists.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::Naming`] for undecodable names and
    /// [`DiskError::Storage`] when the probe fails.
    pub async fn has_disk(&self, name: &ResourceName) -> Result<bool, DiskError> {
        info!(disk = %name, "probing disk");
        let identity = self.codec.decode(name)?;
        self.store
            .blob_exists(
                &identity.scope,
                DISK_CONTAINER,
                &NamingCodec::blob_name(name),
            )
            .await
            .map_err(|err| DiskError::storage("has_disk", name, err))
    }

    /// Deletes the disk; absent disks are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::Naming`] for undecodable names and
    /// [`DiskError::Storage`] when the probe or deletion fails.
    pub async fn delete_disk(&self, name: &ResourceName) -> Result<(), DiskError> {
        info!(disk = %name, "deleting disk");
        if !self.has_disk(name).await? {
            return Ok(());
        }
        let identity = self.codec.decode(name)?;
        self.store
            .delete_blob(
                &identity.scope,
                DISK_CONTAINER,
                &NamingCodec::blob_name(name),
            )
            .await
            .map_err(|err| DiskError::storage("delete_disk", name, err))
    }

    /// Snapshots the disk into a freshly named sibling with the same scope,
    /// caching and tier.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::Naming`] for undecodable names and
    /// [`DiskError::Storage`] when the snapshot copy fails.
    pub async fn snapshot_disk(
        &self,
        name: &ResourceName,
        metadata: &BTreeMap<String, String>,
    ) -> Result<ResourceName, DiskError> {
        info!(disk = %name, "snapshotting disk");
        let source = self.codec.decode(name)?;
        let sibling = DiskIdentity::data(
            source.scope.clone(),
            source.caching_or_default(),
            source.tier_or_default(),
        );
        let snapshot_name = self.codec.encode(&sibling)?;
        let snapshot_id = self
            .store
            .snapshot_blob(
                &source.scope,
                DISK_CONTAINER,
                &NamingCodec::blob_name(name),
                metadata,
                &NamingCodec::blob_name(&snapshot_name),
            )
            .await
            .map_err(|err| DiskError::storage("snapshot_disk", name, err))?;
        info!(
            disk = %name,
            snapshot = %snapshot_name,
            snapshot_id = %snapshot_id,
            "snapshot copied"
        );
        Ok(snapshot_name)
    }

    /// Absolute URI of the disk blob.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::Naming`] for undecodable names.
    pub fn disk_uri(&self, name: &ResourceName) -> Result<String, DiskError> {
        let identity = self.codec.decode(name)?;
        Ok(self.store.blob_uri(
            &identity.scope,
            DISK_CONTAINER,
            &NamingCodec::blob_name(name),
        ))
    }

    /// Caching mode encoded in the disk name.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::Naming`] for undecodable names.
    pub fn caching(&self, name: &ResourceName) -> Result<CachingMode, DiskError> {
        Ok(self.codec.decode(name)?.caching_or_default())
    }

    /// Name of the OS disk of `instance_id`.
    #[must_use]
    pub fn os_disk_name(&self, instance_id: &InstanceId) -> ResourceName {
        NamingCodec::os_disk_name(instance_id)
    }

    /// Removes diagnostic status blobs under `prefix`.
    ///
    /// Failures are logged and swallowed; callers never observe them.
    pub async fn delete_status_artifacts(&self, scope: &str, prefix: &str) {
        info!(scope, prefix, "deleting status artifacts");
        let blobs = match self.store.list_blobs(scope, DISK_CONTAINER, prefix).await {
            Ok(blobs) => blobs,
            Err(err) => {
                warn!(scope, prefix, error = %err, "listing status artifacts failed");
                return;
            }
        };

        for blob in blobs
            .iter()
            .filter(|blob| blob.name.ends_with(STATUS_SUFFIX))
        {
            if let Err(err) = self
                .store
                .delete_blob(scope, DISK_CONTAINER, &blob.name)
                .await
            {
                warn!(scope, blob = %blob.name, error = %err, "deleting status artifact failed");
            }
        }
    }
}

#[cfg(test)]
mod tests;
