//! Object-store collaborator holding disk bytes.
//!
//! Blob upload and download mechanics live behind this trait; the disk
//! manager only needs allocation, probing, deletion, snapshot copies and
//! listing.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::CloudFuture;

/// Container holding every disk blob.
pub const DISK_CONTAINER: &str = "bosh";

/// Listing entry returned by [`ObjectStore::list_blobs`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlobRef {
    /// Blob name inside its container.
    pub name: String,
    /// Absolute blob URI.
    pub uri: String,
}

/// Errors raised by object-store implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ObjectStoreError {
    /// Raised when the addressed blob does not exist.
    #[error("blob {container}/{name} not found in {scope}")]
    NotFound {
        /// Storage scope (account) addressed.
        scope: String,
        /// Container name.
        container: String,
        /// Blob name.
        name: String,
    },
    /// Raised when the storage service rejects or fails a request.
    #[error("object store request on {container}/{name} failed: {message}")]
    Request {
        /// Container name.
        container: String,
        /// Blob name or listing prefix.
        name: String,
        /// Message reported by the storage service.
        message: String,
    },
}

/// Byte-level blob storage used for disks.
pub trait ObjectStore: Send + Sync {
    /// Allocates an empty page blob of `size_gib` gibibytes.
    fn create_empty_blob<'a>(
        &'a self,
        scope: &'a str,
        container: &'a str,
        name: &'a str,
        size_gib: u32,
    ) -> CloudFuture<'a, (), ObjectStoreError>;

    /// Reports whether the blob exists.
    fn blob_exists<'a>(
        &'a self,
        scope: &'a str,
        container: &'a str,
        name: &'a str,
    ) -> CloudFuture<'a, bool, ObjectStoreError>;

    /// Deletes the blob.
    fn delete_blob<'a>(
        &'a self,
        scope: &'a str,
        container: &'a str,
        name: &'a str,
    ) -> CloudFuture<'a, (), ObjectStoreError>;

    /// Snapshots `name` tagged with `metadata` and copies the snapshot to
    /// `destination`, returning the snapshot identifier.
    fn snapshot_blob<'a>(
        &'a self,
        scope: &'a str,
        container: &'a str,
        name: &'a str,
        metadata: &'a BTreeMap<String, String>,
        destination: &'a str,
    ) -> CloudFuture<'a, String, ObjectStoreError>;

    /// Lists blobs whose names start with `prefix`.
    fn list_blobs<'a>(
        &'a self,
        scope: &'a str,
        container: &'a str,
        prefix: &'a str,
    ) -> CloudFuture<'a, Vec<BlobRef>, ObjectStoreError>;

    /// Builds the absolute URI of a blob.
    fn blob_uri(&self, scope: &str, container: &str, name: &str) -> String;
}
