//! Cloud provider interface for provisioning virtual machines and managing
//! persistent disks on a Resource Manager style control plane.
//!
//! The crate is organised leaves first: a pure resource-naming codec, a
//! resilient submit/poll protocol for asynchronous remote operations, a disk
//! lifecycle manager over blob storage, and a provisioning orchestrator that
//! unwinds partially created resources when any step fails.

use std::future::Future;
use std::pin::Pin;

pub mod cloud;
pub mod config;
pub mod control_plane;
pub mod disk;
pub mod naming;
pub mod network;
pub mod object_store;
pub mod registry;
pub mod resource_client;
pub mod test_support;
pub mod vm;

/// Future returned by collaborator traits.
pub type CloudFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

pub use cloud::{Cloud, CloudError, DiskProperties, disk_size_gib};
pub use config::{AzureConfig, ConfigError, Endpoints};
pub use control_plane::{
    ControlPlane, ControlPlaneError, CredentialCache, HttpTransport, PollPolicy,
    ReqwestTransport, ServicePrincipal,
};
pub use disk::{DiskError, DiskManager};
pub use naming::{
    CachingMode, DiskIdentity, DiskRole, DiskTier, InstanceId, NamingCodec, NamingError,
    ResourceName,
};
pub use network::{NetworkError, NetworkPlacement, NetworkSpec};
pub use object_store::{BlobRef, DISK_CONTAINER, ObjectStore, ObjectStoreError};
pub use registry::{RegistryError, SettingsRegistry};
pub use resource_client::{ArmClient, ClientError, ResourceClient};
pub use vm::{ResourcePoolSpec, VmError, VmManager, VmSettings};
