//! Remote resource client.
//!
//! [`ResourceClient`] is the narrow surface the provisioning orchestrator
//! needs from the control plane. [`ArmClient`] implements it against the
//! Resource Manager REST API through [`crate::control_plane::ControlPlane`].

mod arm;
mod error;
mod types;

use crate::CloudFuture;
use crate::naming::CachingMode;

pub use arm::{ArmClient, ArmScope};
pub use error::ClientError;
pub use types::{
    AVAILABILITY_SET_TAG, AvailabilitySet, AvailabilitySetParams, DataDisk, Endpoint,
    LoadBalancer, LoadBalancerParams, NetworkInterface, NetworkInterfaceParams, PublicIp,
    StorageAccount, Subnet, Tags, VirtualMachine, VirtualMachineParams,
};

/// Number of logical units a virtual machine exposes for data disks.
pub const MAX_LUNS: u32 = 64;

/// Returns the lowest logical unit number not used by `disks`.
#[must_use]
pub fn next_free_lun(disks: &[DataDisk]) -> Option<u32> {
    (0..MAX_LUNS).find(|lun| disks.iter().all(|disk| disk.lun != *lun))
}

/// Operations the orchestrator performs against remote resources.
///
/// Lookups return `Ok(None)` when the resource does not exist; deletes of
/// absent resources succeed.
pub trait ResourceClient: Send + Sync {
    /// Looks a subnet up by virtual network and subnet name.
    fn get_subnet<'a>(
        &'a self,
        virtual_network: &'a str,
        subnet: &'a str,
    ) -> CloudFuture<'a, Option<Subnet>, ClientError>;

    /// Looks a storage account up by name.
    fn get_storage_account<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, Option<StorageAccount>, ClientError>;

    /// Lists the public IPs of the resource group.
    fn list_public_ips(&self) -> CloudFuture<'_, Vec<PublicIp>, ClientError>;

    /// Creates a load balancer bound to a public IP.
    fn create_load_balancer<'a>(
        &'a self,
        params: &'a LoadBalancerParams,
    ) -> CloudFuture<'a, (), ClientError>;

    /// Looks a load balancer up by name.
    fn get_load_balancer<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, Option<LoadBalancer>, ClientError>;

    /// Deletes a load balancer.
    fn delete_load_balancer<'a>(&'a self, name: &'a str) -> CloudFuture<'a, (), ClientError>;

    /// Creates a network interface.
    fn create_network_interface<'a>(
        &'a self,
        params: &'a NetworkInterfaceParams,
    ) -> CloudFuture<'a, (), ClientError>;

    /// Looks a network interface up by name.
    fn get_network_interface<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, Option<NetworkInterface>, ClientError>;

    /// Deletes a network interface.
    fn delete_network_interface<'a>(&'a self, name: &'a str)
    -> CloudFuture<'a, (), ClientError>;

    /// Creates an availability set.
    fn create_availability_set<'a>(
        &'a self,
        params: &'a AvailabilitySetParams,
    ) -> CloudFuture<'a, (), ClientError>;

    /// Looks an availability set up by name.
    fn get_availability_set<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, Option<AvailabilitySet>, ClientError>;

    /// Deletes an availability set.
    fn delete_availability_set<'a>(&'a self, name: &'a str)
    -> CloudFuture<'a, (), ClientError>;

    /// Creates a virtual machine.
    fn create_virtual_machine<'a>(
        &'a self,
        params: &'a VirtualMachineParams,
    ) -> CloudFuture<'a, (), ClientError>;

    /// Looks a virtual machine up by name.
    fn get_virtual_machine<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, Option<VirtualMachine>, ClientError>;

    /// Deletes a virtual machine.
    fn delete_virtual_machine<'a>(&'a self, name: &'a str) -> CloudFuture<'a, (), ClientError>;

    /// Restarts a virtual machine.
    fn restart_virtual_machine<'a>(&'a self, name: &'a str)
    -> CloudFuture<'a, (), ClientError>;

    /// Replaces the tags of a virtual machine.
    fn update_virtual_machine_tags<'a>(
        &'a self,
        name: &'a str,
        tags: &'a Tags,
    ) -> CloudFuture<'a, (), ClientError>;

    /// Attaches a data disk at the lowest free logical unit and returns the
    /// attachment.
    fn attach_disk_to_virtual_machine<'a>(
        &'a self,
        vm_name: &'a str,
        disk_name: &'a str,
        disk_uri: &'a str,
        caching: CachingMode,
    ) -> CloudFuture<'a, DataDisk, ClientError>;

    /// Detaches a data disk.
    ///
    /// Fails with [`ClientError::VirtualMachineNotFound`] when the machine is
    /// absent and [`ClientError::DiskNotAttached`] when the disk is not in its
    /// data-disk list.
    fn detach_disk_from_virtual_machine<'a>(
        &'a self,
        vm_name: &'a str,
        disk_name: &'a str,
    ) -> CloudFuture<'a, (), ClientError>;
}

#[cfg(test)]
mod tests;
