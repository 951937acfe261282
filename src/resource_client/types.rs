//! Remote resources and creation parameters.

use std::collections::BTreeMap;
use std::fmt;

use crate::naming::CachingMode;

/// Tags attached to remote resources.
pub type Tags = BTreeMap<String, String>;

/// Subnet of a virtual network.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Subnet {
    /// Resource identifier.
    pub id: String,
    /// Subnet name.
    pub name: String,
}

/// Storage account backing disks and images.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StorageAccount {
    /// Account name.
    pub name: String,
    /// Region the account lives in.
    pub location: String,
}

/// Reserved public IP address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublicIp {
    /// Resource identifier.
    pub id: String,
    /// Resource name.
    pub name: String,
    /// Region of the address.
    pub location: String,
    /// Allocated address, absent while unallocated.
    pub ip_address: Option<String>,
}

/// Load balancer fronting one or more instances.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadBalancer {
    /// Resource identifier.
    pub id: String,
    /// Resource name.
    pub name: String,
    /// Backend address pool identifiers.
    pub backend_address_pools: Vec<String>,
    /// Inbound NAT rule identifiers.
    pub inbound_nat_rules: Vec<String>,
}

/// Network interface card.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkInterface {
    /// Resource identifier.
    pub id: String,
    /// Resource name.
    pub name: String,
    /// Region of the interface.
    pub location: String,
    /// Tags; `availability_set` references the instance's group.
    pub tags: Tags,
    /// Private address assigned to the interface.
    pub private_ip: Option<String>,
}

impl NetworkInterface {
    /// Name of the availability set recorded in the tags, if any.
    #[must_use]
    pub fn availability_set(&self) -> Option<&str> {
        self.tags.get(AVAILABILITY_SET_TAG).map(String::as_str)
    }
}

/// Tag key linking a network interface to its availability set.
pub const AVAILABILITY_SET_TAG: &str = "availability_set";

/// Availability (placement) set spreading instances across domains.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AvailabilitySet {
    /// Resource identifier.
    pub id: String,
    /// Resource name.
    pub name: String,
    /// Region of the set.
    pub location: String,
    /// Update domain count.
    pub platform_update_domain_count: u32,
    /// Fault domain count.
    pub platform_fault_domain_count: u32,
    /// Identifiers of member virtual machines.
    pub virtual_machines: Vec<String>,
}

/// Data disk attached to a virtual machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataDisk {
    /// Disk name.
    pub name: String,
    /// Logical unit number assigned by the remote side.
    pub lun: u32,
    /// Backing blob URI.
    pub uri: String,
    /// Host caching mode.
    pub caching: CachingMode,
}

/// Virtual machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VirtualMachine {
    /// Resource identifier.
    pub id: String,
    /// Resource name (the instance id).
    pub name: String,
    /// Region of the machine.
    pub location: String,
    /// Size (instance type).
    pub vm_size: String,
    /// Tags.
    pub tags: Tags,
    /// Provisioning state reported by the remote side.
    pub provisioning_state: String,
    /// Attached data disks.
    pub data_disks: Vec<DataDisk>,
}

/// Frontend-to-backend port mapping of a load balancer.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Endpoint {
    /// Port exposed on the public address.
    pub frontend_port: u16,
    /// Port on the instance.
    pub backend_port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.frontend_port, self.backend_port)
    }
}

/// Parameters for creating a load balancer bound to a public IP.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadBalancerParams {
    /// Name, equal to the instance id.
    pub name: String,
    /// Public IP the frontend binds to.
    pub public_ip: PublicIp,
    /// Tags.
    pub tags: Tags,
    /// TCP port mappings.
    pub tcp_endpoints: Vec<Endpoint>,
    /// UDP port mappings.
    pub udp_endpoints: Vec<Endpoint>,
}

/// Parameters for creating a network interface.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkInterfaceParams {
    /// Name, equal to the instance id.
    pub name: String,
    /// Region.
    pub location: String,
    /// Subnet the interface joins.
    pub subnet: Subnet,
    /// Static private address; dynamic allocation when absent.
    pub private_ip: Option<String>,
    /// Tags.
    pub tags: Tags,
    /// Load balancer whose pools and NAT rules the interface joins.
    pub load_balancer: Option<LoadBalancer>,
}

/// Parameters for creating an availability set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AvailabilitySetParams {
    /// Name.
    pub name: String,
    /// Region.
    pub location: String,
    /// Tags.
    pub tags: Tags,
    /// Update domain count.
    pub platform_update_domain_count: u32,
    /// Fault domain count.
    pub platform_fault_domain_count: u32,
}

/// Parameters for creating a virtual machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VirtualMachineParams {
    /// Name, equal to the instance id.
    pub name: String,
    /// Region.
    pub location: String,
    /// Tags.
    pub tags: Tags,
    /// Size (instance type).
    pub vm_size: String,
    /// Admin user.
    pub username: String,
    /// SSH public key installed for `username`.
    pub ssh_cert_data: Option<String>,
    /// Base64 bootstrap metadata.
    pub custom_data: String,
    /// Source image URI.
    pub image_uri: String,
    /// OS disk name.
    pub os_disk_name: String,
    /// OS disk blob URI.
    pub os_vhd_uri: String,
    /// OS disk caching.
    pub caching: CachingMode,
    /// Network interface to attach.
    pub network_interface: NetworkInterface,
    /// Availability set to join.
    pub availability_set: Option<AvailabilitySet>,
}
