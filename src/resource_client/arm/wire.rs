//! Resource Manager documents as returned by `GET`.

use serde::Deserialize;

use super::super::types::{
    AvailabilitySet, DataDisk, LoadBalancer, NetworkInterface, PublicIp, StorageAccount, Subnet,
    Tags, VirtualMachine,
};

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "R: Deserialize<'de>"))]
pub(super) struct Collection<R> {
    #[serde(default)]
    pub(super) value: Vec<R>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Resource<P> {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    tags: Tags,
    #[serde(default)]
    properties: P,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct NoProperties {}

#[derive(Debug, Default, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PublicIpProperties {
    ip_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct LoadBalancerProperties {
    #[serde(default)]
    backend_address_pools: Vec<IdRef>,
    #[serde(default)]
    inbound_nat_rules: Vec<IdRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct NetworkInterfaceProperties {
    #[serde(default)]
    ip_configurations: Vec<IpConfiguration>,
}

#[derive(Debug, Default, Deserialize)]
struct IpConfiguration {
    #[serde(default)]
    properties: IpConfigurationProperties,
}

#[derive(Debug, Default, Deserialize)]
struct IpConfigurationProperties {
    #[serde(rename = "privateIPAddress")]
    private_ip_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AvailabilitySetProperties {
    #[serde(default)]
    platform_update_domain_count: u32,
    #[serde(default)]
    platform_fault_domain_count: u32,
    #[serde(default)]
    virtual_machines: Vec<IdRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct VirtualMachineProperties {
    #[serde(default)]
    hardware_profile: HardwareProfile,
    #[serde(default)]
    provisioning_state: String,
    #[serde(default)]
    storage_profile: StorageProfile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardwareProfile {
    #[serde(default)]
    vm_size: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageProfile {
    #[serde(default)]
    data_disks: Vec<WireDataDisk>,
}

#[derive(Debug, Deserialize)]
struct WireDataDisk {
    name: String,
    lun: u32,
    #[serde(default)]
    vhd: Option<Vhd>,
    #[serde(default)]
    caching: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Vhd {
    uri: String,
}

impl From<Resource<NoProperties>> for Subnet {
    fn from(resource: Resource<NoProperties>) -> Self {
        Self {
            id: resource.id,
            name: resource.name,
        }
    }
}

impl From<Resource<NoProperties>> for StorageAccount {
    fn from(resource: Resource<NoProperties>) -> Self {
        Self {
            name: resource.name,
            location: resource.location,
        }
    }
}

impl From<Resource<PublicIpProperties>> for PublicIp {
    fn from(resource: Resource<PublicIpProperties>) -> Self {
        Self {
            id: resource.id,
            name: resource.name,
            location: resource.location,
            ip_address: resource.properties.ip_address,
        }
    }
}

impl From<Resource<LoadBalancerProperties>> for LoadBalancer {
    fn from(resource: Resource<LoadBalancerProperties>) -> Self {
        let LoadBalancerProperties {
            backend_address_pools,
            inbound_nat_rules,
        } = resource.properties;
        Self {
            id: resource.id,
            name: resource.name,
            backend_address_pools: backend_address_pools.into_iter().map(|pool| pool.id).collect(),
            inbound_nat_rules: inbound_nat_rules.into_iter().map(|rule| rule.id).collect(),
        }
    }
}

impl From<Resource<NetworkInterfaceProperties>> for NetworkInterface {
    fn from(resource: Resource<NetworkInterfaceProperties>) -> Self {
        let private_ip = resource
            .properties
            .ip_configurations
            .into_iter()
            .find_map(|config| config.properties.private_ip_address);
        Self {
            id: resource.id,
            name: resource.name,
            location: resource.location,
            tags: resource.tags,
            private_ip,
        }
    }
}

impl From<Resource<AvailabilitySetProperties>> for AvailabilitySet {
    fn from(resource: Resource<AvailabilitySetProperties>) -> Self {
        let properties = resource.properties;
        Self {
            id: resource.id,
            name: resource.name,
            location: resource.location,
            platform_update_domain_count: properties.platform_update_domain_count,
            platform_fault_domain_count: properties.platform_fault_domain_count,
            virtual_machines: properties
                .virtual_machines
                .into_iter()
                .map(|vm| vm.id)
                .collect(),
        }
    }
}

impl From<Resource<VirtualMachineProperties>> for VirtualMachine {
    fn from(resource: Resource<VirtualMachineProperties>) -> Self {
        let properties = resource.properties;
        Self {
            id: resource.id,
            name: resource.name,
            location: resource.location,
            vm_size: properties.hardware_profile.vm_size,
            tags: resource.tags,
            provisioning_state: properties.provisioning_state,
            data_disks: properties
                .storage_profile
                .data_disks
                .into_iter()
                .map(|disk| DataDisk {
                    name: disk.name,
                    lun: disk.lun,
                    uri: disk.vhd.map(|vhd| vhd.uri).unwrap_or_default(),
                    caching: disk
                        .caching
                        .and_then(|caching| caching.parse().ok())
                        .unwrap_or_default(),
                })
                .collect(),
        }
    }
}
