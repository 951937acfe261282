//! Resource Manager implementation of [`ResourceClient`].

mod wire;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::info;

use super::types::{
    AvailabilitySet, AvailabilitySetParams, DataDisk, Endpoint, LoadBalancer, LoadBalancerParams,
    NetworkInterface, NetworkInterfaceParams, PublicIp, StorageAccount, Subnet, Tags,
    VirtualMachine, VirtualMachineParams,
};
use super::{ClientError, ResourceClient, next_free_lun};
use crate::CloudFuture;
use crate::control_plane::{ControlPlane, HttpMethod, HttpTransport, RequestBody};
use crate::naming::CachingMode;
use wire::{
    AvailabilitySetProperties, Collection, LoadBalancerProperties, NetworkInterfaceProperties,
    NoProperties, PublicIpProperties, Resource, VirtualMachineProperties,
};

const NETWORK: &str = "Microsoft.Network";
const COMPUTE: &str = "Microsoft.Compute";
const STORAGE: &str = "Microsoft.Storage";
const FRONTEND_NAME: &str = "LBFE";
const BACKEND_NAME: &str = "LBBE";

/// Subscription and resource group every request is scoped to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArmScope {
    /// Management endpoint, e.g. `https://management.azure.com`.
    pub management_endpoint: String,
    /// Subscription identifier.
    pub subscription_id: String,
    /// Resource group holding every managed resource.
    pub resource_group: String,
    /// API version appended to every request.
    pub api_version: String,
}

impl ArmScope {
    fn resource_id(&self, provider: &str, path: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/{provider}/{path}",
            self.subscription_id, self.resource_group
        )
    }

    fn uri(&self, provider: &str, path: &str) -> String {
        format!(
            "{}{}?api-version={}",
            self.management_endpoint.trim_end_matches('/'),
            self.resource_id(provider, path),
            self.api_version
        )
    }
}

/// [`ResourceClient`] speaking the Resource Manager REST API.
#[derive(Debug)]
pub struct ArmClient<T: HttpTransport> {
    plane: ControlPlane<T>,
    scope: ArmScope,
}

impl<T: HttpTransport> ArmClient<T> {
    /// Creates a client issuing requests through `plane`.
    #[must_use]
    pub const fn new(plane: ControlPlane<T>, scope: ArmScope) -> Self {
        Self { plane, scope }
    }

    /// Request scope.
    #[must_use]
    pub const fn scope(&self) -> &ArmScope {
        &self.scope
    }

    async fn fetch<R: DeserializeOwned>(
        &self,
        resource: &str,
        uri: &str,
    ) -> Result<Option<R>, ClientError> {
        match self.plane.get(uri).await? {
            None | Some(Value::Null) => Ok(None),
            Some(document) => serde_json::from_value(document)
                .map(Some)
                .map_err(|err| ClientError::malformed(resource, &err)),
        }
    }

    async fn put(&self, uri: &str, document: Value) -> Result<(), ClientError> {
        self.plane
            .call(HttpMethod::Put, uri, RequestBody::Json(document))
            .await?;
        Ok(())
    }

    async fn delete(&self, uri: &str) -> Result<(), ClientError> {
        self.plane
            .call(HttpMethod::Delete, uri, RequestBody::Empty)
            .await?;
        Ok(())
    }

    fn vm_uri(&self, name: &str) -> String {
        self.scope.uri(COMPUTE, &format!("virtualMachines/{name}"))
    }

    async fn vm_document(&self, name: &str) -> Result<Value, ClientError> {
        match self.plane.get(&self.vm_uri(name)).await? {
            None | Some(Value::Null) => Err(ClientError::VirtualMachineNotFound {
                name: name.to_owned(),
            }),
            Some(mut document) => {
                if let Some(object) = document.as_object_mut() {
                    object.remove("resources");
                }
                Ok(document)
            }
        }
    }

    fn load_balancer_body(&self, params: &LoadBalancerParams) -> Value {
        let lb_id = self.scope.resource_id(
            NETWORK,
            &format!("loadBalancers/{}", params.name),
        );
        let frontend_id = format!("{lb_id}/frontendIPConfigurations/{FRONTEND_NAME}");
        let rules: Vec<Value> = nat_rules("Tcp", &params.tcp_endpoints, &frontend_id)
            .chain(nat_rules("Udp", &params.udp_endpoints, &frontend_id))
            .collect();
        json!({
            "name": params.name,
            "location": params.public_ip.location,
            "tags": params.tags,
            "properties": {
                "frontendIPConfigurations": [{
                    "name": FRONTEND_NAME,
                    "properties": { "publicIPAddress": { "id": params.public_ip.id } }
                }],
                "backendAddressPools": [{ "name": BACKEND_NAME }],
                "inboundNatRules": rules,
            }
        })
    }
}

fn nat_rules<'a>(
    protocol: &'a str,
    endpoints: &'a [Endpoint],
    frontend_id: &'a str,
) -> impl Iterator<Item = Value> + 'a {
    endpoints.iter().enumerate().map(move |(index, endpoint)| {
        json!({
            "name": format!("NatRule-{protocol}EndPoints-{index}"),
            "properties": {
                "frontendPort": endpoint.frontend_port,
                "backendPort": endpoint.backend_port,
                "protocol": protocol,
                "frontendIPConfiguration": { "id": frontend_id },
            }
        })
    })
}

fn network_interface_body(params: &NetworkInterfaceParams) -> Value {
    let (pools, rules) = params.load_balancer.as_ref().map_or_else(
        || (Vec::new(), Vec::new()),
        |lb| (ids(&lb.backend_address_pools), ids(&lb.inbound_nat_rules)),
    );
    let allocation = if params.private_ip.is_some() {
        "Static"
    } else {
        "Dynamic"
    };
    json!({
        "name": params.name,
        "location": params.location,
        "tags": params.tags,
        "properties": {
            "ipConfigurations": [{
                "name": "ipconfig1",
                "properties": {
                    "privateIPAddress": params.private_ip,
                    "privateIPAllocationMethod": allocation,
                    "subnet": { "id": params.subnet.id },
                    "loadBalancerBackendAddressPools": pools,
                    "loadBalancerInboundNatRules": rules,
                }
            }]
        }
    })
}

fn ids(values: &[String]) -> Vec<Value> {
    values.iter().map(|id| json!({ "id": id })).collect()
}

fn virtual_machine_body(params: &VirtualMachineParams) -> Value {
    let public_keys: Vec<Value> = params
        .ssh_cert_data
        .iter()
        .map(|key| {
            json!({
                "path": format!("/home/{}/.ssh/authorized_keys", params.username),
                "keyData": key,
            })
        })
        .collect();
    let mut properties = json!({
        "hardwareProfile": { "vmSize": params.vm_size },
        "osProfile": {
            "customData": params.custom_data,
            "computerName": params.name,
            "adminUsername": params.username,
            "linuxConfiguration": {
                "disablePasswordAuthentication": true,
                "ssh": { "publicKeys": public_keys },
            }
        },
        "storageProfile": {
            "osDisk": {
                "name": params.os_disk_name,
                "osType": "Linux",
                "createOption": "FromImage",
                "caching": params.caching.as_str(),
                "image": { "uri": params.image_uri },
                "vhd": { "uri": params.os_vhd_uri },
            }
        },
        "networkProfile": {
            "networkInterfaces": [{ "id": params.network_interface.id }]
        }
    });
    if let (Some(set), Some(object)) = (&params.availability_set, properties.as_object_mut()) {
        object.insert(String::from("availabilitySet"), json!({ "id": set.id }));
    }
    json!({
        "name": params.name,
        "location": params.location,
        "type": format!("{COMPUTE}/virtualMachines"),
        "tags": params.tags,
        "properties": properties,
    })
}

fn data_disks_mut(document: &mut Value) -> Result<&mut Vec<Value>, ClientError> {
    let malformed = || ClientError::Malformed {
        resource: String::from("virtual machine"),
        message: String::from("missing properties.storageProfile"),
    };
    let profile = document
        .pointer_mut("/properties/storageProfile")
        .and_then(Value::as_object_mut)
        .ok_or_else(malformed)?;
    profile
        .entry("dataDisks")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(malformed)
}

fn parse_vm(document: &Value) -> Result<VirtualMachine, ClientError> {
    serde_json::from_value::<Resource<VirtualMachineProperties>>(document.clone())
        .map(VirtualMachine::from)
        .map_err(|err| ClientError::malformed("virtual machine", &err))
}

impl<T: HttpTransport> ResourceClient for ArmClient<T> {
    fn get_subnet<'a>(
        &'a self,
        virtual_network: &'a str,
        subnet: &'a str,
    ) -> CloudFuture<'a, Option<Subnet>, ClientError> {
        Box::pin(async move {
            let uri = self.scope.uri(
                NETWORK,
                &format!("virtualNetworks/{virtual_network}/subnets/{subnet}"),
            );
            let found: Option<Resource<NoProperties>> = self.fetch("subnet", &uri).await?;
            Ok(found.map(Subnet::from))
        })
    }

    fn get_storage_account<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, Option<StorageAccount>, ClientError> {
        Box::pin(async move {
            let uri = self.scope.uri(STORAGE, &format!("storageAccounts/{name}"));
            let found: Option<Resource<NoProperties>> =
                self.fetch("storage account", &uri).await?;
            Ok(found.map(StorageAccount::from))
        })
    }

    fn list_public_ips(&self) -> CloudFuture<'_, Vec<PublicIp>, ClientError> {
        Box::pin(async move {
            let uri = self.scope.uri(NETWORK, "publicIPAddresses");
            let listed: Option<Collection<Resource<PublicIpProperties>>> =
                self.fetch("public IP list", &uri).await?;
            Ok(listed
                .map(|collection| collection.value.into_iter().map(PublicIp::from).collect())
                .unwrap_or_default())
        })
    }

    fn create_load_balancer<'a>(
        &'a self,
        params: &'a LoadBalancerParams,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            info!(name = %params.name, "creating load balancer");
            let uri = self
                .scope
                .uri(NETWORK, &format!("loadBalancers/{}", params.name));
            self.put(&uri, self.load_balancer_body(params)).await
        })
    }

    fn get_load_balancer<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, Option<LoadBalancer>, ClientError> {
        Box::pin(async move {
            let uri = self.scope.uri(NETWORK, &format!("loadBalancers/{name}"));
            let found: Option<Resource<LoadBalancerProperties>> =
                self.fetch("load balancer", &uri).await?;
            Ok(found.map(LoadBalancer::from))
        })
    }

    fn delete_load_balancer<'a>(&'a self, name: &'a str) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            info!(name, "deleting load balancer");
            self.delete(&self.scope.uri(NETWORK, &format!("loadBalancers/{name}")))
                .await
        })
    }

    fn create_network_interface<'a>(
        &'a self,
        params: &'a NetworkInterfaceParams,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            info!(name = %params.name, "creating network interface");
            let uri = self
                .scope
                .uri(NETWORK, &format!("networkInterfaces/{}", params.name));
            self.put(&uri, network_interface_body(params)).await
        })
    }

    fn get_network_interface<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, Option<NetworkInterface>, ClientError> {
        Box::pin(async move {
            let uri = self
                .scope
                .uri(NETWORK, &format!("networkInterfaces/{name}"));
            let found: Option<Resource<NetworkInterfaceProperties>> =
                self.fetch("network interface", &uri).await?;
            Ok(found.map(NetworkInterface::from))
        })
    }

    fn delete_network_interface<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            info!(name, "deleting network interface");
            self.delete(
                &self
                    .scope
                    .uri(NETWORK, &format!("networkInterfaces/{name}")),
            )
            .await
        })
    }

    fn create_availability_set<'a>(
        &'a self,
        params: &'a AvailabilitySetParams,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            info!(name = %params.name, "creating availability set");
            let uri = self
                .scope
                .uri(COMPUTE, &format!("availabilitySets/{}", params.name));
            let body = json!({
                "name": params.name,
                "location": params.location,
                "tags": params.tags,
                "properties": {
                    "platformUpdateDomainCount": params.platform_update_domain_count,
                    "platformFaultDomainCount": params.platform_fault_domain_count,
                }
            });
            self.put(&uri, body).await
        })
    }

    fn get_availability_set<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, Option<AvailabilitySet>, ClientError> {
        Box::pin(async move {
            let uri = self
                .scope
                .uri(COMPUTE, &format!("availabilitySets/{name}"));
            let found: Option<Resource<AvailabilitySetProperties>> =
                self.fetch("availability set", &uri).await?;
            Ok(found.map(AvailabilitySet::from))
        })
    }

    fn delete_availability_set<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            info!(name, "deleting availability set");
            self.delete(
                &self
                    .scope
                    .uri(COMPUTE, &format!("availabilitySets/{name}")),
            )
            .await
        })
    }

    fn create_virtual_machine<'a>(
        &'a self,
        params: &'a VirtualMachineParams,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            info!(name = %params.name, size = %params.vm_size, "creating virtual machine");
            let uri = format!("{}&validating=true", self.vm_uri(&params.name));
            self.put(&uri, virtual_machine_body(params)).await
        })
    }

    fn get_virtual_machine<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, Option<VirtualMachine>, ClientError> {
        Box::pin(async move {
            let found: Option<Resource<VirtualMachineProperties>> =
                self.fetch("virtual machine", &self.vm_uri(name)).await?;
            Ok(found.map(VirtualMachine::from))
        })
    }

    fn delete_virtual_machine<'a>(&'a self, name: &'a str) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            info!(name, "deleting virtual machine");
            self.delete(&self.vm_uri(name)).await
        })
    }

    fn restart_virtual_machine<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            info!(name, "restarting virtual machine");
            let uri = self
                .scope
                .uri(COMPUTE, &format!("virtualMachines/{name}/restart"));
            self.plane
                .call(HttpMethod::Post, &uri, RequestBody::Empty)
                .await?;
            Ok(())
        })
    }

    fn update_virtual_machine_tags<'a>(
        &'a self,
        name: &'a str,
        tags: &'a Tags,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            info!(name, "updating virtual machine tags");
            let mut document = self.vm_document(name).await?;
            if let Some(object) = document.as_object_mut() {
                let tags: Map<String, Value> = tags
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                    .collect();
                object.insert(String::from("tags"), Value::Object(tags));
            }
            self.put(&self.vm_uri(name), document).await
        })
    }

    fn attach_disk_to_virtual_machine<'a>(
        &'a self,
        vm_name: &'a str,
        disk_name: &'a str,
        disk_uri: &'a str,
        caching: CachingMode,
    ) -> CloudFuture<'a, DataDisk, ClientError> {
        Box::pin(async move {
            info!(vm = vm_name, disk = disk_name, "attaching disk");
            let mut document = self.vm_document(vm_name).await?;
            let current = parse_vm(&document)?;
            let lun = next_free_lun(&current.data_disks).ok_or_else(|| ClientError::NoFreeLun {
                name: vm_name.to_owned(),
            })?;
            data_disks_mut(&mut document)?.push(json!({
                "name": disk_name,
                "lun": lun,
                "createOption": "Attach",
                "caching": caching.as_str(),
                "vhd": { "uri": disk_uri },
            }));
            self.put(&self.vm_uri(vm_name), document).await?;
            Ok(DataDisk {
                name: disk_name.to_owned(),
                lun,
                uri: disk_uri.to_owned(),
                caching,
            })
        })
    }

    fn detach_disk_from_virtual_machine<'a>(
        &'a self,
        vm_name: &'a str,
        disk_name: &'a str,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            info!(vm = vm_name, disk = disk_name, "detaching disk");
            let mut document = self.vm_document(vm_name).await?;
            let disks = data_disks_mut(&mut document)?;
            let position = disks
                .iter()
                .position(|disk| disk.get("name").and_then(Value::as_str) == Some(disk_name))
                .ok_or_else(|| ClientError::DiskNotAttached {
                    disk_name: disk_name.to_owned(),
                    instance_id: vm_name.to_owned(),
                })?;
            disks.remove(position);
            self.put(&self.vm_uri(vm_name), document).await
        })
    }
}
