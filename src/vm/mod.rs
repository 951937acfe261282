//! Virtual machine provisioning orchestrator.
//!
//! `create` is a saga over remote resources that have no transactional API:
//! load balancer, network interface, availability set and finally the
//! instance. Lookups happen up front so that missing or conflicting inputs
//! fail before anything exists. Once the first resource is created, any
//! failure replays the compensating actions recorded in the
//! [`ProvisioningContext`] newest first and surfaces the original error as
//! [`VmError::ProvisioningFailed`].

mod error;
mod pool;
mod saga;
mod user_data;

use std::sync::Arc;

use tracing::{info, warn};

use crate::disk::DiskManager;
use crate::naming::{InstanceId, ResourceName, generate_instance_id};
use crate::network::{NetworkPlacement, VipNetwork};
use crate::object_store::ObjectStore;
use crate::resource_client::{
    AVAILABILITY_SET_TAG, AvailabilitySetParams, DataDisk, LoadBalancer, LoadBalancerParams,
    NetworkInterfaceParams, PublicIp, ResourceClient, StorageAccount, Tags, VirtualMachine,
    VirtualMachineParams,
};

pub use error::{ResourceKind, VmError};
pub use pool::ResourcePoolSpec;
pub use saga::{Ownership, ProvisioningContext, UndoAction};
pub use user_data::encode_user_data;

/// Tags stamped on every resource this crate creates.
#[must_use]
pub fn default_tags() -> Tags {
    Tags::from([(String::from("user-agent"), String::from("bosh"))])
}

/// Device label of the data disk at `lun` (`0` is `/dev/sdc`).
///
/// Returns `None` for luns past `/dev/sdz`.
#[must_use]
pub fn device_label(lun: u32) -> Option<String> {
    u32::from(b'c')
        .checked_add(lun)
        .filter(|code| *code <= u32::from(b'z'))
        .and_then(char::from_u32)
        .map(|letter| format!("/dev/sd{letter}"))
}

/// Settings every instance is created with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VmSettings {
    /// Registry endpoint written into the bootstrap metadata.
    pub registry_endpoint: String,
    /// Admin user of the instance.
    pub ssh_user: String,
    /// SSH public key installed for the admin user.
    pub ssh_certificate: Option<String>,
}

/// Everything `create` resolved before creating its first resource.
struct Plan<'a> {
    instance_id: InstanceId,
    image_uri: &'a str,
    pool: &'a ResourcePoolSpec,
    network: &'a NetworkPlacement,
    storage_account: StorageAccount,
    vip: Option<(PublicIp, &'a VipNetwork)>,
    external_load_balancer: Option<LoadBalancer>,
}

/// Creates, inspects and tears down instances.
#[derive(Debug)]
pub struct VmManager<C: ResourceClient, S: ObjectStore> {
    client: Arc<C>,
    disks: DiskManager<S>,
    settings: VmSettings,
}

impl<C: ResourceClient, S: ObjectStore> VmManager<C, S> {
    /// Creates an orchestrator.
    #[must_use]
    pub const fn new(client: Arc<C>, disks: DiskManager<S>, settings: VmSettings) -> Self {
        Self {
            client,
            disks,
            settings,
        }
    }

    /// Disk manager used for OS disks.
    #[must_use]
    pub const fn disks(&self) -> &DiskManager<S> {
        &self.disks
    }

    /// Provisions an instance and returns its identifier.
    ///
    /// # Errors
    ///
    /// Lookup and validation failures surface directly:
    /// [`VmError::NotFound`] for a missing subnet, public IP, load balancer
    /// or storage account, [`VmError::Naming`] for an unknown caching mode,
    /// [`VmError::Validation`] for an empty instance type and
    /// [`VmError::Conflict`] when both a vip network and a named load
    /// balancer are requested. Failures after the first resource was created
    /// are rolled back and reported as [`VmError::ProvisioningFailed`].
    pub async fn create(
        &self,
        seed: &str,
        scope: &str,
        image_uri: &str,
        pool: &ResourcePoolSpec,
        network: &NetworkPlacement,
    ) -> Result<InstanceId, VmError> {
        info!(seed, scope, "creating instance");
        let subnet = self
            .client
            .get_subnet(&network.virtual_network_name, &network.subnet_name)
            .await?
            .ok_or_else(|| {
                VmError::not_found(
                    ResourceKind::Subnet,
                    format!("{}/{}", network.virtual_network_name, network.subnet_name),
                )
            })?;
        pool.os_disk_caching()?;
        if pool.instance_type.trim().is_empty() {
            return Err(VmError::Validation {
                message: String::from("instance_type must be set"),
            });
        }
        let instance_id = generate_instance_id(scope, seed)?;

        if network.vip.is_some() && pool.load_balancer.is_some() {
            return Err(VmError::Conflict {
                message: String::from("Cannot bind two load balancers to one VM"),
            });
        }
        let vip = match &network.vip {
            Some(vip) => Some((self.find_public_ip(&vip.public_ip).await?, vip)),
            None => None,
        };
        let external_load_balancer = match &pool.load_balancer {
            Some(name) => Some(
                self.client
                    .get_load_balancer(name)
                    .await?
                    .ok_or_else(|| VmError::not_found(ResourceKind::LoadBalancer, name))?,
            ),
            None => None,
        };
        let storage_account = self
            .client
            .get_storage_account(scope)
            .await?
            .ok_or_else(|| VmError::not_found(ResourceKind::StorageAccount, scope))?;

        let plan = Plan {
            instance_id: instance_id.clone(),
            image_uri,
            pool,
            network,
            storage_account,
            vip,
            external_load_balancer,
        };
        let mut context = ProvisioningContext::new(instance_id.clone(), subnet);
        match self.provision(plan, &mut context).await {
            Ok(()) => {
                info!(instance_id = %instance_id, "instance created");
                Ok(instance_id)
            }
            Err(err) => {
                warn!(
                    instance_id = %instance_id,
                    error = %err,
                    "provisioning failed, rolling back"
                );
                self.rollback(&context).await;
                Err(VmError::ProvisioningFailed {
                    instance_id: instance_id.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }

    async fn find_public_ip(&self, address: &str) -> Result<PublicIp, VmError> {
        self.client
            .list_public_ips()
            .await?
            .into_iter()
            .find(|ip| ip.ip_address.as_deref() == Some(address))
            .ok_or_else(|| VmError::not_found(ResourceKind::PublicIp, address))
    }

    async fn provision(
        &self,
        plan: Plan<'_>,
        context: &mut ProvisioningContext,
    ) -> Result<(), VmError> {
        let name = plan.instance_id.as_str();
        let location = plan.storage_account.location.clone();

        if let Some((public_ip, vip)) = plan.vip {
            self.client
                .create_load_balancer(&LoadBalancerParams {
                    name: name.to_owned(),
                    public_ip,
                    tags: default_tags(),
                    tcp_endpoints: vip.tcp_endpoints.clone(),
                    udp_endpoints: vip.udp_endpoints.clone(),
                })
                .await?;
            context.load_balancer_created(name);
            let created = self
                .client
                .get_load_balancer(name)
                .await?
                .ok_or_else(|| VmError::not_found(ResourceKind::LoadBalancer, name))?;
            context.use_load_balancer(created, Ownership::Created);
        } else if let Some(existing) = plan.external_load_balancer {
            context.use_load_balancer(existing, Ownership::Reused);
        }

        let mut nic_tags = default_tags();
        if let Some(set) = &plan.pool.availability_set {
            nic_tags.insert(AVAILABILITY_SET_TAG.to_owned(), set.clone());
        }
        self.client
            .create_network_interface(&NetworkInterfaceParams {
                name: name.to_owned(),
                location: location.clone(),
                subnet: context.subnet().clone(),
                private_ip: plan.network.private_ip.clone(),
                tags: nic_tags,
                load_balancer: context.load_balancer().map(|(lb, _)| lb.clone()),
            })
            .await?;
        context.network_interface_created(name);
        let network_interface = self
            .client
            .get_network_interface(name)
            .await?
            .ok_or_else(|| VmError::not_found(ResourceKind::NetworkInterface, name))?;
        context.use_network_interface(network_interface.clone());

        if let Some(set_name) = &plan.pool.availability_set {
            match self.client.get_availability_set(set_name).await? {
                Some(existing) => context.use_availability_set(existing, Ownership::Reused),
                None => {
                    self.client
                        .create_availability_set(&AvailabilitySetParams {
                            name: set_name.clone(),
                            location: location.clone(),
                            tags: default_tags(),
                            platform_update_domain_count: plan.pool.update_domains(),
                            platform_fault_domain_count: plan.pool.fault_domains(),
                        })
                        .await?;
                    context.availability_set_created(set_name);
                    let created = self
                        .client
                        .get_availability_set(set_name)
                        .await?
                        .ok_or_else(|| {
                            VmError::not_found(ResourceKind::AvailabilitySet, set_name.as_str())
                        })?;
                    context.use_availability_set(created, Ownership::Created);
                }
            }
        }

        let os_disk_name = self.disks.os_disk_name(&plan.instance_id);
        let params = VirtualMachineParams {
            name: name.to_owned(),
            location,
            tags: default_tags(),
            vm_size: plan.pool.instance_type.clone(),
            username: self.settings.ssh_user.clone(),
            ssh_cert_data: self.settings.ssh_certificate.clone(),
            custom_data: encode_user_data(
                &self.settings.registry_endpoint,
                name,
                plan.network.dns.as_deref(),
            ),
            image_uri: plan.image_uri.to_owned(),
            os_vhd_uri: self.disks.disk_uri(&os_disk_name)?,
            os_disk_name: os_disk_name.to_string(),
            caching: plan.pool.os_disk_caching()?,
            network_interface,
            availability_set: context.availability_set().map(|(set, _)| set.clone()),
        };
        context.virtual_machine_requested(os_disk_name);
        self.client.create_virtual_machine(&params).await?;
        Ok(())
    }

    async fn rollback(&self, context: &ProvisioningContext) {
        for action in context.rollback_plan() {
            let outcome = match action {
                UndoAction::DeleteVirtualMachine(name) => self
                    .client
                    .delete_virtual_machine(name)
                    .await
                    .map_err(VmError::from),
                UndoAction::DeleteOsDisk(name) => {
                    self.disks.delete_disk(name).await.map_err(VmError::from)
                }
                UndoAction::DeleteAvailabilitySet(name) => {
                    self.delete_availability_set_if_empty(name).await
                }
                UndoAction::DeleteNetworkInterface(name) => self
                    .client
                    .delete_network_interface(name)
                    .await
                    .map_err(VmError::from),
                UndoAction::DeleteLoadBalancer(name) => self
                    .client
                    .delete_load_balancer(name)
                    .await
                    .map_err(VmError::from),
            };
            match outcome {
                Ok(()) => info!(instance_id = %context.instance_id(), %action, "rolled back"),
                Err(err) => warn!(
                    instance_id = %context.instance_id(),
                    %action,
                    error = %err,
                    "rollback step failed"
                ),
            }
        }
    }

    async fn delete_availability_set_if_empty(&self, name: &str) -> Result<(), VmError> {
        if let Some(set) = self.client.get_availability_set(name).await?
            && set.virtual_machines.is_empty()
        {
            self.client.delete_availability_set(name).await?;
        }
        Ok(())
    }

    /// Looks an instance up.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Client`] when the lookup fails.
    pub async fn find(&self, instance_id: &InstanceId) -> Result<Option<VirtualMachine>, VmError> {
        Ok(self.client.get_virtual_machine(instance_id).await?)
    }

    /// Tears an instance down; missing pieces are skipped.
    ///
    /// Deletes the instance, its load balancer, its network interface (and
    /// the availability set named in its tags once empty), its OS disk and
    /// finally any status artifacts, which are cleaned up best effort.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Client`] or [`VmError::Disk`] when a lookup or
    /// deletion fails.
    pub async fn delete(&self, instance_id: &InstanceId) -> Result<(), VmError> {
        info!(instance_id = %instance_id, "deleting instance");
        let name = instance_id.as_str();

        if self.client.get_virtual_machine(name).await?.is_some() {
            self.client.delete_virtual_machine(name).await?;
        }
        if self.client.get_load_balancer(name).await?.is_some() {
            self.client.delete_load_balancer(name).await?;
        }
        if let Some(network_interface) = self.client.get_network_interface(name).await? {
            if let Some(set) = network_interface.availability_set() {
                self.delete_availability_set_if_empty(set).await?;
            }
            self.client.delete_network_interface(name).await?;
        }

        let os_disk_name = self.disks.os_disk_name(instance_id);
        self.disks.delete_disk(&os_disk_name).await?;
        self.disks
            .delete_status_artifacts(instance_id.scope(), name)
            .await;
        Ok(())
    }

    /// Restarts an instance.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Client`] when the restart fails.
    pub async fn reboot(&self, instance_id: &InstanceId) -> Result<(), VmError> {
        info!(instance_id = %instance_id, "rebooting instance");
        Ok(self.client.restart_virtual_machine(instance_id).await?)
    }

    /// Replaces the instance tags with `metadata` plus the default tags.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Client`] when the update fails.
    pub async fn set_metadata(
        &self,
        instance_id: &InstanceId,
        metadata: &Tags,
    ) -> Result<(), VmError> {
        info!(instance_id = %instance_id, "setting instance metadata");
        let mut tags = metadata.clone();
        tags.extend(default_tags());
        Ok(self
            .client
            .update_virtual_machine_tags(instance_id, &tags)
            .await?)
    }

    /// Attaches a data disk and returns its device label.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Disk`] for undecodable disk names,
    /// [`VmError::Client`] when the attachment fails and
    /// [`VmError::Validation`] when the assigned lun has no device label.
    pub async fn attach_disk(
        &self,
        instance_id: &InstanceId,
        disk_name: &ResourceName,
    ) -> Result<String, VmError> {
        info!(instance_id = %instance_id, disk = %disk_name, "attaching disk");
        let disk_uri = self.disks.disk_uri(disk_name)?;
        let caching = self.disks.caching(disk_name)?;
        let attached = self
            .client
            .attach_disk_to_virtual_machine(instance_id, disk_name, &disk_uri, caching)
            .await?;
        device_label(attached.lun).ok_or_else(|| VmError::Validation {
            message: format!("lun {} has no device label", attached.lun),
        })
    }

    /// Detaches a data disk.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Client`] wrapping
    /// [`crate::resource_client::ClientError::DiskNotAttached`] when the disk
    /// is not attached to the instance.
    pub async fn detach_disk(
        &self,
        instance_id: &InstanceId,
        disk_name: &ResourceName,
    ) -> Result<(), VmError> {
        info!(instance_id = %instance_id, disk = %disk_name, "detaching disk");
        Ok(self
            .client
            .detach_disk_from_virtual_machine(instance_id, disk_name)
            .await?)
    }

    /// Data disks attached to an instance.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::NotFound`] when the instance does not exist.
    pub async fn data_disks(&self, instance_id: &InstanceId) -> Result<Vec<DataDisk>, VmError> {
        let vm = self.find(instance_id).await?.ok_or_else(|| {
            VmError::not_found(ResourceKind::VirtualMachine, instance_id.as_str())
        })?;
        Ok(vm.data_disks)
    }
}

#[cfg(test)]
mod tests;
