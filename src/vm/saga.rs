//! Bookkeeping for one `create` invocation.
//!
//! Every resource the invocation creates pushes an undo action; reused
//! resources are remembered but never pushed. Rollback replays the actions
//! newest first.

use std::fmt;

use crate::naming::{InstanceId, ResourceName};
use crate::resource_client::{AvailabilitySet, LoadBalancer, NetworkInterface, Subnet};

/// Whether a resource was created by this invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Ownership {
    /// Created by this invocation; subject to rollback.
    Created,
    /// Pre-existing and shared; never rolled back.
    Reused,
}

/// Compensating action for a created resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UndoAction {
    /// Delete the virtual machine.
    DeleteVirtualMachine(String),
    /// Delete the OS disk blob.
    DeleteOsDisk(ResourceName),
    /// Delete the availability set if it has no members.
    DeleteAvailabilitySet(String),
    /// Delete the network interface.
    DeleteNetworkInterface(String),
    /// Delete the load balancer.
    DeleteLoadBalancer(String),
}

impl fmt::Display for UndoAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteVirtualMachine(name) => write!(f, "delete virtual machine {name}"),
            Self::DeleteOsDisk(name) => write!(f, "delete OS disk {name}"),
            Self::DeleteAvailabilitySet(name) => write!(f, "delete availability set {name}"),
            Self::DeleteNetworkInterface(name) => write!(f, "delete network interface {name}"),
            Self::DeleteLoadBalancer(name) => write!(f, "delete load balancer {name}"),
        }
    }
}

/// Resources touched by one provisioning attempt.
#[derive(Debug)]
pub struct ProvisioningContext {
    instance_id: InstanceId,
    subnet: Subnet,
    load_balancer: Option<(LoadBalancer, Ownership)>,
    network_interface: Option<NetworkInterface>,
    availability_set: Option<(AvailabilitySet, Ownership)>,
    undo: Vec<UndoAction>,
}

impl ProvisioningContext {
    /// Starts an empty context for `instance_id`.
    #[must_use]
    pub const fn new(instance_id: InstanceId, subnet: Subnet) -> Self {
        Self {
            instance_id,
            subnet,
            load_balancer: None,
            network_interface: None,
            availability_set: None,
            undo: Vec::new(),
        }
    }

    /// Instance being provisioned.
    #[must_use]
    pub const fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Resolved subnet.
    #[must_use]
    pub const fn subnet(&self) -> &Subnet {
        &self.subnet
    }

    /// Registers that a load balancer was created under `name`.
    pub fn load_balancer_created(&mut self, name: &str) {
        self.undo.push(UndoAction::DeleteLoadBalancer(name.to_owned()));
    }

    /// Records the resolved load balancer.
    pub fn use_load_balancer(&mut self, load_balancer: LoadBalancer, ownership: Ownership) {
        self.load_balancer = Some((load_balancer, ownership));
    }

    /// Resolved load balancer and its ownership.
    #[must_use]
    pub fn load_balancer(&self) -> Option<(&LoadBalancer, Ownership)> {
        self.load_balancer
            .as_ref()
            .map(|(load_balancer, ownership)| (load_balancer, *ownership))
    }

    /// Registers that a network interface was created under `name`.
    pub fn network_interface_created(&mut self, name: &str) {
        self.undo
            .push(UndoAction::DeleteNetworkInterface(name.to_owned()));
    }

    /// Records the created network interface.
    pub fn use_network_interface(&mut self, network_interface: NetworkInterface) {
        self.network_interface = Some(network_interface);
    }

    /// Created network interface.
    #[must_use]
    pub const fn network_interface(&self) -> Option<&NetworkInterface> {
        self.network_interface.as_ref()
    }

    /// Registers that an availability set was created under `name`.
    pub fn availability_set_created(&mut self, name: &str) {
        self.undo
            .push(UndoAction::DeleteAvailabilitySet(name.to_owned()));
    }

    /// Records the resolved availability set.
    pub fn use_availability_set(&mut self, set: AvailabilitySet, ownership: Ownership) {
        self.availability_set = Some((set, ownership));
    }

    /// Resolved availability set and its ownership.
    #[must_use]
    pub fn availability_set(&self) -> Option<(&AvailabilitySet, Ownership)> {
        self.availability_set
            .as_ref()
            .map(|(set, ownership)| (set, *ownership))
    }

    /// Registers an instance creation attempt.
    ///
    /// Called before the create request is issued so a partially registered
    /// instance and its OS disk are cleaned up as well.
    pub fn virtual_machine_requested(&mut self, os_disk_name: ResourceName) {
        self.undo.push(UndoAction::DeleteOsDisk(os_disk_name));
        self.undo.push(UndoAction::DeleteVirtualMachine(
            self.instance_id.to_string(),
        ));
    }

    /// Undo actions, newest first.
    pub fn rollback_plan(&self) -> impl Iterator<Item = &UndoAction> {
        self.undo.iter().rev()
    }
}
