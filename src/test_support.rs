//! Test support utilities shared across unit and integration tests.
//!
//! Every double keeps its state behind a `std::sync::Mutex` so it can be
//! shared through an `Arc` and still be inspected after the code under test
//! has run.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::CloudFuture;
use crate::control_plane::{
    ASYNC_OPERATION_HEADER, AuthToken, ControlPlaneError, HttpRequest, HttpResponse,
    HttpTransport, ServicePrincipal,
};
use crate::naming::CachingMode;
use crate::object_store::{BlobRef, ObjectStore, ObjectStoreError};
use crate::registry::{RegistryError, SettingsRegistry};
use crate::resource_client::{
    AvailabilitySet, AvailabilitySetParams, ClientError, DataDisk, LoadBalancer,
    LoadBalancerParams, NetworkInterface, NetworkInterfaceParams, PublicIp, ResourceClient,
    StorageAccount, Subnet, Tags, VirtualMachine, VirtualMachineParams, next_free_lun,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn state_mut<T>(mutex: &mut Mutex<T>) -> &mut T {
    mutex.get_mut().unwrap_or_else(PoisonError::into_inner)
}

/// Service principal pointing at a fake authority.
#[must_use]
pub fn service_principal() -> ServicePrincipal {
    ServicePrincipal {
        authority: String::from("https://login.example.test"),
        tenant_id: String::from("fake-tenant-id"),
        client_id: String::from("fake-client-id"),
        client_secret: String::from("fake-client-secret"),
        resource: String::from("https://management.example.test/"),
        api_version: String::from("2015-05-01-preview"),
    }
}

/// Token valid for the next hour.
#[must_use]
pub fn valid_token(access_token: &str) -> AuthToken {
    AuthToken {
        access_token: access_token.to_owned(),
        expires_at: SystemTime::now() + Duration::from_secs(3600),
    }
}

/// HTTP transport replaying pre-seeded responses in FIFO order.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    /// Creates a transport with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a raw response.
    pub fn push(&self, response: HttpResponse) {
        lock(&self.responses).push_back(response);
    }

    /// Queues a response with the given status and body.
    pub fn push_response(&self, status: u16, body: impl Into<String>) {
        self.push(HttpResponse {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        });
    }

    /// Queues a successful token response expiring in an hour.
    pub fn push_token(&self, access_token: &str) {
        let expires_on = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            + 3600;
        self.push_response(
            200,
            format!(r#"{{"access_token":"{access_token}","expires_on":"{expires_on}"}}"#),
        );
    }

    /// Queues an accepted submit response carrying a completion link.
    pub fn push_accepted(&self, status: u16, status_link: &str) {
        self.push(HttpResponse {
            status,
            headers: BTreeMap::from([(
                ASYNC_OPERATION_HEADER.to_owned(),
                status_link.to_owned(),
            )]),
            body: String::new(),
        });
    }

    /// Queues a completion-status document.
    pub fn push_operation_status(&self, status: &str) {
        self.push_response(200, format!(r#"{{"status":"{status}"}}"#));
    }

    /// Returns a snapshot of every request sent so far.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    /// Number of responses still queued.
    #[must_use]
    pub fn remaining(&self) -> usize {
        lock(&self.responses).len()
    }
}

impl HttpTransport for ScriptedTransport {
    fn send(&self, request: HttpRequest) -> CloudFuture<'_, HttpResponse, ControlPlaneError> {
        let url = request.url.clone();
        lock(&self.requests).push(request);
        let next = lock(&self.responses).pop_front();
        Box::pin(async move {
            next.ok_or_else(|| ControlPlaneError::Http {
                message: format!("no scripted response available for {url}"),
            })
        })
    }
}

/// Snapshot copy recorded by [`InMemoryObjectStore`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotRecord {
    /// Source blob.
    pub source: String,
    /// Destination blob.
    pub destination: String,
    /// Metadata the snapshot was tagged with.
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct StoreState {
    blobs: BTreeMap<(String, String, String), u32>,
    snapshots: Vec<SnapshotRecord>,
    fail_listing: bool,
    fail_deletes: bool,
}

/// Object store keeping blobs in memory.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    state: Mutex<StoreState>,
}

impl InMemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a blob of `size_gib` gibibytes.
    #[must_use]
    pub fn with_blob(mut self, scope: &str, container: &str, name: &str, size_gib: u32) -> Self {
        state_mut(&mut self.state).blobs.insert(
            (scope.to_owned(), container.to_owned(), name.to_owned()),
            size_gib,
        );
        self
    }

    /// Makes every listing fail.
    #[must_use]
    pub fn failing_listing(mut self) -> Self {
        state_mut(&mut self.state).fail_listing = true;
        self
    }

    /// Makes every deletion fail.
    #[must_use]
    pub fn failing_deletes(mut self) -> Self {
        state_mut(&mut self.state).fail_deletes = true;
        self
    }

    /// Whether the blob exists.
    #[must_use]
    pub fn contains(&self, scope: &str, container: &str, name: &str) -> bool {
        lock(&self.state).blobs.contains_key(&(
            scope.to_owned(),
            container.to_owned(),
            name.to_owned(),
        ))
    }

    /// Size of the blob in GiB, if present.
    #[must_use]
    pub fn size_of(&self, scope: &str, container: &str, name: &str) -> Option<u32> {
        lock(&self.state)
            .blobs
            .get(&(scope.to_owned(), container.to_owned(), name.to_owned()))
            .copied()
    }

    /// Names of every stored blob.
    #[must_use]
    pub fn blob_names(&self) -> Vec<String> {
        lock(&self.state)
            .blobs
            .keys()
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    /// Snapshot copies performed so far.
    #[must_use]
    pub fn snapshots(&self) -> Vec<SnapshotRecord> {
        lock(&self.state).snapshots.clone()
    }

    fn request_error(container: &str, name: &str, message: &str) -> ObjectStoreError {
        ObjectStoreError::Request {
            container: container.to_owned(),
            name: name.to_owned(),
            message: message.to_owned(),
        }
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn create_empty_blob<'a>(
        &'a self,
        scope: &'a str,
        container: &'a str,
        name: &'a str,
        size_gib: u32,
    ) -> CloudFuture<'a, (), ObjectStoreError> {
        Box::pin(async move {
            lock(&self.state).blobs.insert(
                (scope.to_owned(), container.to_owned(), name.to_owned()),
                size_gib,
            );
            Ok(())
        })
    }

    fn blob_exists<'a>(
        &'a self,
        scope: &'a str,
        container: &'a str,
        name: &'a str,
    ) -> CloudFuture<'a, bool, ObjectStoreError> {
        Box::pin(async move { Ok(self.contains(scope, container, name)) })
    }

    fn delete_blob<'a>(
        &'a self,
        scope: &'a str,
        container: &'a str,
        name: &'a str,
    ) -> CloudFuture<'a, (), ObjectStoreError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            if state.fail_deletes {
                return Err(Self::request_error(container, name, "simulated failure"));
            }
            state
                .blobs
                .remove(&(scope.to_owned(), container.to_owned(), name.to_owned()));
            Ok(())
        })
    }

    fn snapshot_blob<'a>(
        &'a self,
        scope: &'a str,
        container: &'a str,
        name: &'a str,
        metadata: &'a BTreeMap<String, String>,
        destination: &'a str,
    ) -> CloudFuture<'a, String, ObjectStoreError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let key = (scope.to_owned(), container.to_owned(), name.to_owned());
            let size = state
                .blobs
                .get(&key)
                .copied()
                .ok_or_else(|| ObjectStoreError::NotFound {
                    scope: scope.to_owned(),
                    container: container.to_owned(),
                    name: name.to_owned(),
                })?;
            state.blobs.insert(
                (scope.to_owned(), container.to_owned(), destination.to_owned()),
                size,
            );
            state.snapshots.push(SnapshotRecord {
                source: name.to_owned(),
                destination: destination.to_owned(),
                metadata: metadata.clone(),
            });
            Ok(format!("snapshot-{}", state.snapshots.len()))
        })
    }

    fn list_blobs<'a>(
        &'a self,
        scope: &'a str,
        container: &'a str,
        prefix: &'a str,
    ) -> CloudFuture<'a, Vec<BlobRef>, ObjectStoreError> {
        Box::pin(async move {
            let state = lock(&self.state);
            if state.fail_listing {
                return Err(Self::request_error(container, prefix, "simulated failure"));
            }
            Ok(state
                .blobs
                .keys()
                .filter(|(blob_scope, blob_container, name)| {
                    blob_scope == scope && blob_container == container && name.starts_with(prefix)
                })
                .map(|(_, _, name)| BlobRef {
                    name: name.clone(),
                    uri: self.blob_uri(scope, container, name),
                })
                .collect())
        })
    }

    fn blob_uri(&self, scope: &str, container: &str, name: &str) -> String {
        format!("https://{scope}.blob.example.test/{container}/{name}")
    }
}

/// Call recorded by [`RecordingResourceClient`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientCall {
    /// Trait method name, e.g. `delete_load_balancer`.
    pub operation: String,
    /// Primary resource name the call targeted.
    pub name: String,
}

impl ClientCall {
    fn new(operation: &str, name: &str) -> Self {
        Self {
            operation: operation.to_owned(),
            name: name.to_owned(),
        }
    }
}

#[derive(Debug, Default)]
struct ClientState {
    subnets: BTreeMap<(String, String), Subnet>,
    storage_accounts: BTreeMap<String, StorageAccount>,
    public_ips: Vec<PublicIp>,
    load_balancers: BTreeMap<String, LoadBalancer>,
    network_interfaces: BTreeMap<String, NetworkInterface>,
    availability_sets: BTreeMap<String, AvailabilitySet>,
    virtual_machines: BTreeMap<String, VirtualMachine>,
    failures: BTreeSet<String>,
    calls: Vec<ClientCall>,
    load_balancer_params: Vec<LoadBalancerParams>,
    network_interface_params: Vec<NetworkInterfaceParams>,
    availability_set_params: Vec<AvailabilitySetParams>,
    virtual_machine_params: Vec<VirtualMachineParams>,
}

impl ClientState {
    fn record(&mut self, operation: &str, name: &str) -> Result<(), ClientError> {
        self.calls.push(ClientCall::new(operation, name));
        if self.failures.contains(operation) {
            return Err(ClientError::ControlPlane(
                ControlPlaneError::OperationFailed {
                    payload: format!(r#"{{"status":"Failed","operation":"{operation}"}}"#),
                },
            ));
        }
        Ok(())
    }
}

/// In-memory resource client recording every call it receives.
///
/// Created resources become visible to later lookups, so full provisioning
/// flows can run against it. Operations named through
/// [`RecordingResourceClient::failing_on`] fail with an
/// `OperationFailed` control-plane error.
#[derive(Debug, Default)]
pub struct RecordingResourceClient {
    state: Mutex<ClientState>,
}

impl RecordingResourceClient {
    /// Creates an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subnet.
    #[must_use]
    pub fn with_subnet(mut self, virtual_network: &str, subnet: &str) -> Self {
        state_mut(&mut self.state).subnets.insert(
            (virtual_network.to_owned(), subnet.to_owned()),
            Subnet {
                id: format!("/virtualNetworks/{virtual_network}/subnets/{subnet}"),
                name: subnet.to_owned(),
            },
        );
        self
    }

    /// Adds a storage account.
    #[must_use]
    pub fn with_storage_account(mut self, name: &str, location: &str) -> Self {
        state_mut(&mut self.state).storage_accounts.insert(
            name.to_owned(),
            StorageAccount {
                name: name.to_owned(),
                location: location.to_owned(),
            },
        );
        self
    }

    /// Adds a public IP with the given address.
    #[must_use]
    pub fn with_public_ip(mut self, name: &str, address: &str) -> Self {
        state_mut(&mut self.state).public_ips.push(PublicIp {
            id: format!("/publicIPAddresses/{name}"),
            name: name.to_owned(),
            location: String::from("westus"),
            ip_address: Some(address.to_owned()),
        });
        self
    }

    /// Adds an existing load balancer.
    #[must_use]
    pub fn with_load_balancer(mut self, name: &str) -> Self {
        state_mut(&mut self.state)
            .load_balancers
            .insert(name.to_owned(), load_balancer(name));
        self
    }

    /// Adds an existing availability set with the given member ids.
    #[must_use]
    pub fn with_availability_set(mut self, name: &str, members: &[&str]) -> Self {
        state_mut(&mut self.state).availability_sets.insert(
            name.to_owned(),
            AvailabilitySet {
                id: format!("/availabilitySets/{name}"),
                name: name.to_owned(),
                location: String::from("westus"),
                platform_update_domain_count: 5,
                platform_fault_domain_count: 3,
                virtual_machines: members.iter().map(|member| (*member).to_owned()).collect(),
            },
        );
        self
    }

    /// Adds an existing network interface with the given tags.
    #[must_use]
    pub fn with_network_interface(mut self, name: &str, tags: &[(&str, &str)]) -> Self {
        state_mut(&mut self.state).network_interfaces.insert(
            name.to_owned(),
            NetworkInterface {
                id: format!("/networkInterfaces/{name}"),
                name: name.to_owned(),
                location: String::from("westus"),
                tags: tags
                    .iter()
                    .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
                    .collect(),
                private_ip: None,
            },
        );
        self
    }

    /// Adds an existing virtual machine with data disks at the given luns.
    #[must_use]
    pub fn with_virtual_machine(mut self, name: &str, disks: &[(&str, u32)]) -> Self {
        state_mut(&mut self.state).virtual_machines.insert(
            name.to_owned(),
            VirtualMachine {
                id: format!("/virtualMachines/{name}"),
                name: name.to_owned(),
                location: String::from("westus"),
                vm_size: String::from("Standard_D1"),
                tags: Tags::new(),
                provisioning_state: String::from("Succeeded"),
                data_disks: disks
                    .iter()
                    .map(|(disk, lun)| DataDisk {
                        name: (*disk).to_owned(),
                        lun: *lun,
                        uri: format!("https://example.test/bosh/{disk}.vhd"),
                        caching: CachingMode::None,
                    })
                    .collect(),
            },
        );
        self
    }

    /// Overrides the provisioning state of a previously added virtual machine.
    #[must_use]
    pub fn with_provisioning_state(mut self, name: &str, provisioning_state: &str) -> Self {
        if let Some(vm) = state_mut(&mut self.state).virtual_machines.get_mut(name) {
            provisioning_state.clone_into(&mut vm.provisioning_state);
        }
        self
    }

    /// Makes the named trait operation fail.
    #[must_use]
    pub fn failing_on(mut self, operation: &str) -> Self {
        state_mut(&mut self.state)
            .failures
            .insert(operation.to_owned());
        self
    }

    /// Every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ClientCall> {
        lock(&self.state).calls.clone()
    }

    /// Delete calls received so far, in order.
    #[must_use]
    pub fn deletes(&self) -> Vec<ClientCall> {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| call.operation.starts_with("delete_"))
            .cloned()
            .collect()
    }

    /// Parameters of every load balancer creation.
    #[must_use]
    pub fn load_balancer_params(&self) -> Vec<LoadBalancerParams> {
        lock(&self.state).load_balancer_params.clone()
    }

    /// Parameters of every network interface creation.
    #[must_use]
    pub fn network_interface_params(&self) -> Vec<NetworkInterfaceParams> {
        lock(&self.state).network_interface_params.clone()
    }

    /// Parameters of every availability set creation.
    #[must_use]
    pub fn availability_set_params(&self) -> Vec<AvailabilitySetParams> {
        lock(&self.state).availability_set_params.clone()
    }

    /// Parameters of every virtual machine creation.
    #[must_use]
    pub fn virtual_machine_params(&self) -> Vec<VirtualMachineParams> {
        lock(&self.state).virtual_machine_params.clone()
    }

    /// Current state of a virtual machine.
    #[must_use]
    pub fn virtual_machine(&self, name: &str) -> Option<VirtualMachine> {
        lock(&self.state).virtual_machines.get(name).cloned()
    }
}

fn load_balancer(name: &str) -> LoadBalancer {
    LoadBalancer {
        id: format!("/loadBalancers/{name}"),
        name: name.to_owned(),
        backend_address_pools: vec![format!("/loadBalancers/{name}/backendAddressPools/LBBE")],
        inbound_nat_rules: Vec::new(),
    }
}

impl ResourceClient for RecordingResourceClient {
    fn get_subnet<'a>(
        &'a self,
        virtual_network: &'a str,
        subnet: &'a str,
    ) -> CloudFuture<'a, Option<Subnet>, ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("get_subnet", &format!("{virtual_network}/{subnet}"))?;
            Ok(state
                .subnets
                .get(&(virtual_network.to_owned(), subnet.to_owned()))
                .cloned())
        })
    }

    fn get_storage_account<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, Option<StorageAccount>, ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("get_storage_account", name)?;
            Ok(state.storage_accounts.get(name).cloned())
        })
    }

    fn list_public_ips(&self) -> CloudFuture<'_, Vec<PublicIp>, ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("list_public_ips", "")?;
            Ok(state.public_ips.clone())
        })
    }

    fn create_load_balancer<'a>(
        &'a self,
        params: &'a LoadBalancerParams,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("create_load_balancer", &params.name)?;
            state.load_balancer_params.push(params.clone());
            state
                .load_balancers
                .insert(params.name.clone(), load_balancer(&params.name));
            Ok(())
        })
    }

    fn get_load_balancer<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, Option<LoadBalancer>, ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("get_load_balancer", name)?;
            Ok(state.load_balancers.get(name).cloned())
        })
    }

    fn delete_load_balancer<'a>(&'a self, name: &'a str) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("delete_load_balancer", name)?;
            state.load_balancers.remove(name);
            Ok(())
        })
    }

    fn create_network_interface<'a>(
        &'a self,
        params: &'a NetworkInterfaceParams,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("create_network_interface", &params.name)?;
            state.network_interface_params.push(params.clone());
            state.network_interfaces.insert(
                params.name.clone(),
                NetworkInterface {
                    id: format!("/networkInterfaces/{}", params.name),
                    name: params.name.clone(),
                    location: params.location.clone(),
                    tags: params.tags.clone(),
                    private_ip: params.private_ip.clone(),
                },
            );
            Ok(())
        })
    }

    fn get_network_interface<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, Option<NetworkInterface>, ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("get_network_interface", name)?;
            Ok(state.network_interfaces.get(name).cloned())
        })
    }

    fn delete_network_interface<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("delete_network_interface", name)?;
            state.network_interfaces.remove(name);
            Ok(())
        })
    }

    fn create_availability_set<'a>(
        &'a self,
        params: &'a AvailabilitySetParams,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("create_availability_set", &params.name)?;
            state.availability_set_params.push(params.clone());
            state.availability_sets.insert(
                params.name.clone(),
                AvailabilitySet {
                    id: format!("/availabilitySets/{}", params.name),
                    name: params.name.clone(),
                    location: params.location.clone(),
                    platform_update_domain_count: params.platform_update_domain_count,
                    platform_fault_domain_count: params.platform_fault_domain_count,
                    virtual_machines: Vec::new(),
                },
            );
            Ok(())
        })
    }

    fn get_availability_set<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, Option<AvailabilitySet>, ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("get_availability_set", name)?;
            Ok(state.availability_sets.get(name).cloned())
        })
    }

    fn delete_availability_set<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("delete_availability_set", name)?;
            state.availability_sets.remove(name);
            Ok(())
        })
    }

    fn create_virtual_machine<'a>(
        &'a self,
        params: &'a VirtualMachineParams,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("create_virtual_machine", &params.name)?;
            state.virtual_machine_params.push(params.clone());
            let id = format!("/virtualMachines/{}", params.name);
            if let Some(set) = &params.availability_set
                && let Some(existing) = state.availability_sets.get_mut(&set.name)
            {
                existing.virtual_machines.push(id.clone());
            }
            state.virtual_machines.insert(
                params.name.clone(),
                VirtualMachine {
                    id,
                    name: params.name.clone(),
                    location: params.location.clone(),
                    vm_size: params.vm_size.clone(),
                    tags: params.tags.clone(),
                    provisioning_state: String::from("Succeeded"),
                    data_disks: Vec::new(),
                },
            );
            Ok(())
        })
    }

    fn get_virtual_machine<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, Option<VirtualMachine>, ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("get_virtual_machine", name)?;
            Ok(state.virtual_machines.get(name).cloned())
        })
    }

    fn delete_virtual_machine<'a>(&'a self, name: &'a str) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("delete_virtual_machine", name)?;
            if let Some(vm) = state.virtual_machines.remove(name) {
                for set in state.availability_sets.values_mut() {
                    set.virtual_machines.retain(|member| *member != vm.id);
                }
            }
            Ok(())
        })
    }

    fn restart_virtual_machine<'a>(
        &'a self,
        name: &'a str,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("restart_virtual_machine", name)?;
            if state.virtual_machines.contains_key(name) {
                Ok(())
            } else {
                Err(ClientError::VirtualMachineNotFound {
                    name: name.to_owned(),
                })
            }
        })
    }

    fn update_virtual_machine_tags<'a>(
        &'a self,
        name: &'a str,
        tags: &'a Tags,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("update_virtual_machine_tags", name)?;
            let vm = state.virtual_machines.get_mut(name).ok_or_else(|| {
                ClientError::VirtualMachineNotFound {
                    name: name.to_owned(),
                }
            })?;
            vm.tags = tags.clone();
            Ok(())
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
            let mut state = lock(&self.state);
            state.record("attach_disk_to_virtual_machine", vm_name)?;
            let vm = state.virtual_machines.get_mut(vm_name).ok_or_else(|| {
                ClientError::VirtualMachineNotFound {
                    name: vm_name.to_owned(),
                }
            })?;
            let lun = next_free_lun(&vm.data_disks).ok_or_else(|| ClientError::NoFreeLun {
                name: vm_name.to_owned(),
            })?;
            let disk = DataDisk {
                name: disk_name.to_owned(),
                lun,
                uri: disk_uri.to_owned(),
                caching,
            };
            vm.data_disks.push(disk.clone());
            Ok(disk)
        })
    }

    fn detach_disk_from_virtual_machine<'a>(
        &'a self,
        vm_name: &'a str,
        disk_name: &'a str,
    ) -> CloudFuture<'a, (), ClientError> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record("detach_disk_from_virtual_machine", vm_name)?;
            let vm = state.virtual_machines.get_mut(vm_name).ok_or_else(|| {
                ClientError::VirtualMachineNotFound {
                    name: vm_name.to_owned(),
                }
            })?;
            let before = vm.data_disks.len();
            vm.data_disks.retain(|disk| disk.name != disk_name);
            if vm.data_disks.len() == before {
                return Err(ClientError::DiskNotAttached {
                    disk_name: disk_name.to_owned(),
                    instance_id: vm_name.to_owned(),
                });
            }
            Ok(())
        })
    }
}

/// Settings registry keeping documents in memory.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    entries: Mutex<BTreeMap<String, Value>>,
    reject_updates: bool,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the settings of `instance_id`.
    #[must_use]
    pub fn with_settings(mut self, instance_id: &str, settings: Value) -> Self {
        state_mut(&mut self.entries).insert(instance_id.to_owned(), settings);
        self
    }

    /// Makes every update fail with [`RegistryError::Request`].
    #[must_use]
    pub const fn rejecting_updates(mut self) -> Self {
        self.reject_updates = true;
        self
    }

    /// Stored settings of `instance_id`.
    #[must_use]
    pub fn settings(&self, instance_id: &str) -> Option<Value> {
        lock(&self.entries).get(instance_id).cloned()
    }
}

impl SettingsRegistry for InMemoryRegistry {
    fn read_settings<'a>(&'a self, instance_id: &'a str) -> CloudFuture<'a, Value, RegistryError> {
        Box::pin(async move {
            self.settings(instance_id)
                .ok_or_else(|| RegistryError::NotFound {
                    instance_id: instance_id.to_owned(),
                })
        })
    }

    fn update_settings<'a>(
        &'a self,
        instance_id: &'a str,
        settings: &'a Value,
    ) -> CloudFuture<'a, (), RegistryError> {
        Box::pin(async move {
            if self.reject_updates {
                return Err(RegistryError::Request {
                    instance_id: instance_id.to_owned(),
                    message: String::from("registry unavailable"),
                });
            }
            lock(&self.entries).insert(instance_id.to_owned(), settings.clone());
            Ok(())
        })
    }

    fn delete_settings<'a>(&'a self, instance_id: &'a str) -> CloudFuture<'a, (), RegistryError> {
        Box::pin(async move {
            lock(&self.entries).remove(instance_id);
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets `set` and removes `unset` while holding the global env mutex.
    pub async fn apply(set: &[(&str, &str)], unset: &[&str]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(set.len() + unset.len());
        for (key, value) in set {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::set_var(key, value) };
        }
        for key in unset {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::remove_var(key) };
        }
        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
