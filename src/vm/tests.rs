//! Unit tests for the provisioning orchestrator.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rstest::{fixture, rstest};
use serde_json::Value;

use super::*;
use crate::control_plane::ControlPlaneError;
use crate::naming::{CachingMode, NamingCodec, NamingError};
use crate::network::VipNetwork;
use crate::object_store::DISK_CONTAINER;
use crate::resource_client::{ClientError, Endpoint};
use crate::test_support::{ClientCall, InMemoryObjectStore, RecordingResourceClient};

const SCOPE: &str = "mystorage";
const SEED: &str = "e55144a3-0c06-4240-8f15-9a7bc7b35d1f";
const INSTANCE_ID: &str = "mystorage-e55144a3-0c06-4240-8f15-9a7bc7b35d1f";
const OS_DISK_BLOB: &str = "bosh-os-mystorage-e55144a3-0c06-4240-8f15-9a7bc7b35d1f.vhd";

struct Harness {
    manager: VmManager<RecordingResourceClient, InMemoryObjectStore>,
    client: Arc<RecordingResourceClient>,
    store: Arc<InMemoryObjectStore>,
}

fn harness_with(
    client_double: RecordingResourceClient,
    store_double: InMemoryObjectStore,
) -> Harness {
    let client = Arc::new(client_double);
    let store = Arc::new(store_double);
    let disks = DiskManager::new(Arc::clone(&store), NamingCodec::new(SCOPE));
    let settings = VmSettings {
        registry_endpoint: String::from("http://registry.example.test:25777"),
        ssh_user: String::from("vcap"),
        ssh_certificate: Some(String::from("ssh-rsa AAAA")),
    };
    Harness {
        manager: VmManager::new(Arc::clone(&client), disks, settings),
        client,
        store,
    }
}

fn harness(client: RecordingResourceClient) -> Harness {
    harness_with(client, InMemoryObjectStore::new())
}

#[fixture]
fn base_client() -> RecordingResourceClient {
    RecordingResourceClient::new()
        .with_subnet("vnet", "subnet")
        .with_storage_account(SCOPE, "westus")
}

#[fixture]
fn placement() -> NetworkPlacement {
    NetworkPlacement {
        virtual_network_name: String::from("vnet"),
        subnet_name: String::from("subnet"),
        private_ip: None,
        dns: None,
        vip: None,
    }
}

#[fixture]
fn pool() -> ResourcePoolSpec {
    ResourcePoolSpec::new("Standard_D1")
}

fn with_vip(mut placement: NetworkPlacement) -> NetworkPlacement {
    placement.vip = Some(VipNetwork {
        public_ip: String::from("1.2.3.4"),
        tcp_endpoints: vec![Endpoint {
            frontend_port: 22,
            backend_port: 22,
        }],
        udp_endpoints: Vec::new(),
    });
    placement
}

fn with_availability_set(mut pool: ResourcePoolSpec) -> ResourcePoolSpec {
    pool.availability_set = Some(String::from("fake-avset"));
    pool
}

fn call(operation: &str, name: &str) -> ClientCall {
    ClientCall {
        operation: operation.to_owned(),
        name: name.to_owned(),
    }
}

fn creates(client: &RecordingResourceClient) -> Vec<ClientCall> {
    client
        .calls()
        .into_iter()
        .filter(|call| call.operation.starts_with("create_"))
        .collect()
}

async fn create(
    harness: &Harness,
    pool: &ResourcePoolSpec,
    placement: &NetworkPlacement,
) -> Result<InstanceId, VmError> {
    harness
        .manager
        .create(SEED, SCOPE, "https://image.example.test/stemcell.vhd", pool, placement)
        .await
}

#[rstest]
#[tokio::test]
async fn happy_path_returns_instance_id_without_deletes(
    base_client: RecordingResourceClient,
    pool: ResourcePoolSpec,
    placement: NetworkPlacement,
) {
    let harness = harness(base_client);

    let instance_id = create(&harness, &pool, &placement)
        .await
        .expect("create should succeed");

    assert_eq!(instance_id.as_str(), INSTANCE_ID);
    assert!(harness.client.deletes().is_empty());
    assert_eq!(
        creates(&harness.client),
        vec![
            call("create_network_interface", INSTANCE_ID),
            call("create_virtual_machine", INSTANCE_ID),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn instance_parameters_carry_disk_and_bootstrap_metadata(
    base_client: RecordingResourceClient,
    pool: ResourcePoolSpec,
    mut placement: NetworkPlacement,
) {
    placement.dns = Some(vec![String::from("8.8.8.8")]);
    let harness = harness(base_client);
    create(&harness, &pool, &placement).await.expect("create");

    let params = harness.client.virtual_machine_params();
    let [vm] = params.as_slice() else {
        panic!("expected exactly one instance creation");
    };
    assert_eq!(vm.location, "westus");
    assert_eq!(vm.vm_size, "Standard_D1");
    assert_eq!(vm.username, "vcap");
    assert_eq!(vm.caching, CachingMode::ReadWrite);
    assert_eq!(vm.os_disk_name, format!("bosh-os-{INSTANCE_ID}"));
    assert!(vm.os_vhd_uri.ends_with(OS_DISK_BLOB), "{}", vm.os_vhd_uri);
    assert_eq!(vm.tags.get("user-agent").map(String::as_str), Some("bosh"));

    let decoded = STANDARD.decode(&vm.custom_data).expect("base64");
    let user_data: Value = serde_json::from_slice(&decoded).expect("json");
    assert_eq!(
        user_data,
        serde_json::json!({
            "registry": { "endpoint": "http://registry.example.test:25777" },
            "server": { "name": INSTANCE_ID },
            "dns": { "nameserver": ["8.8.8.8"] },
        })
    );
}

#[rstest]
#[tokio::test]
async fn missing_subnet_fails_before_anything_is_created(
    pool: ResourcePoolSpec,
    placement: NetworkPlacement,
) {
    let harness = harness(RecordingResourceClient::new().with_storage_account(SCOPE, "westus"));

    let err = create(&harness, &pool, &placement)
        .await
        .expect_err("subnet is missing");

    assert_eq!(
        err,
        VmError::NotFound {
            kind: ResourceKind::Subnet,
            name: String::from("vnet/subnet"),
        }
    );
    assert_eq!(harness.client.calls(), vec![call("get_subnet", "vnet/subnet")]);
}

#[rstest]
#[tokio::test]
async fn invalid_caching_is_rejected(
    base_client: RecordingResourceClient,
    mut pool: ResourcePoolSpec,
    placement: NetworkPlacement,
) {
    pool.caching = Some(String::from("InvalidCachingOption"));
    let harness = harness(base_client);

    let err = create(&harness, &pool, &placement)
        .await
        .expect_err("caching is invalid");

    assert_eq!(
        err,
        VmError::Naming(NamingError::InvalidCaching {
            value: String::from("InvalidCachingOption"),
        })
    );
    assert!(creates(&harness.client).is_empty());
}

#[rstest]
#[tokio::test]
async fn unknown_public_ip_fails_without_deletes(
    base_client: RecordingResourceClient,
    pool: ResourcePoolSpec,
    placement: NetworkPlacement,
) {
    let harness = harness(base_client.with_public_ip("other", "5.6.7.8"));

    let err = create(&harness, &pool, &with_vip(placement))
        .await
        .expect_err("public ip is missing");

    assert_eq!(
        err,
        VmError::NotFound {
            kind: ResourceKind::PublicIp,
            name: String::from("1.2.3.4"),
        }
    );
    assert!(harness.client.deletes().is_empty());
    assert!(creates(&harness.client).is_empty());
}

#[rstest]
#[tokio::test]
async fn vip_and_named_load_balancer_conflict(
    base_client: RecordingResourceClient,
    mut pool: ResourcePoolSpec,
    placement: NetworkPlacement,
) {
    pool.load_balancer = Some(String::from("fake-lb-name"));
    let harness = harness(
        base_client
            .with_public_ip("vip", "1.2.3.4")
            .with_load_balancer("fake-lb-name"),
    );

    let err = create(&harness, &pool, &with_vip(placement))
        .await
        .expect_err("two load balancers");

    assert!(matches!(err, VmError::Conflict { .. }), "{err:?}");
    assert!(creates(&harness.client).is_empty());
    assert!(harness.client.deletes().is_empty());
}

#[rstest]
#[tokio::test]
async fn missing_named_load_balancer_is_not_found(
    base_client: RecordingResourceClient,
    mut pool: ResourcePoolSpec,
    placement: NetworkPlacement,
) {
    pool.load_balancer = Some(String::from("fake-lb-name"));
    let harness = harness(base_client);

    let err = create(&harness, &pool, &placement)
        .await
        .expect_err("load balancer is missing");

    assert_eq!(
        err,
        VmError::NotFound {
            kind: ResourceKind::LoadBalancer,
            name: String::from("fake-lb-name"),
        }
    );
    assert!(creates(&harness.client).is_empty());
}

#[rstest]
#[tokio::test]
async fn network_interface_failure_rolls_back_owned_load_balancer(
    base_client: RecordingResourceClient,
    pool: ResourcePoolSpec,
    placement: NetworkPlacement,
) {
    let harness = harness(
        base_client
            .with_public_ip("vip", "1.2.3.4")
            .failing_on("create_network_interface"),
    );

    let err = create(&harness, &pool, &with_vip(placement))
        .await
        .expect_err("nic creation fails");

    let VmError::ProvisioningFailed {
        instance_id,
        source,
    } = err
    else {
        panic!("expected ProvisioningFailed");
    };
    assert_eq!(instance_id, INSTANCE_ID);
    assert!(matches!(
        *source,
        VmError::Client(ClientError::ControlPlane(
            ControlPlaneError::OperationFailed { .. }
        ))
    ));
    assert_eq!(
        harness.client.deletes(),
        vec![call("delete_load_balancer", INSTANCE_ID)]
    );
}

#[rstest]
#[tokio::test]
async fn instance_failure_unwinds_in_reverse_creation_order(
    base_client: RecordingResourceClient,
    pool: ResourcePoolSpec,
    placement: NetworkPlacement,
) {
    let harness = harness(
        base_client
            .with_public_ip("vip", "1.2.3.4")
            .failing_on("create_virtual_machine"),
    );

    let err = create(&harness, &with_availability_set(pool), &with_vip(placement))
        .await
        .expect_err("instance creation fails");

    assert!(matches!(err, VmError::ProvisioningFailed { .. }));
    assert_eq!(
        harness.client.deletes(),
        vec![
            call("delete_virtual_machine", INSTANCE_ID),
            call("delete_availability_set", "fake-avset"),
            call("delete_network_interface", INSTANCE_ID),
            call("delete_load_balancer", INSTANCE_ID),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn availability_set_failure_unwinds_network_interface_and_load_balancer(
    base_client: RecordingResourceClient,
    pool: ResourcePoolSpec,
    placement: NetworkPlacement,
) {
    let harness = harness(
        base_client
            .with_public_ip("vip", "1.2.3.4")
            .failing_on("create_availability_set"),
    );

    let err = create(&harness, &with_availability_set(pool), &with_vip(placement))
        .await
        .expect_err("availability set creation fails");

    let VmError::ProvisioningFailed { source, .. } = err else {
        panic!("expected ProvisioningFailed");
    };
    assert!(source.to_string().contains("create_availability_set"), "{source}");
    assert_eq!(
        harness.client.deletes(),
        vec![
            call("delete_network_interface", INSTANCE_ID),
            call("delete_load_balancer", INSTANCE_ID),
        ]
    );
    assert!(
        creates(&harness.client)
            .iter()
            .all(|recorded| recorded.operation != "create_virtual_machine")
    );
}

#[rstest]
#[tokio::test]
async fn rollback_never_touches_reused_resources(
    base_client: RecordingResourceClient,
    mut pool: ResourcePoolSpec,
    placement: NetworkPlacement,
) {
    pool.load_balancer = Some(String::from("shared-lb"));
    pool.availability_set = Some(String::from("shared-avset"));
    let harness = harness(
        base_client
            .with_load_balancer("shared-lb")
            .with_availability_set("shared-avset", &[])
            .failing_on("create_virtual_machine"),
    );

    create(&harness, &pool, &placement)
        .await
        .expect_err("instance creation fails");

    assert_eq!(
        harness.client.deletes(),
        vec![
            call("delete_virtual_machine", INSTANCE_ID),
            call("delete_network_interface", INSTANCE_ID),
        ]
    );
    let nic = harness.client.network_interface_params();
    assert_eq!(
        nic.first()
            .and_then(|params| params.load_balancer.as_ref())
            .map(|lb| lb.name.as_str()),
        Some("shared-lb")
    );
}

#[rstest]
#[tokio::test]
async fn failed_rollback_step_does_not_stop_the_others(
    base_client: RecordingResourceClient,
    pool: ResourcePoolSpec,
    placement: NetworkPlacement,
) {
    let harness = harness(
        base_client
            .with_public_ip("vip", "1.2.3.4")
            .failing_on("create_virtual_machine")
            .failing_on("delete_network_interface"),
    );

    let err = create(&harness, &pool, &with_vip(placement))
        .await
        .expect_err("instance creation fails");

    let VmError::ProvisioningFailed { source, .. } = err else {
        panic!("expected ProvisioningFailed");
    };
    assert!(source.to_string().contains("create_virtual_machine"), "{source}");
    assert_eq!(
        harness.client.deletes(),
        vec![
            call("delete_virtual_machine", INSTANCE_ID),
            call("delete_network_interface", INSTANCE_ID),
            call("delete_load_balancer", INSTANCE_ID),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn instance_failure_removes_os_disk_blob(
    base_client: RecordingResourceClient,
    pool: ResourcePoolSpec,
    placement: NetworkPlacement,
) {
    let harness = harness_with(
        base_client.failing_on("create_virtual_machine"),
        InMemoryObjectStore::new().with_blob(SCOPE, DISK_CONTAINER, OS_DISK_BLOB, 30),
    );

    create(&harness, &pool, &placement)
        .await
        .expect_err("instance creation fails");

    assert!(!harness.store.contains(SCOPE, DISK_CONTAINER, OS_DISK_BLOB));
}

#[rstest]
#[tokio::test]
async fn new_availability_set_uses_default_domain_counts(
    base_client: RecordingResourceClient,
    pool: ResourcePoolSpec,
    placement: NetworkPlacement,
) {
    let harness = harness(base_client);
    create(&harness, &with_availability_set(pool), &placement)
        .await
        .expect("create");

    let sets = harness.client.availability_set_params();
    let [set] = sets.as_slice() else {
        panic!("expected one availability set");
    };
    assert_eq!(set.platform_update_domain_count, 5);
    assert_eq!(set.platform_fault_domain_count, 3);
    let nic = harness.client.network_interface_params();
    assert_eq!(
        nic.first()
            .and_then(|params| params.tags.get("availability_set"))
            .map(String::as_str),
        Some("fake-avset")
    );
}

#[rstest]
#[tokio::test]
async fn delete_tears_down_every_present_resource() {
    let status_blob = format!("{INSTANCE_ID}.123.status");
    let harness = harness_with(
        RecordingResourceClient::new()
            .with_virtual_machine(INSTANCE_ID, &[])
            .with_load_balancer(INSTANCE_ID)
            .with_network_interface(INSTANCE_ID, &[("availability_set", "fake-avset")])
            .with_availability_set("fake-avset", &[]),
        InMemoryObjectStore::new()
            .with_blob(SCOPE, DISK_CONTAINER, OS_DISK_BLOB, 30)
            .with_blob(SCOPE, DISK_CONTAINER, &status_blob, 1),
    );

    harness
        .manager
        .delete(&InstanceId::from(INSTANCE_ID))
        .await
        .expect("delete");

    assert_eq!(
        harness.client.deletes(),
        vec![
            call("delete_virtual_machine", INSTANCE_ID),
            call("delete_load_balancer", INSTANCE_ID),
            call("delete_availability_set", "fake-avset"),
            call("delete_network_interface", INSTANCE_ID),
        ]
    );
    assert!(harness.store.blob_names().is_empty());
}

#[rstest]
#[tokio::test]
async fn delete_of_absent_instance_is_a_no_op() {
    let harness = harness(RecordingResourceClient::new());

    harness
        .manager
        .delete(&InstanceId::from(INSTANCE_ID))
        .await
        .expect("delete");

    assert!(harness.client.deletes().is_empty());
}

#[rstest]
#[tokio::test]
async fn delete_keeps_availability_set_with_members() {
    let harness = harness(
        RecordingResourceClient::new()
            .with_network_interface(INSTANCE_ID, &[("availability_set", "fake-avset")])
            .with_availability_set("fake-avset", &["/virtualMachines/other"]),
    );

    harness
        .manager
        .delete(&InstanceId::from(INSTANCE_ID))
        .await
        .expect("delete");

    assert_eq!(
        harness.client.deletes(),
        vec![call("delete_network_interface", INSTANCE_ID)]
    );
}

#[rstest]
#[case(&[], "/dev/sdc")]
#[case(&[("bosh-data-mystorage-other-None", 0)], "/dev/sdd")]
#[tokio::test]
async fn attach_disk_maps_lun_to_device(
    #[case] existing: &[(&str, u32)],
    #[case] expected: &str,
) {
    let harness =
        harness(RecordingResourceClient::new().with_virtual_machine(INSTANCE_ID, existing));

    let device = harness
        .manager
        .attach_disk(
            &InstanceId::from(INSTANCE_ID),
            &ResourceName::from("bosh-data-mystorage-1234-ReadOnly"),
        )
        .await
        .expect("attach");

    assert_eq!(device, expected);
    let vm = harness.client.virtual_machine(INSTANCE_ID).expect("vm");
    let attached = vm
        .data_disks
        .iter()
        .find(|disk| disk.name == "bosh-data-mystorage-1234-ReadOnly")
        .expect("disk attached");
    assert_eq!(attached.caching, CachingMode::ReadOnly);
    assert!(attached.uri.ends_with("/bosh/bosh-data-mystorage-1234-ReadOnly.vhd"));
}

#[rstest]
#[tokio::test]
async fn detach_of_unattached_disk_names_disk_and_instance() {
    let harness = harness(
        RecordingResourceClient::new().with_virtual_machine(INSTANCE_ID, &[("other-disk", 0)]),
    );

    let err = harness
        .manager
        .detach_disk(
            &InstanceId::from(INSTANCE_ID),
            &ResourceName::from("bosh-data-mystorage-1234-None"),
        )
        .await
        .expect_err("disk is not attached");

    assert_eq!(
        err,
        VmError::Client(ClientError::DiskNotAttached {
            disk_name: String::from("bosh-data-mystorage-1234-None"),
            instance_id: String::from(INSTANCE_ID),
        })
    );
}

#[rstest]
#[tokio::test]
async fn set_metadata_adds_default_tags() {
    let harness = harness(RecordingResourceClient::new().with_virtual_machine(INSTANCE_ID, &[]));
    let metadata = Tags::from([(String::from("job"), String::from("web"))]);

    harness
        .manager
        .set_metadata(&InstanceId::from(INSTANCE_ID), &metadata)
        .await
        .expect("set metadata");

    let vm = harness.client.virtual_machine(INSTANCE_ID).expect("vm");
    assert_eq!(vm.tags.get("job").map(String::as_str), Some("web"));
    assert_eq!(vm.tags.get("user-agent").map(String::as_str), Some("bosh"));
}

#[rstest]
#[tokio::test]
async fn reboot_restarts_the_instance() {
    let harness = harness(RecordingResourceClient::new().with_virtual_machine(INSTANCE_ID, &[]));

    harness
        .manager
        .reboot(&InstanceId::from(INSTANCE_ID))
        .await
        .expect("reboot");

    assert!(
        harness
            .client
            .calls()
            .contains(&call("restart_virtual_machine", INSTANCE_ID))
    );
}

#[rstest]
#[tokio::test]
async fn data_disks_of_missing_instance_is_not_found() {
    let harness = harness(RecordingResourceClient::new());

    let err = harness
        .manager
        .data_disks(&InstanceId::from(INSTANCE_ID))
        .await
        .expect_err("instance is missing");

    assert!(matches!(
        err,
        VmError::NotFound {
            kind: ResourceKind::VirtualMachine,
            ..
        }
    ));
}

#[rstest]
#[case(0, "/dev/sdc")]
#[case(1, "/dev/sdd")]
#[case(15, "/dev/sdr")]
fn device_labels_start_at_c(#[case] lun: u32, #[case] expected: &str) {
    assert_eq!(device_label(lun).as_deref(), Some(expected));
}

#[rstest]
#[case(23, Some("/dev/sdz"))]
#[case(24, None)]
#[case(u32::MAX, None)]
fn device_labels_stop_at_z(#[case] lun: u32, #[case] expected: Option<&str>) {
    assert_eq!(device_label(lun).as_deref(), expected);
}

#[rstest]
fn user_data_omits_dns_when_absent() {
    let encoded = encode_user_data("http://registry", "vm-1", None);
    let decoded = STANDARD.decode(encoded).expect("base64");
    let user_data: Value = serde_json::from_slice(&decoded).expect("json");
    assert!(user_data.get("dns").is_none());
    assert_eq!(user_data["server"]["name"], "vm-1");
}
