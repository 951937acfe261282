//! Unit tests for the disk lifecycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use rstest::{fixture, rstest};

use super::*;
use crate::naming::NamingError;
use crate::test_support::InMemoryObjectStore;

const DEFAULT_SCOPE: &str = "defaultaccount";

fn manager(
    store_double: InMemoryObjectStore,
) -> (DiskManager<InMemoryObjectStore>, Arc<InMemoryObjectStore>) {
    let store = Arc::new(store_double);
    let disks = DiskManager::new(Arc::clone(&store), NamingCodec::new(DEFAULT_SCOPE));
    (disks, store)
}

#[fixture]
fn empty() -> (DiskManager<InMemoryObjectStore>, Arc<InMemoryObjectStore>) {
    manager(InMemoryObjectStore::new())
}

#[rstest]
#[tokio::test]
async fn created_disk_exists_until_deleted(
    empty: (DiskManager<InMemoryObjectStore>, Arc<InMemoryObjectStore>),
) {
    let (disks, store) = empty;

    let name = disks
        .create_disk("mystorage", 10, CachingMode::ReadOnly, DiskTier::Standard)
        .await
        .expect("create disk");

    assert!(name.starts_with("bosh-data-mystorage-"));
    assert!(name.ends_with("-ReadOnly"));
    assert_eq!(
        store.size_of("mystorage", DISK_CONTAINER, &NamingCodec::blob_name(&name)),
        Some(10)
    );
    assert!(disks.has_disk(&name).await.expect("probe"));

    disks.delete_disk(&name).await.expect("delete disk");
    assert!(!disks.has_disk(&name).await.expect("probe"));
}

#[rstest]
#[tokio::test]
async fn premium_disks_use_the_premium_prefix(
    empty: (DiskManager<InMemoryObjectStore>, Arc<InMemoryObjectStore>),
) {
    let (disks, _) = empty;
    let name = disks
        .create_disk("mystorage", 1, CachingMode::None, DiskTier::Premium)
        .await
        .expect("create disk");
    assert!(name.starts_with("bosh-data-premium-mystorage-"), "{name}");
}

#[rstest]
#[tokio::test]
async fn zero_sized_disks_are_rejected(
    empty: (DiskManager<InMemoryObjectStore>, Arc<InMemoryObjectStore>),
) {
    let (disks, store) = empty;
    let err = disks
        .create_disk("mystorage", 0, CachingMode::None, DiskTier::Standard)
        .await
        .expect_err("size zero");
    assert_eq!(err, DiskError::InvalidSize { size_gib: 0 });
    assert!(store.blob_names().is_empty());
}

#[rstest]
#[tokio::test]
async fn deleting_an_absent_disk_succeeds(
    empty: (DiskManager<InMemoryObjectStore>, Arc<InMemoryObjectStore>),
) {
    let (disks, _) = empty;
    disks
        .delete_disk(&ResourceName::from("bosh-data-mystorage-missing-None"))
        .await
        .expect("absent disk is ignored");
}

#[rstest]
#[tokio::test]
async fn unknown_names_are_rejected(
    empty: (DiskManager<InMemoryObjectStore>, Arc<InMemoryObjectStore>),
) {
    let (disks, _) = empty;
    let err = disks
        .has_disk(&ResourceName::from("fake-disk-name"))
        .await
        .expect_err("invalid name");
    assert!(matches!(err, DiskError::Naming(NamingError::InvalidName { .. })));
}

#[rstest]
#[tokio::test]
async fn snapshot_creates_a_sibling_with_same_attributes() {
    let source = ResourceName::from("bosh-data-premium-mystorage-1234-ReadWrite");
    let (disks, store) = manager(InMemoryObjectStore::new().with_blob(
        "mystorage",
        DISK_CONTAINER,
        &NamingCodec::blob_name(&source),
        20,
    ));
    let metadata = BTreeMap::from([(String::from("director"), String::from("bosh"))]);

    let snapshot = disks
        .snapshot_disk(&source, &metadata)
        .await
        .expect("snapshot");

    assert_ne!(snapshot, source);
    let codec = disks.codec();
    assert_eq!(
        codec.decode(&snapshot).expect("decode"),
        codec.decode(&source).expect("decode")
    );
    assert!(disks.has_disk(&snapshot).await.expect("probe"));
    let records = store.snapshots();
    let [record] = records.as_slice() else {
        panic!("expected one snapshot copy");
    };
    assert_eq!(record.metadata, metadata);
    assert_eq!(record.destination, NamingCodec::blob_name(&snapshot));
}

#[rstest]
#[tokio::test]
async fn snapshot_of_missing_disk_reports_storage_failure(
    empty: (DiskManager<InMemoryObjectStore>, Arc<InMemoryObjectStore>),
) {
    let (disks, _) = empty;
    let err = disks
        .snapshot_disk(
            &ResourceName::from("bosh-data-mystorage-1234-None"),
            &BTreeMap::new(),
        )
        .await
        .expect_err("source is missing");
    let DiskError::Storage { operation, .. } = err else {
        panic!("expected a storage failure, got {err:?}");
    };
    assert_eq!(operation, "snapshot_disk");
}

#[rstest]
#[case("bosh-data-mystorage-1234-ReadOnly", "mystorage", CachingMode::ReadOnly)]
#[case("bosh-disk-1234", DEFAULT_SCOPE, CachingMode::None)]
#[case("bosh-disk-1234-ReadWrite", DEFAULT_SCOPE, CachingMode::ReadWrite)]
fn uri_and_caching_follow_the_name(
    empty: (DiskManager<InMemoryObjectStore>, Arc<InMemoryObjectStore>),
    #[case] raw: &str,
    #[case] scope: &str,
    #[case] caching: CachingMode,
) {
    let (disks, _) = empty;
    let disk = ResourceName::from(raw);
    assert_eq!(
        disks.disk_uri(&disk).expect("uri"),
        format!("https://{scope}.blob.example.test/bosh/{raw}.vhd")
    );
    assert_eq!(disks.caching(&disk).expect("caching"), caching);
}

#[rstest]
#[tokio::test]
async fn status_artifacts_are_removed() {
    let (disks, store) = manager(
        InMemoryObjectStore::new()
            .with_blob("mystorage", DISK_CONTAINER, "mystorage-vm1.1.status", 1)
            .with_blob("mystorage", DISK_CONTAINER, "mystorage-vm1.2.status", 1)
            .with_blob("mystorage", DISK_CONTAINER, "mystorage-vm1.vhd", 30)
            .with_blob("mystorage", DISK_CONTAINER, "mystorage-vm2.1.status", 1),
    );

    disks.delete_status_artifacts("mystorage", "mystorage-vm1").await;

    assert_eq!(
        store.blob_names(),
        vec![
            String::from("mystorage-vm1.vhd"),
            String::from("mystorage-vm2.1.status"),
        ]
    );
}

#[rstest]
#[case::listing(InMemoryObjectStore::new().failing_listing())]
#[case::deletes(InMemoryObjectStore::new().failing_deletes())]
#[tokio::test]
async fn status_artifact_failures_are_swallowed(#[case] seeded: InMemoryObjectStore) {
    let (disks, store) = manager(seeded.with_blob(
        "mystorage",
        DISK_CONTAINER,
        "mystorage-vm1.1.status",
        1,
    ));

    disks.delete_status_artifacts("mystorage", "mystorage-vm1").await;

    assert!(store.contains("mystorage", DISK_CONTAINER, "mystorage-vm1.1.status"));
}
