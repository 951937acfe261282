//! Unit tests for logical unit allocation.

use rstest::rstest;

use super::*;

fn disks_at(luns: &[u32]) -> Vec<DataDisk> {
    luns.iter()
        .map(|lun| DataDisk {
            name: format!("disk-{lun}"),
            lun: *lun,
            uri: format!("https://example.test/bosh/disk-{lun}.vhd"),
            caching: CachingMode::None,
        })
        .collect()
}

#[rstest]
#[case(&[], Some(0))]
#[case(&[0], Some(1))]
#[case(&[0, 1, 3], Some(2))]
#[case(&[1, 2], Some(0))]
fn lowest_unused_lun_is_chosen(#[case] used: &[u32], #[case] expected: Option<u32>) {
    assert_eq!(next_free_lun(&disks_at(used)), expected);
}

#[rstest]
fn full_machine_has_no_free_lun() {
    let used: Vec<u32> = (0..MAX_LUNS).collect();
    assert_eq!(next_free_lun(&disks_at(&used)), None);
}
