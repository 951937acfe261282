//! Unit tests for the naming codec.

use rstest::{fixture, rstest};

use super::*;

#[fixture]
fn codec() -> NamingCodec {
    NamingCodec::new("defaultaccount")
}

#[rstest]
#[case(CachingMode::None, DiskTier::Standard)]
#[case(CachingMode::ReadOnly, DiskTier::Premium)]
#[case(CachingMode::ReadWrite, DiskTier::Standard)]
fn data_disk_names_round_trip(
    codec: NamingCodec,
    #[case] caching: CachingMode,
    #[case] tier: DiskTier,
) {
    let identity = DiskIdentity::data("mystorage", caching, tier);
    let name = codec.encode(&identity).expect("encode");
    assert_eq!(codec.decode(&name).expect("decode"), identity);
}

#[rstest]
#[case("standard")]
#[case("premiumstore")]
#[case("bosh")]
fn scopes_resembling_prefix_segments_round_trip(codec: NamingCodec, #[case] scope: &str) {
    let identity = DiskIdentity::data(scope, CachingMode::ReadOnly, DiskTier::Standard);
    let name = codec.encode(&identity).expect("encode");
    assert_eq!(codec.decode(&name).expect("decode"), identity);
}

#[rstest]
fn os_disk_names_round_trip(codec: NamingCodec) {
    let identity = DiskIdentity::os("mystorage");
    let name = codec.encode(&identity).expect("encode");
    assert!(name.starts_with("bosh-os-mystorage-"));
    assert_eq!(codec.decode(&name).expect("decode"), identity);
}

#[rstest]
fn current_scheme_layout_is_stable() {
    let identity = DiskIdentity::data("acct", CachingMode::ReadOnly, DiskTier::Premium);
    let name = NamingCodec::encode_with_suffix(&identity, "1234").expect("encode");
    assert_eq!(name.as_str(), "bosh-data-premium-acct-1234-ReadOnly");
}

#[rstest]
fn encoding_generates_distinct_names(codec: NamingCodec) {
    let identity = DiskIdentity::data("acct", CachingMode::None, DiskTier::Standard);
    let first = codec.encode(&identity).expect("encode");
    let second = codec.encode(&identity).expect("encode");
    assert_ne!(first, second);
}

#[rstest]
#[case(
    "bosh-disk-e55144a3-0c06-4240-8f15-9a7bc7b35d1f",
    CachingMode::None,
    DiskTier::Standard
)]
#[case(
    "bosh-disk-e55144a3-0c06-4240-8f15-9a7bc7b35d1f-ReadWrite",
    CachingMode::ReadWrite,
    DiskTier::Standard
)]
#[case(
    "bosh-disk-premium-e55144a3-0c06-4240-8f15-9a7bc7b35d1f-ReadOnly",
    CachingMode::ReadOnly,
    DiskTier::Premium
)]
fn legacy_names_fall_back_to_default_scope(
    codec: NamingCodec,
    #[case] name: &str,
    #[case] caching: CachingMode,
    #[case] tier: DiskTier,
) {
    let identity = codec.decode(name).expect("decode legacy");
    assert_eq!(identity, DiskIdentity::data("defaultaccount", caching, tier));
}

#[rstest]
fn premium_prefix_wins_over_standard_prefix(codec: NamingCodec) {
    let identity = codec
        .decode("bosh-data-premium-acct-abc-None")
        .expect("decode");
    assert_eq!(identity.tier, Some(DiskTier::Premium));
    assert_eq!(identity.scope, "acct");
}

#[rstest]
#[case("fake-disk-123")]
#[case("bosh-data-")]
#[case("bosh-data-acct")]
#[case("bosh-os-")]
fn unrecognised_names_are_rejected(codec: NamingCodec, #[case] name: &str) {
    let err = codec.decode(name).expect_err("should be invalid");
    assert_eq!(
        err,
        NamingError::InvalidName {
            name: name.to_owned()
        }
    );
}

#[rstest]
#[case("")]
#[case("has-dash")]
#[case("premium")]
fn unembeddable_scopes_are_rejected(#[case] scope: &str) {
    let identity = DiskIdentity::data(scope, CachingMode::None, DiskTier::Standard);
    let err = NamingCodec::encode_with_suffix(&identity, "x").expect_err("invalid scope");
    assert!(matches!(err, NamingError::InvalidScope { .. }));
}

#[rstest]
fn instance_ids_embed_and_expose_scope() {
    let id = generate_instance_id("acct", "e55144a3-0c06").expect("instance id");
    assert_eq!(id.as_str(), "acct-e55144a3-0c06");
    assert_eq!(id.scope(), "acct");
}

#[rstest]
fn os_disk_name_derives_from_instance_id(codec: NamingCodec) {
    let id = InstanceId::from("acct-1234");
    let name = NamingCodec::os_disk_name(&id);
    assert_eq!(name.as_str(), "bosh-os-acct-1234");
    assert_eq!(codec.decode(&name).expect("decode"), DiskIdentity::os("acct"));
}

#[rstest]
#[case("None", CachingMode::None)]
#[case("ReadOnly", CachingMode::ReadOnly)]
#[case("ReadWrite", CachingMode::ReadWrite)]
fn caching_modes_parse(#[case] raw: &str, #[case] expected: CachingMode) {
    assert_eq!(raw.parse::<CachingMode>().expect("parse"), expected);
}

#[rstest]
fn unknown_caching_and_tier_are_rejected() {
    assert!(matches!(
        "Sometimes".parse::<CachingMode>(),
        Err(NamingError::InvalidCaching { .. })
    ));
    assert!(matches!(
        "ultra".parse::<DiskTier>(),
        Err(NamingError::InvalidTier { .. })
    ));
}
