//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared constants under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

/// Default storage account, which doubles as the default disk scope.
pub const STORAGE_ACCOUNT: &str = "boshstorage";

/// Registry endpoint written into bootstrap metadata.
pub const REGISTRY_ENDPOINT: &str = "http://registry.example.test:25777";
