//! Unit tests for configuration loading and validation.

#[path = "common/test_constants.rs"]
mod test_constants;

use std::time::Duration;

use azure_cpi::{AzureConfig, ConfigError, Endpoints};
use rstest::*;

use test_constants::{REGISTRY_ENDPOINT, STORAGE_ACCOUNT};

const DEFAULT_API_VERSION: &str = "2015-05-01-preview";

#[fixture]
fn valid_config() -> AzureConfig {
    AzureConfig {
        environment: String::from("AzureCloud"),
        api_version: String::from(DEFAULT_API_VERSION),
        subscription_id: String::from("11111111-2222-3333-4444-555555555555"),
        tenant_id: String::from("66666666-7777-8888-9999-000000000000"),
        client_id: String::from("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee"),
        client_secret: String::from("AZURESECRETEXAMPLE"),
        resource_group_name: String::from("bosh-rg"),
        storage_account_name: String::from(STORAGE_ACCOUNT),
        ssh_user: String::from("vcap"),
        ssh_certificate: Some(String::from("ssh-rsa AAAAB3Nza")),
        registry_endpoint: String::from(REGISTRY_ENDPOINT),
        poll_interval_secs: 5,
        max_poll_interval_secs: 30,
        operation_timeout_secs: 1800,
    }
}

#[rstest]
fn valid_config_passes_validation(valid_config: AzureConfig) {
    valid_config
        .validate()
        .unwrap_or_else(|err| panic!("valid config should validate: {err}"));
}

#[rstest]
fn config_validation_rejects_missing_secret_with_actionable_error(valid_config: AzureConfig) {
    let cfg = AzureConfig {
        client_secret: String::new(),
        ..valid_config
    };

    let error = cfg.validate().expect_err("secret is required");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error");
    };
    assert!(
        message.contains("AZURE_CLIENT_SECRET"),
        "error should mention env var: {message}"
    );
    assert!(
        message.contains("azure-cpi.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains("client_secret"),
        "error should mention TOML key: {message}"
    );
}

/// Verifies that validation produces actionable errors mentioning both the
/// environment variable and configuration file for each required field.
#[rstest]
#[case::subscription(
    |cfg: &mut AzureConfig| cfg.subscription_id.clear(),
    "AZURE_SUBSCRIPTION_ID",
    "subscription_id"
)]
#[case::tenant(|cfg: &mut AzureConfig| cfg.tenant_id.clear(), "AZURE_TENANT_ID", "tenant_id")]
#[case::client(|cfg: &mut AzureConfig| cfg.client_id.clear(), "AZURE_CLIENT_ID", "client_id")]
#[case::resource_group(
    |cfg: &mut AzureConfig| cfg.resource_group_name = String::from("   "),
    "AZURE_RESOURCE_GROUP_NAME",
    "resource_group_name"
)]
#[case::storage_account(
    |cfg: &mut AzureConfig| cfg.storage_account_name.clear(),
    "AZURE_STORAGE_ACCOUNT_NAME",
    "storage_account_name"
)]
#[case::registry(
    |cfg: &mut AzureConfig| cfg.registry_endpoint.clear(),
    "AZURE_REGISTRY_ENDPOINT",
    "registry_endpoint"
)]
fn config_validation_produces_actionable_errors_for_all_fields(
    valid_config: AzureConfig,
    #[case] mutate: fn(&mut AzureConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let message = cfg.validate().expect_err("validation should fail").to_string();

    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("azure-cpi.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn unknown_environment_is_rejected(valid_config: AzureConfig) {
    let cfg = AzureConfig {
        environment: String::from("AzureMoonCloud"),
        ..valid_config
    };

    assert_eq!(
        cfg.validate(),
        Err(ConfigError::UnknownEnvironment(String::from("AzureMoonCloud")))
    );
}

#[rstest]
#[case::zero_interval(0, 30, 1800, "poll_interval_secs")]
#[case::cap_below_interval(10, 5, 1800, "max_poll_interval_secs")]
#[case::timeout_below_interval(10, 30, 5, "operation_timeout_secs")]
fn unusable_poll_settings_are_rejected(
    valid_config: AzureConfig,
    #[case] interval: u64,
    #[case] max_interval: u64,
    #[case] timeout: u64,
    #[case] field: &str,
) {
    let cfg = AzureConfig {
        poll_interval_secs: interval,
        max_poll_interval_secs: max_interval,
        operation_timeout_secs: timeout,
        ..valid_config
    };

    let err = cfg.validate().expect_err("poll settings rejected");
    let ConfigError::InvalidPolling(ref message) = err else {
        panic!("expected InvalidPolling error, got {err:?}");
    };
    assert!(message.contains(field), "unexpected error: {message}");
}

#[rstest]
#[case("AzureCloud", "https://login.windows.net", "https://management.azure.com")]
#[case(
    "AzureChinaCloud",
    "https://login.chinacloudapi.cn",
    "https://management.chinacloudapi.cn"
)]
fn environments_select_their_endpoints(
    #[case] environment: &str,
    #[case] authority: &str,
    #[case] management: &str,
) {
    let endpoints = Endpoints::for_environment(environment)
        .unwrap_or_else(|| panic!("{environment} should be known"));
    assert_eq!(endpoints.authority, authority);
    assert_eq!(endpoints.management, management);
}

#[rstest]
fn config_derives_service_principal_and_scope(valid_config: AzureConfig) {
    let principal = valid_config
        .service_principal()
        .unwrap_or_else(|err| panic!("service principal: {err}"));
    assert_eq!(principal.authority, "https://login.windows.net");
    assert_eq!(principal.tenant_id, valid_config.tenant_id);
    assert_eq!(principal.client_id, valid_config.client_id);
    assert_eq!(principal.resource, "https://management.core.windows.net/");
    assert_eq!(principal.api_version, DEFAULT_API_VERSION);

    let scope = valid_config
        .arm_scope()
        .unwrap_or_else(|err| panic!("arm scope: {err}"));
    assert_eq!(scope.management_endpoint, "https://management.azure.com");
    assert_eq!(scope.subscription_id, valid_config.subscription_id);
    assert_eq!(scope.resource_group, "bosh-rg");

    assert_eq!(valid_config.naming_codec().default_scope(), STORAGE_ACCOUNT);
    let settings = valid_config.vm_settings();
    assert_eq!(settings.registry_endpoint, REGISTRY_ENDPOINT);
    assert_eq!(settings.ssh_user, "vcap");
}

#[rstest]
fn config_derives_poll_policy(valid_config: AzureConfig) {
    let policy = valid_config.poll_policy();

    assert_eq!(policy.interval, Duration::from_secs(5));
    assert_eq!(policy.max_interval, Duration::from_secs(30));
    assert_eq!(policy.timeout, Duration::from_secs(1800));
}

#[rstest]
fn resource_client_requires_a_valid_config(valid_config: AzureConfig) {
    let cfg = AzureConfig {
        tenant_id: String::new(),
        ..valid_config
    };

    let err = cfg.resource_client().expect_err("tenant is required");
    assert!(matches!(err, ConfigError::MissingField(_)), "{err:?}");
}

#[rstest]
#[tokio::test]
async fn config_loads_from_environment() {
    let _guard = azure_cpi::test_support::EnvGuard::apply(
        &[
            ("AZURE_SUBSCRIPTION_ID", "sub-from-env"),
            ("AZURE_TENANT_ID", "tenant-from-env"),
            ("AZURE_CLIENT_ID", "client-from-env"),
            ("AZURE_CLIENT_SECRET", "secret-from-env"),
            ("AZURE_RESOURCE_GROUP_NAME", "rg-from-env"),
            ("AZURE_STORAGE_ACCOUNT_NAME", "envstorage"),
            ("AZURE_REGISTRY_ENDPOINT", REGISTRY_ENDPOINT),
        ],
        &[
            "AZURE_CPI_CONFIG_PATH",
            "AZURE_ENVIRONMENT",
            "AZURE_API_VERSION",
            "AZURE_SSH_USER",
            "AZURE_SSH_CERTIFICATE",
            "AZURE_POLL_INTERVAL_SECS",
            "AZURE_MAX_POLL_INTERVAL_SECS",
            "AZURE_OPERATION_TIMEOUT_SECS",
        ],
    )
    .await;

    let cfg = AzureConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load from environment: {err}"));

    assert_eq!(cfg.subscription_id, "sub-from-env");
    assert_eq!(cfg.storage_account_name, "envstorage");
    assert_eq!(cfg.environment, "AzureCloud");
    assert_eq!(cfg.api_version, DEFAULT_API_VERSION);
    assert_eq!(cfg.ssh_user, "vcap");
    assert_eq!(cfg.poll_interval_secs, 5);
    cfg.validate()
        .unwrap_or_else(|err| panic!("loaded config should validate: {err}"));
}
