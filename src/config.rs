//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::control_plane::{
    ControlPlane, CredentialCache, PollPolicy, ReqwestTransport, ServicePrincipal,
};
use crate::naming::NamingCodec;
use crate::resource_client::{ArmClient, ArmScope};
use crate::vm::VmSettings;

/// Cloud environment used when none is configured.
pub const DEFAULT_ENVIRONMENT: &str = "AzureCloud";

/// Token authority and management endpoints of one cloud environment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoints {
    /// Token authority base URL.
    pub authority: &'static str,
    /// Resource Manager base URL.
    pub management: &'static str,
    /// Resource tokens are requested for.
    pub token_resource: &'static str,
}

impl Endpoints {
    /// Endpoints of the named environment, if known.
    #[must_use]
    pub fn for_environment(environment: &str) -> Option<Self> {
        match environment {
            "AzureCloud" => Some(Self {
                authority: "https://login.windows.net",
                management: "https://management.azure.com",
                token_resource: "https://management.core.windows.net/",
            }),
            "AzureChinaCloud" => Some(Self {
                authority: "https://login.chinacloudapi.cn",
                management: "https://management.chinacloudapi.cn",
                token_resource: "https://management.core.chinacloudapi.cn/",
            }),
            _ => None,
        }
    }
}

/// Azure specific configuration derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "AZURE",
    discovery(
        app_name = "azure-cpi",
        env_var = "AZURE_CPI_CONFIG_PATH",
        config_file_name = "azure-cpi.toml",
        dotfile_name = ".azure-cpi.toml",
        project_file_name = "azure-cpi.toml"
    )
)]
pub struct AzureConfig {
    /// Cloud environment (`AzureCloud` or `AzureChinaCloud`).
    #[ortho_config(default = DEFAULT_ENVIRONMENT.to_owned())]
    pub environment: String,
    /// API version sent with every control-plane request.
    #[ortho_config(default = "2015-05-01-preview".to_owned())]
    pub api_version: String,
    /// Subscription owning every managed resource.
    pub subscription_id: String,
    /// Directory (tenant) of the service principal.
    pub tenant_id: String,
    /// Service principal application id.
    pub client_id: String,
    /// Service principal secret.
    pub client_secret: String,
    /// Resource group holding every managed resource.
    pub resource_group_name: String,
    /// Default storage account; legacy disk names resolve to it.
    pub storage_account_name: String,
    /// Admin user created on every instance. Defaults to `vcap`.
    #[ortho_config(default = "vcap".to_owned())]
    pub ssh_user: String,
    /// Public key installed for the admin user.
    pub ssh_certificate: Option<String>,
    /// Registry endpoint written into the bootstrap metadata.
    pub registry_endpoint: String,
    /// First delay between completion polls, in seconds.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Upper bound for the doubled poll delay, in seconds.
    #[ortho_config(default = 30)]
    pub max_poll_interval_secs: u64,
    /// Time allowed for one asynchronous operation, in seconds.
    #[ortho_config(default = 1800)]
    pub operation_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl AzureConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [azure] in azure-cpi.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("azure-cpi")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages include guidance on how
    /// to provide missing values via environment variables or configuration
    /// files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty,
    /// [`ConfigError::UnknownEnvironment`] for an unsupported environment and
    /// [`ConfigError::InvalidPolling`] when the poll settings cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (
                &self.subscription_id,
                FieldMetadata::new("subscription ID", "AZURE_SUBSCRIPTION_ID", "subscription_id"),
            ),
            (
                &self.tenant_id,
                FieldMetadata::new("tenant ID", "AZURE_TENANT_ID", "tenant_id"),
            ),
            (
                &self.client_id,
                FieldMetadata::new("service principal client ID", "AZURE_CLIENT_ID", "client_id"),
            ),
            (
                &self.client_secret,
                FieldMetadata::new(
                    "service principal secret",
                    "AZURE_CLIENT_SECRET",
                    "client_secret",
                ),
            ),
            (
                &self.resource_group_name,
                FieldMetadata::new(
                    "resource group",
                    "AZURE_RESOURCE_GROUP_NAME",
                    "resource_group_name",
                ),
            ),
            (
                &self.storage_account_name,
                FieldMetadata::new(
                    "default storage account",
                    "AZURE_STORAGE_ACCOUNT_NAME",
                    "storage_account_name",
                ),
            ),
            (
                &self.registry_endpoint,
                FieldMetadata::new(
                    "registry endpoint",
                    "AZURE_REGISTRY_ENDPOINT",
                    "registry_endpoint",
                ),
            ),
        ];
        for (value, metadata) in &required {
            Self::require_field(value, metadata)?;
        }
        self.endpoints()?;
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPolling(String::from(
                "poll_interval_secs must be at least 1",
            )));
        }
        if self.max_poll_interval_secs < self.poll_interval_secs {
            return Err(ConfigError::InvalidPolling(String::from(
                "max_poll_interval_secs must not be below poll_interval_secs",
            )));
        }
        if self.operation_timeout_secs < self.poll_interval_secs {
            return Err(ConfigError::InvalidPolling(String::from(
                "operation_timeout_secs must not be below poll_interval_secs",
            )));
        }
        Ok(())
    }

    /// Endpoints of the configured environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownEnvironment`] when the environment is
    /// not supported.
    pub fn endpoints(&self) -> Result<Endpoints, ConfigError> {
        Endpoints::for_environment(&self.environment)
            .ok_or_else(|| ConfigError::UnknownEnvironment(self.environment.clone()))
    }

    /// Identity used to obtain bearer tokens.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownEnvironment`] when the environment is
    /// not supported.
    pub fn service_principal(&self) -> Result<ServicePrincipal, ConfigError> {
        let endpoints = self.endpoints()?;
        Ok(ServicePrincipal {
            authority: endpoints.authority.to_owned(),
            tenant_id: self.tenant_id.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            resource: endpoints.token_resource.to_owned(),
            api_version: self.api_version.clone(),
        })
    }

    /// Completion polling policy.
    #[must_use]
    pub const fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_interval: Duration::from_secs(self.max_poll_interval_secs),
            timeout: Duration::from_secs(self.operation_timeout_secs),
        }
    }

    /// Subscription and resource group every request is scoped to.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownEnvironment`] when the environment is
    /// not supported.
    pub fn arm_scope(&self) -> Result<ArmScope, ConfigError> {
        Ok(ArmScope {
            management_endpoint: self.endpoints()?.management.to_owned(),
            subscription_id: self.subscription_id.clone(),
            resource_group: self.resource_group_name.clone(),
            api_version: self.api_version.clone(),
        })
    }

    /// Settings applied to every created instance.
    #[must_use]
    pub fn vm_settings(&self) -> VmSettings {
        VmSettings {
            registry_endpoint: self.registry_endpoint.clone(),
            ssh_user: self.ssh_user.clone(),
            ssh_certificate: self.ssh_certificate.clone(),
        }
    }

    /// Codec resolving legacy disk names to the default storage account.
    #[must_use]
    pub fn naming_codec(&self) -> NamingCodec {
        NamingCodec::new(self.storage_account_name.clone())
    }

    /// Builds a Resource Manager client over `reqwest` after validating the
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn resource_client(&self) -> Result<ArmClient<ReqwestTransport>, ConfigError> {
        self.validate()?;
        let credentials = Arc::new(CredentialCache::new(self.service_principal()?));
        let plane = ControlPlane::new(ReqwestTransport::new(), credentials)
            .with_poll_policy(self.poll_policy());
        Ok(ArmClient::new(plane, self.arm_scope()?))
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates an unsupported cloud environment.
    #[error("unknown environment '{0}': expected AzureCloud or AzureChinaCloud")]
    UnknownEnvironment(String),
    /// Indicates poll settings that cannot make progress.
    #[error("invalid polling configuration: {0}")]
    InvalidPolling(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
