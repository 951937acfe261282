//! Stateless naming for instances and disks.
//!
//! Disk attributes (storage scope, caching mode, tier) live inside the disk
//! name itself so they can be recovered later without a side database. Two
//! layouts are understood when decoding:
//!
//! - current: `bosh-data[-premium]-<scope>-<uuid>-<caching>`
//! - legacy: `bosh-disk[-premium]-<uuid>[-<caching>]`, whose scope is the
//!   configured default storage account.
//!
//! OS disks are named `bosh-os-<instance id>` and the instance id is itself
//! `<scope>-<seed>`.

mod types;

use thiserror::Error;
use uuid::Uuid;

pub use types::{CachingMode, DiskRole, DiskTier, InstanceId, ResourceName};

const OS_DISK_PREFIX: &str = "bosh-os-";
const DATA_DISK_PREFIX: &str = "bosh-data-";
const PREMIUM_DATA_DISK_PREFIX: &str = "bosh-data-premium-";
const LEGACY_DISK_PREFIX: &str = "bosh-disk-";
const LEGACY_PREMIUM_DISK_PREFIX: &str = "bosh-disk-premium-";

/// Suffix appended to disk names to form their blob names.
pub const BLOB_SUFFIX: &str = ".vhd";

#[derive(Clone, Copy, Debug)]
enum Scheme {
    Os,
    Current(DiskTier),
    Legacy(DiskTier),
}

// Longer prefixes must precede the prefixes they extend.
const KNOWN_PREFIXES: [(&str, Scheme); 5] = [
    (OS_DISK_PREFIX, Scheme::Os),
    (PREMIUM_DATA_DISK_PREFIX, Scheme::Current(DiskTier::Premium)),
    (DATA_DISK_PREFIX, Scheme::Current(DiskTier::Standard)),
    (LEGACY_PREMIUM_DISK_PREFIX, Scheme::Legacy(DiskTier::Premium)),
    (LEGACY_DISK_PREFIX, Scheme::Legacy(DiskTier::Standard)),
];

/// Errors raised while encoding or decoding names.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NamingError {
    /// Raised when a name carries none of the known prefixes.
    #[error("invalid resource name '{name}': unrecognised prefix")]
    InvalidName {
        /// Name that failed to decode.
        name: String,
    },
    /// Raised when a scope cannot be embedded in a name.
    #[error("invalid scope '{scope}': must be non-empty, free of '-' and not 'premium'")]
    InvalidScope {
        /// Rejected scope.
        scope: String,
    },
    /// Raised for caching values other than `None`, `ReadOnly`, `ReadWrite`.
    #[error("unknown disk caching {value}")]
    InvalidCaching {
        /// Rejected caching value.
        value: String,
    },
    /// Raised for tier values other than `standard` and `premium`.
    #[error("unknown disk type {value}")]
    InvalidTier {
        /// Rejected tier value.
        value: String,
    },
}

/// Attributes recovered from (or encoded into) a disk name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiskIdentity {
    /// Role of the disk.
    pub role: DiskRole,
    /// Storage scope (storage account) holding the disk blob.
    pub scope: String,
    /// Caching mode; always present for data disks, absent for OS disks.
    pub caching: Option<CachingMode>,
    /// Storage tier; always present for data disks, absent for OS disks.
    pub tier: Option<DiskTier>,
}

impl DiskIdentity {
    /// Identity of an OS disk in `scope`.
    #[must_use]
    pub fn os(scope: impl Into<String>) -> Self {
        Self {
            role: DiskRole::Os,
            scope: scope.into(),
            caching: None,
            tier: None,
        }
    }

    /// Identity of a data disk.
    #[must_use]
    pub fn data(scope: impl Into<String>, caching: CachingMode, tier: DiskTier) -> Self {
        Self {
            role: DiskRole::Data,
            scope: scope.into(),
            caching: Some(caching),
            tier: Some(tier),
        }
    }

    /// Caching mode, defaulting to [`CachingMode::None`].
    #[must_use]
    pub fn caching_or_default(&self) -> CachingMode {
        self.caching.unwrap_or_default()
    }

    /// Tier, defaulting to [`DiskTier::Standard`].
    #[must_use]
    pub fn tier_or_default(&self) -> DiskTier {
        self.tier.unwrap_or_default()
    }
}

/// Encodes and decodes disk identities.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NamingCodec {
    default_scope: String,
}

impl NamingCodec {
    /// Creates a codec that resolves legacy names to `default_scope`.
    #[must_use]
    pub fn new(default_scope: impl Into<String>) -> Self {
        Self {
            default_scope: default_scope.into(),
        }
    }

    /// Scope assigned to names that do not embed one.
    #[must_use]
    pub fn default_scope(&self) -> &str {
        &self.default_scope
    }

    /// Encodes `identity` with a freshly generated unique suffix.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::InvalidScope`] when the scope is empty,
    /// contains `-` or is `premium`.
    pub fn encode(&self, identity: &DiskIdentity) -> Result<ResourceName, NamingError> {
        Self::encode_with_suffix(identity, &Uuid::new_v4().to_string())
    }

    /// Encodes `identity` with the given unique suffix.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::InvalidScope`] when the scope is empty,
    /// contains `-` or is `premium`.
    pub fn encode_with_suffix(
        identity: &DiskIdentity,
        suffix: &str,
    ) -> Result<ResourceName, NamingError> {
        validate_scope(&identity.scope)?;
        let scope = &identity.scope;
        let name = match identity.role {
            DiskRole::Os => format!("{OS_DISK_PREFIX}{scope}-{suffix}"),
            DiskRole::Data => {
                let prefix = match identity.tier_or_default() {
                    DiskTier::Standard => DATA_DISK_PREFIX,
                    DiskTier::Premium => PREMIUM_DATA_DISK_PREFIX,
                };
                let caching = identity.caching_or_default();
                format!("{prefix}{scope}-{suffix}-{caching}")
            }
        };
        Ok(ResourceName::from(name))
    }

    /// Name of the OS disk belonging to `instance_id`.
    #[must_use]
    pub fn os_disk_name(instance_id: &InstanceId) -> ResourceName {
        ResourceName::from(format!("{OS_DISK_PREFIX}{instance_id}"))
    }

    /// Decodes a disk name back into its identity.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::InvalidName`] when no known prefix matches or
    /// a current-scheme name lacks its scope segment.
    pub fn decode(&self, name: &str) -> Result<DiskIdentity, NamingError> {
        let (rest, scheme) = KNOWN_PREFIXES
            .iter()
            .find_map(|(prefix, scheme)| name.strip_prefix(prefix).map(|rest| (rest, *scheme)))
            .ok_or_else(|| invalid_name(name))?;

        match scheme {
            Scheme::Os => {
                let scope = leading_scope(rest).ok_or_else(|| invalid_name(name))?;
                Ok(DiskIdentity::os(scope))
            }
            Scheme::Current(tier) => {
                let scope = leading_scope(rest).ok_or_else(|| invalid_name(name))?;
                Ok(DiskIdentity::data(scope, trailing_caching(rest), tier))
            }
            Scheme::Legacy(tier) => Ok(DiskIdentity::data(
                self.default_scope.clone(),
                trailing_caching(rest),
                tier,
            )),
        }
    }

    /// Blob name under which the disk bytes are stored.
    #[must_use]
    pub fn blob_name(name: &ResourceName) -> String {
        format!("{name}{BLOB_SUFFIX}")
    }
}

/// Builds the instance identifier for `seed` within `scope`.
///
/// # Errors
///
/// Returns [`NamingError::InvalidScope`] when the scope cannot be embedded.
pub fn generate_instance_id(scope: &str, seed: &str) -> Result<InstanceId, NamingError> {
    validate_scope(scope)?;
    Ok(InstanceId::from(format!("{scope}-{seed}")))
}

fn validate_scope(scope: &str) -> Result<(), NamingError> {
    // A scope equal to the tier marker would decode as a premium disk.
    if scope.is_empty() || scope.contains('-') || scope == DiskTier::Premium.as_str() {
        return Err(NamingError::InvalidScope {
            scope: scope.to_owned(),
        });
    }
    Ok(())
}

fn leading_scope(rest: &str) -> Option<&str> {
    match rest.split_once('-') {
        Some((scope, tail)) if !scope.is_empty() && !tail.is_empty() => Some(scope),
        _ => None,
    }
}

fn trailing_caching(rest: &str) -> CachingMode {
    rest.rsplit_once('-')
        .and_then(|(_, tail)| tail.parse().ok())
        .unwrap_or_default()
}

fn invalid_name(name: &str) -> NamingError {
    NamingError::InvalidName {
        name: name.to_owned(),
    }
}

#[cfg(test)]
mod tests;
