//! Newtypes and enums carried by encoded resource names.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::NamingError;

macro_rules! newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, Hash, PartialEq)]
        pub struct $name(String);

        impl $name {
            /// Returns the underlying string.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

newtype!(
    /// Instance identifier of the form `<scope>-<seed>`.
    InstanceId
);
newtype!(
    /// Opaque disk name with its scope, caching mode and tier encoded inline.
    ResourceName
);

impl InstanceId {
    /// Returns the storage scope embedded in the identifier, i.e. everything
    /// before the first `-`.
    #[must_use]
    pub fn scope(&self) -> &str {
        self.0
            .split_once('-')
            .map_or(self.0.as_str(), |(scope, _)| scope)
    }
}

/// Role a disk plays for an instance.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DiskRole {
    /// Boot disk created together with the instance.
    Os,
    /// Persistent disk attached after boot.
    Data,
}

/// Host caching mode for an attached disk.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum CachingMode {
    /// No host caching.
    #[default]
    None,
    /// Read-only host caching.
    ReadOnly,
    /// Read/write host caching.
    ReadWrite,
}

impl CachingMode {
    /// Returns the wire spelling used in names and API payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::ReadOnly => "ReadOnly",
            Self::ReadWrite => "ReadWrite",
        }
    }
}

impl fmt::Display for CachingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CachingMode {
    type Err = NamingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "None" => Ok(Self::None),
            "ReadOnly" => Ok(Self::ReadOnly),
            "ReadWrite" => Ok(Self::ReadWrite),
            other => Err(NamingError::InvalidCaching {
                value: other.to_owned(),
            }),
        }
    }
}

/// Storage performance tier of a disk.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum DiskTier {
    /// Standard (HDD backed) storage.
    #[default]
    Standard,
    /// Premium (SSD backed) storage.
    Premium,
}

impl DiskTier {
    /// Returns the lowercase spelling accepted in disk cloud properties.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Premium => "premium",
        }
    }
}

impl fmt::Display for DiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiskTier {
    type Err = NamingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "standard" => Ok(Self::Standard),
            "premium" => Ok(Self::Premium),
            other => Err(NamingError::InvalidTier {
                value: other.to_owned(),
            }),
        }
    }
}
