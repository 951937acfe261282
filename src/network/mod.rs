//! Network placement resolved from an instance's network specification.
//!
//! An instance joins exactly one `dynamic` or `manual` network, which names
//! the virtual network and subnet, and optionally one `vip` network, which
//! names the public IP fronted by a dedicated load balancer.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource_client::Endpoint;

/// Errors raised while interpreting network specifications.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NetworkError {
    /// Raised when more than one dynamic/manual network is declared.
    #[error("Must have exactly one dynamic or manual network per instance")]
    MultipleNetworks,
    /// Raised when no dynamic/manual network is declared.
    #[error("Exactly one dynamic or manual network must be defined")]
    MissingNetwork,
    /// Raised when a second vip network is declared.
    #[error("More than one vip network for '{network}'")]
    MultipleVipNetworks {
        /// Name of the surplus network.
        network: String,
    },
    /// Raised for network types other than `dynamic`, `manual` and `vip`.
    #[error(
        "Invalid network type '{kind}' for Azure, can only handle 'dynamic', 'vip', or 'manual' network types"
    )]
    InvalidType {
        /// Rejected network type.
        kind: String,
    },
    /// Raised when the instance network lacks its subnet coordinates.
    #[error("network '{network}' is missing cloud_properties.{field}")]
    MissingCloudProperty {
        /// Network name.
        network: String,
        /// Missing property.
        field: String,
    },
    /// Raised when the vip network carries no address.
    #[error("vip network '{network}' has no ip")]
    MissingPublicIp {
        /// Network name.
        network: String,
    },
    /// Raised for endpoints that are not `<frontend>:<backend>` port pairs.
    #[error("invalid endpoint '{value}': expected '<frontend port>:<backend port>'")]
    InvalidEndpoint {
        /// Rejected endpoint text.
        value: String,
    },
}

/// Network provider-specific properties.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NetworkCloudProperties {
    /// Virtual network name.
    #[serde(default)]
    pub virtual_network_name: Option<String>,
    /// Subnet name.
    #[serde(default)]
    pub subnet_name: Option<String>,
    /// TCP endpoints exposed through the vip load balancer.
    #[serde(default)]
    pub tcp_endpoints: Vec<String>,
    /// UDP endpoints exposed through the vip load balancer.
    #[serde(default)]
    pub udp_endpoints: Vec<String>,
}

/// One entry of the networks map handed to instance creation.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NetworkSpec {
    /// `dynamic`, `manual` or `vip`; absent means `manual`.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Static address (private for `manual`, public for `vip`).
    #[serde(default)]
    pub ip: Option<String>,
    /// DNS servers.
    #[serde(default)]
    pub dns: Option<Vec<String>>,
    /// Provider-specific properties.
    #[serde(default)]
    pub cloud_properties: NetworkCloudProperties,
}

/// Public-facing part of a placement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VipNetwork {
    /// Reserved public IP address.
    pub public_ip: String,
    /// TCP port mappings.
    pub tcp_endpoints: Vec<Endpoint>,
    /// UDP port mappings.
    pub udp_endpoints: Vec<Endpoint>,
}

/// Placement of an instance resolved from its networks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkPlacement {
    /// Virtual network holding the subnet.
    pub virtual_network_name: String,
    /// Subnet the network interface joins.
    pub subnet_name: String,
    /// Static private address, only for `manual` networks.
    pub private_ip: Option<String>,
    /// DNS servers of the instance network.
    pub dns: Option<Vec<String>>,
    /// Public IP requirement, if a vip network is present.
    pub vip: Option<VipNetwork>,
}

enum Kind {
    Dynamic,
    Manual,
    Vip,
}

fn kind_of(spec: &NetworkSpec) -> Result<Kind, NetworkError> {
    match spec.kind.as_deref().unwrap_or("manual") {
        "dynamic" => Ok(Kind::Dynamic),
        "manual" => Ok(Kind::Manual),
        "vip" => Ok(Kind::Vip),
        other => Err(NetworkError::InvalidType {
            kind: other.to_owned(),
        }),
    }
}

impl NetworkPlacement {
    /// Resolves the placement from a networks map.
    ///
    /// # Errors
    ///
    /// Returns a [`NetworkError`] when the map does not declare exactly one
    /// dynamic/manual network, declares several vip networks, uses an
    /// unknown type, or carries malformed properties.
    pub fn from_specs(specs: &BTreeMap<String, NetworkSpec>) -> Result<Self, NetworkError> {
        let mut instance: Option<(&str, &NetworkSpec, Kind)> = None;
        let mut vip: Option<(&str, &NetworkSpec)> = None;

        for (name, spec) in specs {
            match kind_of(spec)? {
                Kind::Vip => {
                    if vip.is_some() {
                        return Err(NetworkError::MultipleVipNetworks {
                            network: name.clone(),
                        });
                    }
                    vip = Some((name, spec));
                }
                kind => {
                    if instance.is_some() {
                        return Err(NetworkError::MultipleNetworks);
                    }
                    instance = Some((name, spec, kind));
                }
            }
        }

        let (name, spec, kind) = instance.ok_or(NetworkError::MissingNetwork)?;
        let properties = &spec.cloud_properties;
        let private_ip = match kind {
            Kind::Manual => spec.ip.clone(),
            Kind::Dynamic | Kind::Vip => None,
        };

        Ok(Self {
            virtual_network_name: required(
                name,
                "virtual_network_name",
                properties.virtual_network_name.as_deref(),
            )?,
            subnet_name: required(name, "subnet_name", properties.subnet_name.as_deref())?,
            private_ip,
            dns: spec.dns.clone(),
            vip: vip
                .map(|(vip_name, vip_spec)| vip_network(vip_name, vip_spec))
                .transpose()?,
        })
    }

    /// Public IP address requested by the vip network.
    #[must_use]
    pub fn public_ip(&self) -> Option<&str> {
        self.vip.as_ref().map(|vip| vip.public_ip.as_str())
    }
}

fn required(network: &str, field: &str, value: Option<&str>) -> Result<String, NetworkError> {
    value
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| NetworkError::MissingCloudProperty {
            network: network.to_owned(),
            field: field.to_owned(),
        })
}

fn vip_network(name: &str, spec: &NetworkSpec) -> Result<VipNetwork, NetworkError> {
    let public_ip = spec.ip.clone().ok_or_else(|| NetworkError::MissingPublicIp {
        network: name.to_owned(),
    })?;
    Ok(VipNetwork {
        public_ip,
        tcp_endpoints: parse_endpoints(&spec.cloud_properties.tcp_endpoints)?,
        udp_endpoints: parse_endpoints(&spec.cloud_properties.udp_endpoints)?,
    })
}

fn parse_endpoints(values: &[String]) -> Result<Vec<Endpoint>, NetworkError> {
    values.iter().map(|value| value.parse()).collect()
}

impl FromStr for Endpoint {
    type Err = NetworkError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || NetworkError::InvalidEndpoint {
            value: value.to_owned(),
        };
        let (frontend, backend) = value.trim().split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            frontend_port: frontend.trim().parse().map_err(|_| invalid())?,
            backend_port: backend.trim().parse().map_err(|_| invalid())?,
        })
    }
}
