//! Shared types for the hosted-cluster resources

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Infrastructure platform of a hosted cluster
///
/// The platform decides which data-movement chain a backup goes through;
/// see [`crate::controller::DataMoverChain`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Platform {
    AWS,
    Azure,
    GCP,
    KubeVirt,
    Agent,
    OpenStack,
    IBMCloud,
    PowerVS,
    #[default]
    #[serde(rename = "None")]
    NonePlatform,
    /// A platform type this build does not know about
    #[serde(other)]
    Other,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::AWS => write!(f, "AWS"),
            Platform::Azure => write!(f, "Azure"),
            Platform::GCP => write!(f, "GCP"),
            Platform::KubeVirt => write!(f, "KubeVirt"),
            Platform::Agent => write!(f, "Agent"),
            Platform::OpenStack => write!(f, "OpenStack"),
            Platform::IBMCloud => write!(f, "IBMCloud"),
            Platform::PowerVS => write!(f, "PowerVS"),
            Platform::NonePlatform => write!(f, "None"),
            Platform::Other => write!(f, "Other"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "AWS" => Platform::AWS,
            "Azure" => Platform::Azure,
            "GCP" => Platform::GCP,
            "KubeVirt" => Platform::KubeVirt,
            "Agent" => Platform::Agent,
            "OpenStack" => Platform::OpenStack,
            "IBMCloud" => Platform::IBMCloud,
            "PowerVS" => Platform::PowerVS,
            "None" | "" => Platform::NonePlatform,
            _ => Platform::Other,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PlatformSpec {
    #[serde(rename = "type", default)]
    pub type_: Platform,
}

/// Replica policy of the control-plane components
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum AvailabilityPolicy {
    /// Three replicas per control-plane component
    HighlyAvailable,
    #[default]
    SingleReplica,
}
