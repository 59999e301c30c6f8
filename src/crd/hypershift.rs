//! HyperShift resources (`hypershift.openshift.io/v1beta1`)
//!
//! The tracker pauses [`HostedCluster`] and [`NodePool`] objects through their
//! `spec.pausedUntil` field and watches the [`HostedControlPlane`] for the
//! propagated value.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{AvailabilityPolicy, PlatformSpec};

/// Annotation on the HostedControlPlane naming its HostedCluster as `<namespace>/<name>`
pub const HOSTED_CLUSTER_ANNOTATION: &str = "hypershift.openshift.io/cluster";

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "hypershift.openshift.io",
    version = "v1beta1",
    kind = "HostedCluster",
    namespaced,
    shortname = "hc"
)]
#[serde(rename_all = "camelCase")]
pub struct HostedClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_until: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_availability_policy: Option<AvailabilityPolicy>,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "hypershift.openshift.io",
    version = "v1beta1",
    kind = "NodePool",
    namespaced,
    shortname = "np"
)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolSpec {
    /// Name of the HostedCluster this pool belongs to
    #[serde(default)]
    pub cluster_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_until: Option<String>,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "hypershift.openshift.io",
    version = "v1beta1",
    kind = "HostedControlPlane",
    namespaced,
    shortname = "hcp"
)]
#[serde(rename_all = "camelCase")]
pub struct HostedControlPlaneSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_until: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_availability_policy: Option<AvailabilityPolicy>,
}

impl HostedControlPlane {
    /// `(namespace, name)` of the owning HostedCluster, from the cluster annotation
    pub fn hosted_cluster_ref(&self) -> Option<(String, String)> {
        let value = self
            .metadata
            .annotations
            .as_ref()?
            .get(HOSTED_CLUSTER_ANNOTATION)?;
        let (namespace, name) = value.split_once('/')?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some((namespace.to_string(), name.to_string()))
    }

    pub fn is_highly_available(&self) -> bool {
        self.spec.controller_availability_policy == Some(AvailabilityPolicy::HighlyAvailable)
    }
}
