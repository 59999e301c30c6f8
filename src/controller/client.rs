//! Cluster access seam
//!
//! The completion checkers and the pause orchestrator talk to the API server
//! only through these traits, so the same logic runs against a live cluster
//! ([`KubeClusterClient`]) or an in-memory fake in tests.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, instrument};

use crate::crd::{
    DataUpload, HostedCluster, HostedControlPlane, NodePool, PodVolumeBackup, VolumeSnapshot,
    VolumeSnapshotContent,
};
use crate::error::Result;

use super::pause::{ManagedKind, ManagedObject, PauseField};
use super::watched::{ObjectIdentity, WatchedKind, WatchedObject};

/// Read-only listing of the watched kinds
#[async_trait]
pub trait ResourceLister: Send + Sync {
    /// List every object of `kind` in `namespace`, or cluster-wide for `None`.
    ///
    /// A kind the API server does not serve lists as empty.
    async fn list(&self, kind: WatchedKind, namespace: Option<&str>) -> Result<Vec<WatchedObject>>;
}

/// Reads and writes on the hosted-cluster resources
#[async_trait]
pub trait HostedClusterClient: Send + Sync {
    /// Current pause field and resource version of a managed object
    async fn read_pause(&self, object: &ManagedObject) -> Result<PauseField>;

    /// Set the pause field, conditional on the resource version in `observed`.
    ///
    /// A stale `observed` makes the API server answer 409 Conflict.
    async fn write_pause(
        &self,
        object: &ManagedObject,
        observed: &PauseField,
        value: &str,
    ) -> Result<()>;

    /// NodePools belonging to a HostedCluster
    async fn node_pools(&self, cluster: &ManagedObject) -> Result<Vec<ManagedObject>>;

    async fn control_plane(&self, identity: &ObjectIdentity) -> Result<Option<HostedControlPlane>>;

    async fn control_planes_in(&self, namespace: &str) -> Result<Vec<HostedControlPlane>>;
}

/// [`ResourceLister`] and [`HostedClusterClient`] backed by kube-rs
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

async fn list_all<K>(api: Api<K>) -> Result<Vec<K>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.list(&ListParams::default()).await {
        Ok(list) => Ok(list.items),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            debug!(reason = %e.reason, "Resource kind not served, treating listing as empty");
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

fn observe<'a, K>(items: &'a [K]) -> Vec<WatchedObject>
where
    WatchedObject: From<&'a K>,
{
    items.iter().map(WatchedObject::from).collect()
}

async fn patch_pause<K>(api: Api<K>, name: &str, observed: &PauseField, value: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let mut patch = json!({ "spec": { "pausedUntil": value } });
    if let Some(rv) = &observed.resource_version {
        patch["metadata"] = json!({ "resourceVersion": rv });
    }
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

#[async_trait]
impl ResourceLister for KubeClusterClient {
    #[instrument(skip(self), fields(kind = %kind))]
    async fn list(&self, kind: WatchedKind, namespace: Option<&str>) -> Result<Vec<WatchedObject>> {
        let observed = match kind {
            WatchedKind::VolumeSnapshotContent => {
                // Cluster scoped, so the namespace argument does not apply.
                let api: Api<VolumeSnapshotContent> = Api::all(self.client.clone());
                observe(&list_all(api).await?)
            }
            WatchedKind::VolumeSnapshot => {
                observe(&list_all(self.api::<VolumeSnapshot>(namespace)).await?)
            }
            WatchedKind::DataUpload => observe(&list_all(self.api::<DataUpload>(namespace)).await?),
            WatchedKind::PodVolumeBackup => {
                observe(&list_all(self.api::<PodVolumeBackup>(namespace)).await?)
            }
        };
        debug!(count = observed.len(), "Listed watched objects");
        Ok(observed)
    }
}

#[async_trait]
impl HostedClusterClient for KubeClusterClient {
    async fn read_pause(&self, object: &ManagedObject) -> Result<PauseField> {
        match object.kind {
            ManagedKind::HostedCluster => {
                let hc = self
                    .api::<HostedCluster>(Some(&object.namespace))
                    .get(&object.name)
                    .await?;
                Ok(PauseField {
                    value: hc.spec.paused_until.clone(),
                    resource_version: hc.resource_version(),
                })
            }
            ManagedKind::NodePool => {
                let np = self
                    .api::<NodePool>(Some(&object.namespace))
                    .get(&object.name)
                    .await?;
                Ok(PauseField {
                    value: np.spec.paused_until.clone(),
                    resource_version: np.resource_version(),
                })
            }
        }
    }

    async fn write_pause(
        &self,
        object: &ManagedObject,
        observed: &PauseField,
        value: &str,
    ) -> Result<()> {
        match object.kind {
            ManagedKind::HostedCluster => {
                let api = self.api::<HostedCluster>(Some(&object.namespace));
                patch_pause(api, &object.name, observed, value).await
            }
            ManagedKind::NodePool => {
                let api = self.api::<NodePool>(Some(&object.namespace));
                patch_pause(api, &object.name, observed, value).await
            }
        }
    }

    async fn node_pools(&self, cluster: &ManagedObject) -> Result<Vec<ManagedObject>> {
        let pools = list_all(self.api::<NodePool>(Some(&cluster.namespace))).await?;
        Ok(pools
            .iter()
            .filter(|np| np.spec.cluster_name == cluster.name)
            .map(|np| ManagedObject::node_pool(&cluster.namespace, &np.name_any()))
            .collect())
    }

    async fn control_plane(&self, identity: &ObjectIdentity) -> Result<Option<HostedControlPlane>> {
        let api = self.api::<HostedControlPlane>(identity.namespace.as_deref());
        Ok(api.get_opt(&identity.name).await?)
    }

    async fn control_planes_in(&self, namespace: &str) -> Result<Vec<HostedControlPlane>> {
        list_all(self.api::<HostedControlPlane>(Some(namespace))).await
    }
}
