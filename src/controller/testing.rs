//! In-memory cluster used by the controller tests

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::crd::{
    AvailabilityPolicy, HostedControlPlane, HostedControlPlaneSpec, Platform, PlatformSpec,
    HOSTED_CLUSTER_ANNOTATION,
};
use crate::error::{api_error, Result};

use super::client::{HostedClusterClient, ResourceLister};
use super::pause::{ManagedKind, ManagedObject, PauseField};
use super::watched::{ObjectIdentity, Phase, WatchedKind, WatchedObject};

pub struct WatchedBuilder {
    obj: WatchedObject,
}

impl WatchedBuilder {
    pub fn new(kind: WatchedKind, name: &str) -> Self {
        Self {
            obj: WatchedObject {
                kind,
                identity: ObjectIdentity::new(name, None),
                labels: BTreeMap::new(),
                ref_namespace: None,
                phase: Phase::New,
                message: None,
            },
        }
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.obj.identity.namespace = Some(namespace.to_string());
        self
    }

    pub fn ref_namespace(mut self, namespace: &str) -> Self {
        self.obj.ref_namespace = Some(namespace.to_string());
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.obj.phase = phase;
        self
    }

    pub fn build(self) -> WatchedObject {
        self.obj
    }
}

#[derive(Clone, Debug)]
struct Pausable {
    value: Option<String>,
    resource_version: u64,
    cluster_name: Option<String>,
}

#[derive(Default)]
struct Inner {
    watched: Vec<WatchedObject>,
    list_calls: HashMap<WatchedKind, u32>,
    managed: BTreeMap<ManagedObject, Pausable>,
    writes: HashMap<ManagedObject, u32>,
    injected_conflicts: HashMap<ManagedObject, u32>,
    control_planes: Vec<HostedControlPlane>,
    propagate: bool,
    /// Control-plane reads left before a pending value lands
    pending_propagation: Option<(Option<String>, u32)>,
}

/// Fake API server implementing both client traits
#[derive(Default)]
pub struct FakeCluster {
    inner: Mutex<Inner>,
}

impl FakeCluster {
    /// A hosted cluster `clusters/prod` with its control plane in
    /// `clusters-prod` and the given node pools; pause values propagate to
    /// the control plane immediately.
    pub fn with_hosted_cluster(ha: bool, node_pools: &[&str]) -> Self {
        let cluster = Self::default();
        {
            let mut inner = cluster.inner.lock().unwrap();
            inner.propagate = true;
            inner.managed.insert(
                ManagedObject::hosted_cluster("clusters", "prod"),
                Pausable {
                    value: None,
                    resource_version: 1,
                    cluster_name: None,
                },
            );
            for pool in node_pools {
                inner.managed.insert(
                    ManagedObject::node_pool("clusters", pool),
                    Pausable {
                        value: None,
                        resource_version: 1,
                        cluster_name: Some("prod".to_string()),
                    },
                );
            }
            let mut hcp = HostedControlPlane::new(
                "prod",
                HostedControlPlaneSpec {
                    paused_until: None,
                    platform: Some(PlatformSpec {
                        type_: Platform::AWS,
                    }),
                    controller_availability_policy: Some(if ha {
                        AvailabilityPolicy::HighlyAvailable
                    } else {
                        AvailabilityPolicy::SingleReplica
                    }),
                },
            );
            hcp.metadata.namespace = Some("clusters-prod".to_string());
            hcp.metadata.annotations = Some(BTreeMap::from([(
                HOSTED_CLUSTER_ANNOTATION.to_string(),
                "clusters/prod".to_string(),
            )]));
            inner.control_planes.push(hcp);
        }
        cluster
    }

    /// Insert or replace a watched object
    pub fn put(&self, obj: WatchedObject) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .watched
            .retain(|o| !(o.kind == obj.kind && o.identity == obj.identity));
        inner.watched.push(obj);
    }

    pub fn remove(&self, kind: WatchedKind, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .watched
            .retain(|o| !(o.kind == kind && o.identity.name == name));
    }

    pub fn list_calls(&self, kind: WatchedKind) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.list_calls.get(&kind).copied().unwrap_or(0)
    }

    pub fn pause_value(&self, object: &ManagedObject) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.managed.get(object).and_then(|p| p.value.clone())
    }

    pub fn set_pause_value(&self, object: &ManagedObject, value: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(p) = inner.managed.get_mut(object) {
            p.value = value.map(str::to_string);
            p.resource_version += 1;
        }
    }

    pub fn writes(&self, object: &ManagedObject) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.writes.get(object).copied().unwrap_or(0)
    }

    /// Fail the next `count` writes to `object` with 409 Conflict
    pub fn inject_conflicts(&self, object: &ManagedObject, count: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.injected_conflicts.insert(object.clone(), count);
    }

    /// Stop copying hosted-cluster pause values to the control plane
    pub fn disable_propagation(&self) {
        self.inner.lock().unwrap().propagate = false;
    }

    /// Copy hosted-cluster pause values only after `reads` control-plane reads
    pub fn delay_propagation(&self, reads: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.propagate = true;
        inner.pending_propagation = Some((None, reads));
    }

    pub fn control_plane_pause(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .control_planes
            .first()
            .and_then(|hcp| hcp.spec.paused_until.clone())
    }
}

#[async_trait]
impl ResourceLister for FakeCluster {
    async fn list(&self, kind: WatchedKind, namespace: Option<&str>) -> Result<Vec<WatchedObject>> {
        let mut inner = self.inner.lock().unwrap();
        *inner.list_calls.entry(kind).or_default() += 1;
        Ok(inner
            .watched
            .iter()
            .filter(|o| o.kind == kind)
            .filter(|o| namespace.is_none() || o.identity.namespace.as_deref() == namespace)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl HostedClusterClient for FakeCluster {
    async fn read_pause(&self, object: &ManagedObject) -> Result<PauseField> {
        let inner = self.inner.lock().unwrap();
        let p = inner
            .managed
            .get(object)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        Ok(PauseField {
            value: p.value.clone(),
            resource_version: Some(p.resource_version.to_string()),
        })
    }

    async fn write_pause(
        &self,
        object: &ManagedObject,
        observed: &PauseField,
        value: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(left) = inner.injected_conflicts.get_mut(object) {
            if *left > 0 {
                *left -= 1;
                return Err(api_error(409, "Conflict"));
            }
        }
        let p = inner
            .managed
            .get_mut(object)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        if observed.resource_version.as_deref() != Some(p.resource_version.to_string().as_str()) {
            return Err(api_error(409, "Conflict"));
        }
        p.value = Some(value.to_string());
        p.resource_version += 1;
        *inner.writes.entry(object.clone()).or_default() += 1;

        if object.kind == ManagedKind::HostedCluster && inner.propagate {
            match inner.pending_propagation.take() {
                Some((_, reads)) if reads > 0 => {
                    inner.pending_propagation = Some((Some(value.to_string()), reads));
                }
                _ => {
                    if let Some(hcp) = inner.control_planes.first_mut() {
                        hcp.spec.paused_until = Some(value.to_string());
                    }
                }
            }
        }
        Ok(())
    }

    async fn node_pools(&self, cluster: &ManagedObject) -> Result<Vec<ManagedObject>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .managed
            .iter()
            .filter(|(obj, p)| {
                obj.kind == ManagedKind::NodePool
                    && obj.namespace == cluster.namespace
                    && p.cluster_name.as_deref() == Some(cluster.name.as_str())
            })
            .map(|(obj, _)| obj.clone())
            .collect())
    }

    async fn control_plane(&self, identity: &ObjectIdentity) -> Result<Option<HostedControlPlane>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some((value, reads)) = inner.pending_propagation.take() {
            match (value, reads) {
                (Some(value), 0) => {
                    if let Some(hcp) = inner.control_planes.first_mut() {
                        hcp.spec.paused_until = Some(value);
                    }
                }
                (Some(value), n) => inner.pending_propagation = Some((Some(value), n - 1)),
                (None, n) => inner.pending_propagation = Some((None, n)),
            }
        }
        Ok(inner
            .control_planes
            .iter()
            .find(|hcp| {
                hcp.metadata.name.as_deref() == Some(identity.name.as_str())
                    && hcp.metadata.namespace == identity.namespace
            })
            .cloned())
    }

    async fn control_planes_in(&self, namespace: &str) -> Result<Vec<HostedControlPlane>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .control_planes
            .iter()
            .filter(|hcp| hcp.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }
}
