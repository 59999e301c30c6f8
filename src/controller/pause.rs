//! Pause/resume orchestration for the hosted workload
//!
//! Reconciliation of the HostedCluster and its NodePools is suspended through
//! `spec.pausedUntil` while volume data is captured, and restored afterwards.
//! Every update is a read-modify-write guarded by the object's resource
//! version and retried on conflict; see [`retry_on_conflict`].
//!
//! Per managed object the orchestrator tracks
//! `Unknown -> Paused -> Unpausing -> Resumed`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;

use super::client::HostedClusterClient;
use super::poll::{poll_until, PollSettings, Probe, ProbeStatus};
use super::retry::{retry_on_conflict, RetryConfig};
use super::watched::ObjectIdentity;

/// Value written to pause reconciliation
pub const PAUSED: &str = "true";

/// Value written to resume reconciliation
pub const RESUMED: &str = "false";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManagedKind {
    HostedCluster,
    NodePool,
}

impl std::fmt::Display for ManagedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagedKind::HostedCluster => write!(f, "HostedCluster"),
            ManagedKind::NodePool => write!(f, "NodePool"),
        }
    }
}

/// A pausable object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagedObject {
    pub kind: ManagedKind,
    pub namespace: String,
    pub name: String,
}

impl ManagedObject {
    pub fn hosted_cluster(namespace: &str, name: &str) -> Self {
        Self {
            kind: ManagedKind::HostedCluster,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn node_pool(namespace: &str, name: &str) -> Self {
        Self {
            kind: ManagedKind::NodePool,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for ManagedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// The pause field as read, with the version it was read at
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PauseField {
    pub value: Option<String>,
    pub resource_version: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PauseState {
    #[default]
    Unknown,
    Paused,
    Unpausing,
    Resumed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PauseTarget {
    Pause,
    Resume,
}

impl PauseTarget {
    pub fn value(self) -> &'static str {
        match self {
            PauseTarget::Pause => PAUSED,
            PauseTarget::Resume => RESUMED,
        }
    }
}

/// Set the pause field of `object` to `value` unless it already holds it.
///
/// Re-reads the object on every attempt. Returns whether a write happened.
pub async fn apply_pause_value<C>(
    client: &C,
    retry: &RetryConfig,
    object: &ManagedObject,
    value: &str,
) -> Result<bool>
where
    C: HostedClusterClient + ?Sized,
{
    let operation = format!("set pausedUntil={value} on {object}");
    retry_on_conflict(retry, &operation, || async move {
        let observed = client.read_pause(object).await?;
        if observed.value.as_deref() == Some(value) {
            debug!(object = %object, value, "Pause field already at target");
            return Ok(false);
        }
        client.write_pause(object, &observed, value).await?;
        Ok(true)
    })
    .await
}

/// Waits for the control plane to report the hosted cluster's pause value
struct PropagationProbe<'a, C: ?Sized> {
    client: &'a C,
    control_plane: &'a ObjectIdentity,
    target: &'a str,
}

#[async_trait]
impl<C> Probe for PropagationProbe<'_, C>
where
    C: HostedClusterClient + ?Sized,
{
    fn describe(&self) -> String {
        format!(
            "HostedControlPlane {} pausedUntil={}",
            self.control_plane, self.target
        )
    }

    async fn probe(&mut self) -> Result<ProbeStatus> {
        let Some(hcp) = self.client.control_plane(self.control_plane).await? else {
            return Ok(ProbeStatus::pending("control plane not found yet"));
        };
        let current = hcp.spec.paused_until;
        let detail = format!("pausedUntil={}", current.as_deref().unwrap_or("<unset>"));
        if current.as_deref() == Some(self.target) {
            Ok(ProbeStatus::done(detail))
        } else {
            Ok(ProbeStatus::pending(detail))
        }
    }
}

/// Drives the pause state machine of one hosted workload
#[derive(Debug)]
pub struct PauseOrchestrator {
    retry: RetryConfig,
    propagation: PollSettings,
    states: BTreeMap<ManagedObject, PauseState>,
}

impl PauseOrchestrator {
    pub fn new(retry: RetryConfig, propagation: PollSettings) -> Self {
        Self {
            retry,
            propagation,
            states: BTreeMap::new(),
        }
    }

    pub fn state(&self, object: &ManagedObject) -> PauseState {
        self.states.get(object).copied().unwrap_or_default()
    }

    /// Pause the hosted cluster, wait for the control plane to follow, then
    /// pause its node pools.
    ///
    /// Safe to call again after a partial failure: objects already at the
    /// target are left untouched.
    #[instrument(skip_all, fields(cluster = %cluster))]
    pub async fn pause<C>(
        &mut self,
        client: &C,
        cluster: &ManagedObject,
        control_plane: Option<&ObjectIdentity>,
    ) -> Result<()>
    where
        C: HostedClusterClient + ?Sized,
    {
        self.transition(client, cluster, PauseTarget::Pause).await?;

        match control_plane {
            Some(identity) => {
                let mut probe = PropagationProbe {
                    client,
                    control_plane: identity,
                    target: PAUSED,
                };
                poll_until(self.propagation, &mut probe).await?;
            }
            None => warn!("No HostedControlPlane known, skipping pause propagation wait"),
        }

        for pool in client.node_pools(cluster).await? {
            self.transition(client, &pool, PauseTarget::Pause).await?;
        }
        info!("Hosted workload paused");
        Ok(())
    }

    /// Resume the hosted cluster and its node pools
    #[instrument(skip_all, fields(cluster = %cluster))]
    pub async fn resume<C>(&mut self, client: &C, cluster: &ManagedObject) -> Result<()>
    where
        C: HostedClusterClient + ?Sized,
    {
        self.transition(client, cluster, PauseTarget::Resume).await?;
        for pool in client.node_pools(cluster).await? {
            self.transition(client, &pool, PauseTarget::Resume).await?;
        }
        info!("Hosted workload resumed");
        Ok(())
    }

    async fn transition<C>(
        &mut self,
        client: &C,
        object: &ManagedObject,
        target: PauseTarget,
    ) -> Result<()>
    where
        C: HostedClusterClient + ?Sized,
    {
        if target == PauseTarget::Resume {
            self.states.insert(object.clone(), PauseState::Unpausing);
        }
        let wrote = apply_pause_value(client, &self.retry, object, target.value())
            .await
            .map_err(|e| {
                warn!(object = %object, error = %e, "Pause field update failed");
                e
            })?;
        let next = match target {
            PauseTarget::Pause => PauseState::Paused,
            PauseTarget::Resume => PauseState::Resumed,
        };
        self.states.insert(object.clone(), next);
        info!(object = %object, value = target.value(), wrote, "Pause field at target");
        Ok(())
    }
}
