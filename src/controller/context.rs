//! Per-backup job context
//!
//! Identifies one backup operation and the hosted workload it captures. It is
//! built once, when the tracker first sees the backup's trigger item, and is
//! never persisted.

use std::collections::BTreeSet;

use kube::ResourceExt;

use crate::crd::{HostedControlPlane, Platform};
use crate::error::{Error, Result};

use super::pause::ManagedObject;
use super::watched::ObjectIdentity;

/// Units of work per kind when the control plane runs three replicas
const HA_EXPECTED_UNITS: usize = 3;

#[derive(Clone, Debug)]
pub struct BackupJobContext {
    pub backup_name: String,
    /// Namespace of the backup object; velero creates its jobs here
    pub backup_namespace: String,
    pub included_namespaces: BTreeSet<String>,
    pub ha: bool,
    /// Migrations leave the workload paused after the backup
    pub migration: bool,
    /// Volumes go through node-agent file-system backup instead of snapshots
    pub fs_backup: bool,
    pub platform: Platform,
    pub hosted_cluster: Option<ManagedObject>,
    pub control_plane: Option<ObjectIdentity>,
}

impl BackupJobContext {
    pub fn new(
        backup_name: impl Into<String>,
        backup_namespace: impl Into<String>,
        included_namespaces: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            backup_name: backup_name.into(),
            backup_namespace: backup_namespace.into(),
            included_namespaces: included_namespaces.into_iter().map(Into::into).collect(),
            ha: false,
            migration: false,
            fs_backup: false,
            platform: Platform::default(),
            hosted_cluster: None,
            control_plane: None,
        }
    }

    pub fn with_ha(mut self, ha: bool) -> Self {
        self.ha = ha;
        self
    }

    pub fn with_fs_backup(mut self, fs_backup: bool) -> Self {
        self.fs_backup = fs_backup;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_hosted_cluster(mut self, namespace: &str, name: &str) -> Self {
        self.hosted_cluster = Some(ManagedObject::hosted_cluster(namespace, name));
        self
    }

    pub fn with_control_plane(mut self, namespace: &str, name: &str) -> Self {
        self.control_plane = Some(ObjectIdentity::namespaced(name, namespace));
        self
    }

    /// Fill in HA mode, platform and the workload identities from the
    /// hosted control plane found in one of the included namespaces.
    pub fn apply_control_plane(mut self, hcp: &HostedControlPlane) -> Result<Self> {
        let namespace = hcp.namespace().ok_or_else(|| {
            Error::DiscoveryError(format!("HostedControlPlane {} has no namespace", hcp.name_any()))
        })?;
        let (hc_namespace, hc_name) = hcp.hosted_cluster_ref().ok_or_else(|| {
            Error::DiscoveryError(format!(
                "HostedControlPlane {}/{} does not name its HostedCluster",
                namespace,
                hcp.name_any()
            ))
        })?;

        self.ha = hcp.is_highly_available();
        self.platform = hcp
            .spec
            .platform
            .as_ref()
            .map(|p| p.type_)
            .unwrap_or_default();
        self.control_plane = Some(ObjectIdentity::namespaced(hcp.name_any(), namespace));
        self.hosted_cluster = Some(ManagedObject::hosted_cluster(&hc_namespace, &hc_name));
        Ok(self)
    }

    /// Units of work each watched kind must complete: one per control-plane replica
    pub fn expected_units(&self) -> usize {
        if self.ha {
            HA_EXPECTED_UNITS
        } else {
            1
        }
    }

    pub fn includes_namespace(&self, namespace: &str) -> bool {
        self.included_namespaces.contains(namespace)
    }
}
