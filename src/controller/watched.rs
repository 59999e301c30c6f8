//! Kind-polymorphic view of the objects the completion checker watches
//!
//! Every watched resource, whatever its concrete CRD, is reduced to a
//! [`WatchedObject`]: an identity, the labels used for backup correlation, an
//! optional reference namespace and a [`Phase`].

use std::collections::BTreeMap;

use kube::ResourceExt;
use sha2::{Digest, Sha256};

use crate::crd::{
    DataUpload, JobStatus, PodVolumeBackup, SnapshotStatus, VolumeSnapshot,
    VolumeSnapshotContent, BACKUP_NAME_LABEL,
};

/// Kubernetes label values are capped at 63 characters
const LABEL_VALUE_MAX_LEN: usize = 63;

/// Hex characters of the name hash appended to a shortened label value
const LABEL_HASH_LEN: usize = 6;

/// The four resource kinds whose completion gates the resume
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WatchedKind {
    VolumeSnapshotContent,
    VolumeSnapshot,
    DataUpload,
    PodVolumeBackup,
}

/// Where a kind is listed from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListScope {
    /// Cluster-wide, narrowed by the object's reference namespace
    Cluster,
    /// Each of the backup's included namespaces
    IncludedNamespaces,
    /// The namespace the backup object itself lives in
    BackupNamespace,
}

impl WatchedKind {
    pub fn scope(self) -> ListScope {
        match self {
            WatchedKind::VolumeSnapshotContent => ListScope::Cluster,
            WatchedKind::VolumeSnapshot => ListScope::IncludedNamespaces,
            WatchedKind::DataUpload | WatchedKind::PodVolumeBackup => ListScope::BackupNamespace,
        }
    }
}

impl std::fmt::Display for WatchedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchedKind::VolumeSnapshotContent => write!(f, "VolumeSnapshotContent"),
            WatchedKind::VolumeSnapshot => write!(f, "VolumeSnapshot"),
            WatchedKind::DataUpload => write!(f, "DataUpload"),
            WatchedKind::PodVolumeBackup => write!(f, "PodVolumeBackup"),
        }
    }
}

/// Normalised progress of a watched object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    New,
    InProgress,
    Completed,
    Failed,
}

impl Phase {
    /// Map a velero job phase string onto the normalised phases
    ///
    /// Intermediate phases (`Accepted`, `Prepared`, `Canceling`) and anything
    /// unrecognised count as in progress; `Canceled` is terminal.
    pub fn from_job_phase(phase: Option<&str>) -> Self {
        match phase.unwrap_or_default() {
            "" | "New" => Phase::New,
            "Completed" => Phase::Completed,
            "Failed" | "Canceled" => Phase::Failed,
            _ => Phase::InProgress,
        }
    }

    /// Map the nullable `readyToUse` flag of a snapshot
    pub fn from_ready_flag(ready: Option<bool>) -> Self {
        match ready {
            None => Phase::New,
            Some(false) => Phase::InProgress,
            Some(true) => Phase::Completed,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::New => write!(f, "New"),
            Phase::InProgress => write!(f, "InProgress"),
            Phase::Completed => write!(f, "Completed"),
            Phase::Failed => write!(f, "Failed"),
        }
    }
}

/// Name plus namespace (absent for cluster-scoped objects)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectIdentity {
    pub name: String,
    pub namespace: Option<String>,
}

impl ObjectIdentity {
    pub fn new(name: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.map(str::to_string),
        }
    }

    pub fn namespaced(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }
}

impl std::fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WatchedObject {
    pub kind: WatchedKind,
    pub identity: ObjectIdentity,
    pub labels: BTreeMap<String, String>,
    /// Namespace of the object this one points at (snapshot contents only)
    pub ref_namespace: Option<String>,
    pub phase: Phase,
    /// Failure detail reported by the owning controller, if any
    pub message: Option<String>,
}

impl WatchedObject {
    /// True when the object was produced for `backup_name`
    ///
    /// Velero labels what it creates with the backup name. Unlabelled
    /// objects fall back to the `<backup>-` prefix of `generateName`.
    pub fn belongs_to_backup(&self, backup_name: &str) -> bool {
        match self.labels.get(BACKUP_NAME_LABEL) {
            Some(value) => *value == backup_label_value(backup_name),
            None => self.identity.name.starts_with(&format!("{backup_name}-")),
        }
    }
}

/// The value velero writes into [`BACKUP_NAME_LABEL`] for a backup name
///
/// Names that do not fit in a label value are cut to 57 characters and
/// suffixed with the first six hex digits of their SHA-256.
pub fn backup_label_value(backup_name: &str) -> String {
    if backup_name.len() <= LABEL_VALUE_MAX_LEN {
        return backup_name.to_string();
    }
    let digest = hex::encode(Sha256::digest(backup_name.as_bytes()));
    let keep = LABEL_VALUE_MAX_LEN - LABEL_HASH_LEN;
    let cut = (0..=keep)
        .rev()
        .find(|&i| backup_name.is_char_boundary(i))
        .unwrap_or(0);
    format!("{}{}", &backup_name[..cut], &digest[..LABEL_HASH_LEN])
}

fn snapshot_phase(status: Option<&SnapshotStatus>) -> (Phase, Option<String>) {
    let Some(status) = status else {
        return (Phase::New, None);
    };
    if let Some(error) = &status.error {
        let message = error
            .message
            .clone()
            .unwrap_or_else(|| "snapshot controller reported an error".to_string());
        return (Phase::Failed, Some(message));
    }
    (Phase::from_ready_flag(status.ready_to_use), None)
}

fn job_phase(status: Option<&JobStatus>) -> (Phase, Option<String>) {
    let phase = Phase::from_job_phase(status.and_then(|s| s.phase.as_deref()));
    (phase, status.and_then(|s| s.message.clone()))
}

impl From<&VolumeSnapshotContent> for WatchedObject {
    fn from(content: &VolumeSnapshotContent) -> Self {
        let (phase, message) = snapshot_phase(content.status.as_ref());
        WatchedObject {
            kind: WatchedKind::VolumeSnapshotContent,
            identity: ObjectIdentity::new(content.name_any(), None),
            labels: content.labels().clone(),
            ref_namespace: content.spec.volume_snapshot_ref.namespace.clone(),
            phase,
            message,
        }
    }
}

impl From<&VolumeSnapshot> for WatchedObject {
    fn from(snapshot: &VolumeSnapshot) -> Self {
        let (phase, message) = snapshot_phase(snapshot.status.as_ref());
        WatchedObject {
            kind: WatchedKind::VolumeSnapshot,
            identity: ObjectIdentity::new(snapshot.name_any(), snapshot.namespace().as_deref()),
            labels: snapshot.labels().clone(),
            ref_namespace: None,
            phase,
            message,
        }
    }
}

impl From<&DataUpload> for WatchedObject {
    fn from(upload: &DataUpload) -> Self {
        let (phase, message) = job_phase(upload.status.as_ref());
        WatchedObject {
            kind: WatchedKind::DataUpload,
            identity: ObjectIdentity::new(upload.name_any(), upload.namespace().as_deref()),
            labels: upload.labels().clone(),
            ref_namespace: upload.spec.source_namespace.clone(),
            phase,
            message,
        }
    }
}

impl From<&PodVolumeBackup> for WatchedObject {
    fn from(backup: &PodVolumeBackup) -> Self {
        let (phase, message) = job_phase(backup.status.as_ref());
        WatchedObject {
            kind: WatchedKind::PodVolumeBackup,
            identity: ObjectIdentity::new(backup.name_any(), backup.namespace().as_deref()),
            labels: backup.labels().clone(),
            ref_namespace: None,
            phase,
            message,
        }
    }
}
