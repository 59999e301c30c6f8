//! Typed views of the resources the tracker reads and patches
//!
//! None of these CRDs are owned by this crate. The structs model just enough
//! of the upstream schemas to classify watched jobs and flip pause fields.

pub mod hypershift;
pub mod snapshot;
pub mod types;
pub mod velero;

pub use hypershift::{
    HostedCluster, HostedClusterSpec, HostedControlPlane, HostedControlPlaneSpec, NodePool,
    NodePoolSpec, HOSTED_CLUSTER_ANNOTATION,
};
pub use snapshot::{
    SnapshotError, SnapshotReference, SnapshotStatus, VolumeSnapshot, VolumeSnapshotContent,
    VolumeSnapshotContentSpec, VolumeSnapshotSpec,
};
pub use types::{AvailabilityPolicy, Platform, PlatformSpec};
pub use velero::{
    DataUpload, DataUploadSpec, JobStatus, PodVolumeBackup, PodVolumeBackupSpec,
    BACKUP_NAME_LABEL,
};
