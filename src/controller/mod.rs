//! Backup completion tracking and pause orchestration
//!
//! This module contains the completion checkers for the watched data-movement
//! kinds, the sequencer chaining them, the pause/resume orchestrator for the
//! hosted workload, and the per-backup tracker that ties them together.

pub mod blacklist;
pub mod checker;
pub mod client;
pub mod context;
pub mod pause;
pub mod poll;
pub mod retry;
pub mod sequencer;
#[cfg(test)]
mod testing;
pub mod tracker;
pub mod watched;

pub use blacklist::BlacklistRegistry;
pub use checker::{CheckOutcome, CompletionState, FinishReason, JobState, ResourceChecker};
pub use client::{HostedClusterClient, KubeClusterClient, ResourceLister};
pub use context::BackupJobContext;
pub use pause::{
    apply_pause_value, ManagedKind, ManagedObject, PauseOrchestrator, PauseState, PAUSED, RESUMED,
};
pub use poll::{poll_until, PollSettings, Probe, ProbeStatus};
pub use retry::{retry_on_conflict, RetryConfig};
pub use sequencer::{BackupSequencer, DataMoverChain};
pub use tracker::{BackupItem, BackupTracker, ItemAction};
pub use watched::{ObjectIdentity, Phase, WatchedKind, WatchedObject};
