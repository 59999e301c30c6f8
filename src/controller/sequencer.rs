//! Backup reconciliation sequencer
//!
//! Chains the completion checkers into the data path a backup actually takes
//! and reports overall completion once every stage is finished. A stage only
//! runs after the one before it has finished, so a slow or failing early stage
//! is never masked by a later stage that simply has nothing to show yet.
//!
//! The blacklists of all stages are seeded together before the first check,
//! since a later stage may already have objects of this attempt by the time
//! its checker first runs. A stage may finish empty only when the stage before
//! it never saw any object; otherwise it waits for its objects to appear.

use tracing::{debug, info, instrument};

use crate::crd::Platform;
use crate::error::Result;

use super::checker::{CheckOutcome, CheckerProbe, JobState, ResourceChecker};
use super::client::ResourceLister;
use super::context::BackupJobContext;
use super::poll::{poll_until, PollSettings};
use super::watched::WatchedKind;

/// The data path volume data takes to durable storage
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataMoverChain {
    /// Snapshot, then async upload of the snapshot data
    Standard,
    /// Snapshots are the durable copy; nothing is uploaded
    SnapshotOnly,
    /// Node-agent file-system backup of the volumes
    FileSystem,
}

impl DataMoverChain {
    pub fn for_job(ctx: &BackupJobContext) -> Self {
        if ctx.fs_backup {
            DataMoverChain::FileSystem
        } else if ctx.platform == Platform::Azure {
            DataMoverChain::SnapshotOnly
        } else {
            DataMoverChain::Standard
        }
    }

    pub fn stages(self) -> &'static [WatchedKind] {
        match self {
            DataMoverChain::Standard => &[
                WatchedKind::VolumeSnapshotContent,
                WatchedKind::VolumeSnapshot,
                WatchedKind::DataUpload,
            ],
            DataMoverChain::SnapshotOnly => &[
                WatchedKind::VolumeSnapshotContent,
                WatchedKind::VolumeSnapshot,
            ],
            DataMoverChain::FileSystem => &[WatchedKind::PodVolumeBackup],
        }
    }
}

impl std::fmt::Display for DataMoverChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataMoverChain::Standard => write!(f, "Standard"),
            DataMoverChain::SnapshotOnly => write!(f, "SnapshotOnly"),
            DataMoverChain::FileSystem => write!(f, "FileSystem"),
        }
    }
}

#[derive(Debug)]
pub struct BackupSequencer {
    chain: DataMoverChain,
    finished: bool,
}

impl BackupSequencer {
    pub fn new(chain: DataMoverChain) -> Self {
        Self {
            chain,
            finished: false,
        }
    }

    pub fn chain(&self) -> DataMoverChain {
        self.chain
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Seed the blacklist of every stage that does not have one yet.
    pub async fn seed_blacklists<L>(
        &self,
        lister: &L,
        ctx: &BackupJobContext,
        state: &mut JobState,
    ) -> Result<()>
    where
        L: ResourceLister + ?Sized,
    {
        for &kind in self.chain.stages() {
            ResourceChecker::new(kind)
                .seed_blacklist(lister, ctx, state)
                .await?;
        }
        Ok(())
    }

    /// Checker for stage `index`, allowed to finish empty only when the
    /// previous stage never started.
    fn stage_checker(&self, index: usize, state: &JobState) -> ResourceChecker {
        let stages = self.chain.stages();
        let upstream_empty = index
            .checked_sub(1)
            .map_or(true, |prev| !state.completion(stages[prev]).started);
        ResourceChecker::new(stages[index]).with_vacuous_finish(upstream_empty)
    }

    /// One non-blocking pass over the chain.
    ///
    /// Returns the outcomes of the stages that ran; stops at the first stage
    /// that is not finished.
    #[instrument(skip_all, fields(chain = %self.chain, backup = %ctx.backup_name))]
    pub async fn check_once<L>(
        &mut self,
        lister: &L,
        ctx: &BackupJobContext,
        state: &mut JobState,
    ) -> Result<Vec<CheckOutcome>>
    where
        L: ResourceLister + ?Sized,
    {
        let mut outcomes = Vec::new();
        if self.finished {
            return Ok(outcomes);
        }
        self.seed_blacklists(lister, ctx, state).await?;
        for index in 0..self.chain.stages().len() {
            let checker = self.stage_checker(index, state);
            let outcome = checker.check(lister, ctx, state).await?;
            let finished = outcome.finished;
            outcomes.push(outcome);
            if !finished {
                debug!(stage = %checker.kind(), "Stage not finished, skipping later stages");
                return Ok(outcomes);
            }
        }
        self.finished = true;
        info!("All data-movement stages finished");
        Ok(outcomes)
    }

    /// Poll each stage in order until it finishes, failing on the first
    /// stage error or blown deadline.
    #[instrument(skip_all, fields(chain = %self.chain, backup = %ctx.backup_name))]
    pub async fn wait_until_finished<L>(
        &mut self,
        lister: &L,
        ctx: &BackupJobContext,
        state: &mut JobState,
        settings: PollSettings,
    ) -> Result<()>
    where
        L: ResourceLister + ?Sized,
    {
        if self.finished {
            return Ok(());
        }
        self.seed_blacklists(lister, ctx, state).await?;
        for index in 0..self.chain.stages().len() {
            let checker = self.stage_checker(index, state);
            let mut probe = CheckerProbe {
                checker,
                lister,
                ctx,
                state: &mut *state,
            };
            let report = poll_until(settings, &mut probe).await?;
            info!(stage = %checker.kind(), attempts = report.attempts, "Stage finished");
        }
        self.finished = true;
        info!("All data-movement stages finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::{FakeCluster, WatchedBuilder};
    use crate::controller::watched::Phase;
    use crate::error::Error;
    use std::time::Duration;

    const NS: &str = "openshift-adp";
    const HCP_NS: &str = "clusters-prod";

    fn ctx() -> BackupJobContext {
        BackupJobContext::new("nightly", NS, [HCP_NS])
    }

    fn content(name: &str, phase: Phase) -> crate::controller::WatchedObject {
        WatchedBuilder::new(WatchedKind::VolumeSnapshotContent, name)
            .ref_namespace(HCP_NS)
            .phase(phase)
            .build()
    }

    #[test]
    fn test_chain_selection() {
        assert_eq!(DataMoverChain::for_job(&ctx()), DataMoverChain::Standard);
        assert_eq!(
            DataMoverChain::for_job(&ctx().with_platform(Platform::Azure)),
            DataMoverChain::SnapshotOnly
        );
        assert_eq!(
            DataMoverChain::for_job(&ctx().with_platform(Platform::Azure).with_fs_backup(true)),
            DataMoverChain::FileSystem
        );
        assert!(!DataMoverChain::SnapshotOnly
            .stages()
            .contains(&WatchedKind::DataUpload));
    }

    fn snapshot(name: &str, phase: Phase) -> crate::controller::WatchedObject {
        WatchedBuilder::new(WatchedKind::VolumeSnapshot, name)
            .namespace(HCP_NS)
            .phase(phase)
            .build()
    }

    fn upload(name: &str, phase: Phase) -> crate::controller::WatchedObject {
        WatchedBuilder::new(WatchedKind::DataUpload, name)
            .namespace(NS)
            .phase(phase)
            .build()
    }

    #[tokio::test]
    async fn test_unfinished_stage_short_circuits() {
        let cluster = FakeCluster::default();
        cluster.put(content("nightly-snapcontent-0", Phase::InProgress));
        let mut state = JobState::default();
        let mut sequencer = BackupSequencer::new(DataMoverChain::Standard);

        let outcomes = sequencer.check_once(&cluster, &ctx(), &mut state).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(!sequencer.is_finished());

        // Later stages were listed once to seed their blacklists, never checked.
        sequencer.check_once(&cluster, &ctx(), &mut state).await.unwrap();
        assert_eq!(cluster.list_calls(WatchedKind::VolumeSnapshot), 1);
        assert_eq!(cluster.list_calls(WatchedKind::DataUpload), 1);
        assert_eq!(state.completion(WatchedKind::VolumeSnapshot), Default::default());
    }

    #[tokio::test]
    async fn test_finished_chain_is_cached() {
        let cluster = FakeCluster::default();
        let mut state = JobState::default();
        let mut sequencer = BackupSequencer::new(DataMoverChain::SnapshotOnly);

        sequencer.check_once(&cluster, &ctx(), &mut state).await.unwrap();
        assert!(sequencer.is_finished());
        let calls = cluster.list_calls(WatchedKind::VolumeSnapshotContent);

        let outcomes = sequencer.check_once(&cluster, &ctx(), &mut state).await.unwrap();
        assert!(outcomes.is_empty());
        assert_eq!(cluster.list_calls(WatchedKind::VolumeSnapshotContent), calls);
    }

    #[tokio::test]
    async fn test_failed_stage_is_fatal() {
        let cluster = FakeCluster::default();
        cluster.put(content("nightly-snapcontent-0", Phase::Failed));
        let mut state = JobState::default();
        let mut sequencer = BackupSequencer::new(DataMoverChain::Standard);

        let err = sequencer
            .check_once(&cluster, &ctx(), &mut state)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::BackupJobFailed {
                kind: WatchedKind::VolumeSnapshotContent,
                ..
            }
        ));
        assert!(!state.completion(WatchedKind::VolumeSnapshot).started);
    }

    #[tokio::test]
    async fn test_partly_completed_later_stage_still_counts() {
        let cluster = FakeCluster::default();
        let ctx = ctx().with_ha(true);
        let mut state = JobState::default();
        let mut sequencer = BackupSequencer::new(DataMoverChain::SnapshotOnly);

        for i in 0..3 {
            cluster.put(content(&format!("nightly-snapcontent-{i}"), Phase::InProgress));
        }
        sequencer.check_once(&cluster, &ctx, &mut state).await.unwrap();

        // Snapshots finish while the contents are still being evaluated.
        for i in 0..3 {
            cluster.put(content(&format!("nightly-snapcontent-{i}"), Phase::Completed));
        }
        cluster.put(snapshot("nightly-etcd-0", Phase::Completed));
        cluster.put(snapshot("nightly-etcd-1", Phase::Completed));
        cluster.put(snapshot("nightly-etcd-2", Phase::InProgress));
        sequencer.check_once(&cluster, &ctx, &mut state).await.unwrap();
        assert!(!sequencer.is_finished());
        assert_eq!(state.blacklist.len(WatchedKind::VolumeSnapshot), 0);

        cluster.put(snapshot("nightly-etcd-2", Phase::Completed));
        let outcomes = sequencer.check_once(&cluster, &ctx, &mut state).await.unwrap();
        assert!(sequencer.is_finished());
        assert_eq!(outcomes.last().map(|o| o.completed), Some(3));
    }

    #[tokio::test]
    async fn test_stage_after_data_waits_for_its_objects() {
        let cluster = FakeCluster::default();
        let mut state = JobState::default();
        let mut sequencer = BackupSequencer::new(DataMoverChain::Standard);

        cluster.put(content("nightly-snapcontent-0", Phase::InProgress));
        cluster.put(snapshot("nightly-etcd-0", Phase::InProgress));
        sequencer.check_once(&cluster, &ctx(), &mut state).await.unwrap();

        cluster.put(content("nightly-snapcontent-0", Phase::Completed));
        cluster.put(snapshot("nightly-etcd-0", Phase::Completed));
        let outcomes = sequencer.check_once(&cluster, &ctx(), &mut state).await.unwrap();
        assert!(!sequencer.is_finished());
        let last = outcomes.last().unwrap();
        assert_eq!(last.kind, WatchedKind::DataUpload);
        assert!(!last.started);
        assert!(!last.finished);

        cluster.put(upload("nightly-upload-0", Phase::Completed));
        sequencer.check_once(&cluster, &ctx(), &mut state).await.unwrap();
        assert!(sequencer.is_finished());
    }

    #[tokio::test]
    async fn test_empty_chain_finishes_vacuously() {
        let cluster = FakeCluster::default();
        let mut state = JobState::default();
        let mut sequencer = BackupSequencer::new(DataMoverChain::Standard);

        let outcomes = sequencer.check_once(&cluster, &ctx(), &mut state).await.unwrap();
        assert!(sequencer.is_finished());
        assert!(outcomes
            .iter()
            .all(|o| o.reason == Some(crate::controller::FinishReason::NotParticipating)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_on_stuck_stage() {
        let cluster = FakeCluster::default();
        cluster.put(content("nightly-snapcontent-0", Phase::InProgress));
        let mut state = JobState::default();
        let mut sequencer = BackupSequencer::new(DataMoverChain::Standard);
        let settings = PollSettings::new(Duration::from_secs(30), Duration::from_secs(10));

        let err = sequencer
            .wait_until_finished(&cluster, &ctx(), &mut state, settings)
            .await
            .unwrap_err();
        match err {
            Error::PollTimeout { last_state, .. } => {
                assert!(last_state.starts_with("VolumeSnapshotContent: 0/1 completed"))
            }
            other => panic!("expected PollTimeout, got {other:?}"),
        }
        assert!(!sequencer.is_finished());
        assert!(!state.completion(WatchedKind::DataUpload).started);
    }
}
