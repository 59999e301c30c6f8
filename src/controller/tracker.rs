//! Per-backup tracker
//!
//! [`BackupTracker`] is the object the backup framework drives for one backup
//! job. It is handed every item the backup captures:
//!
//! - control-plane items (`HostedControlPlane`, `HostedCluster`, `NodePool`)
//!   make sure the hosted workload is paused before its data is copied
//! - any other item in an included namespace triggers one non-blocking pass of
//!   the data-movement checks; when they report finished the workload is
//!   resumed
//!
//! [`BackupTracker::finalize`] blocks until data movement is finished and
//! then resumes. Migrations never resume.

use tracing::{debug, info, instrument, warn};

use crate::config::TrackerConfig;
use crate::error::{Error, Result};

use super::checker::{CheckOutcome, JobState};
use super::client::{HostedClusterClient, ResourceLister};
use super::context::BackupJobContext;
use super::pause::{ManagedObject, PauseOrchestrator, PauseState};
use super::sequencer::{BackupSequencer, DataMoverChain};

const CONTROL_PLANE_KINDS: [&str; 3] = ["HostedControlPlane", "HostedCluster", "NodePool"];

/// One object captured by the backup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupItem {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl BackupItem {
    pub fn new(kind: &str, namespace: Option<&str>, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    fn is_control_plane(&self) -> bool {
        CONTROL_PLANE_KINDS.contains(&self.kind.as_str())
    }
}

impl std::fmt::Display for BackupItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// What [`BackupTracker::execute`] did with an item
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemAction {
    /// The workload is paused
    Paused,
    /// Data movement is still running
    Pending,
    /// Data movement finished and the workload was resumed
    Resumed,
    /// Data movement finished; the workload stays paused for migration
    LeftPaused,
    /// Nothing to do for this item
    Ignored,
}

pub struct BackupTracker {
    ctx: BackupJobContext,
    config: TrackerConfig,
    state: JobState,
    sequencer: BackupSequencer,
    orchestrator: PauseOrchestrator,
    paused: bool,
    resumed: bool,
}

impl BackupTracker {
    pub fn new(mut ctx: BackupJobContext, config: TrackerConfig) -> Self {
        ctx.migration |= config.migration;
        let chain = DataMoverChain::for_job(&ctx);
        info!(
            backup = %ctx.backup_name,
            chain = %chain,
            ha = ctx.ha,
            migration = ctx.migration,
            "Tracking backup"
        );
        Self {
            sequencer: BackupSequencer::new(chain),
            orchestrator: PauseOrchestrator::new(config.retry.clone(), config.propagation),
            state: JobState::default(),
            paused: false,
            resumed: false,
            ctx,
            config,
        }
    }

    /// Complete `ctx` from the first HostedControlPlane found in the included
    /// namespaces and build a tracker for it.
    #[instrument(skip_all, fields(backup = %ctx.backup_name))]
    pub async fn discover<C>(client: &C, ctx: BackupJobContext, config: TrackerConfig) -> Result<Self>
    where
        C: HostedClusterClient + ?Sized,
    {
        for namespace in &ctx.included_namespaces {
            let control_planes = client.control_planes_in(namespace).await?;
            let Some(hcp) = control_planes.first() else {
                continue;
            };
            if control_planes.len() > 1 {
                warn!(namespace = %namespace, count = control_planes.len(), "Several control planes, using the first");
            }
            let ctx = ctx.clone().apply_control_plane(hcp)?;
            return Ok(Self::new(ctx, config));
        }
        Err(Error::DiscoveryError(format!(
            "no HostedControlPlane in namespaces {:?}",
            ctx.included_namespaces
        )))
    }

    pub fn context(&self) -> &BackupJobContext {
        &self.ctx
    }

    pub fn job_state(&self) -> &JobState {
        &self.state
    }

    pub fn chain(&self) -> DataMoverChain {
        self.sequencer.chain()
    }

    pub fn is_finished(&self) -> bool {
        self.sequencer.is_finished()
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    pub fn pause_state(&self, object: &ManagedObject) -> PauseState {
        self.orchestrator.state(object)
    }

    /// Handle one backup item.
    #[instrument(skip_all, fields(backup = %self.ctx.backup_name, item = %item))]
    pub async fn execute<C>(&mut self, client: &C, item: &BackupItem) -> Result<ItemAction>
    where
        C: ResourceLister + HostedClusterClient + ?Sized,
    {
        if item.is_control_plane() {
            self.ensure_paused(client).await?;
            return Ok(ItemAction::Paused);
        }

        let in_scope = item
            .namespace
            .as_deref()
            .is_some_and(|ns| self.ctx.includes_namespace(ns));
        if !in_scope {
            return Ok(ItemAction::Ignored);
        }
        if !self.sequencer.is_finished() {
            let outcomes = self
                .sequencer
                .check_once(client, &self.ctx, &mut self.state)
                .await?;
            if !self.sequencer.is_finished() {
                if let Some(last) = outcomes.last() {
                    debug!(outcome = %last, "Data movement still running");
                }
                return Ok(ItemAction::Pending);
            }
        }
        // A resume that failed on an earlier item is retried here.
        self.resume_once(client).await?;
        Ok(self.finished_action())
    }

    /// One non-blocking pass over the data-movement checks that leaves the
    /// pause fields alone.
    pub async fn check<L>(&mut self, lister: &L) -> Result<Vec<CheckOutcome>>
    where
        L: ResourceLister + ?Sized,
    {
        self.sequencer
            .check_once(lister, &self.ctx, &mut self.state)
            .await
    }

    /// Block until data movement is finished, then resume the workload.
    #[instrument(skip_all, fields(backup = %self.ctx.backup_name))]
    pub async fn finalize<C>(&mut self, client: &C) -> Result<ItemAction>
    where
        C: ResourceLister + HostedClusterClient + ?Sized,
    {
        self.sequencer
            .wait_until_finished(client, &self.ctx, &mut self.state, self.config.upload)
            .await?;
        self.resume_once(client).await?;
        Ok(self.finished_action())
    }

    fn finished_action(&self) -> ItemAction {
        if self.ctx.migration {
            ItemAction::LeftPaused
        } else {
            ItemAction::Resumed
        }
    }

    fn hosted_cluster(&self) -> Result<ManagedObject> {
        self.ctx.hosted_cluster.clone().ok_or_else(|| {
            Error::DiscoveryError(format!(
                "backup {} has no HostedCluster to pause",
                self.ctx.backup_name
            ))
        })
    }

    /// Pause once per job; a failed attempt is repeated on the next item.
    ///
    /// Leftovers of earlier backups are recorded before the pause, while this
    /// job has not created any data-movement objects yet.
    pub async fn ensure_paused<C>(&mut self, client: &C) -> Result<()>
    where
        C: ResourceLister + HostedClusterClient + ?Sized,
    {
        if self.paused {
            return Ok(());
        }
        self.sequencer
            .seed_blacklists(client, &self.ctx, &mut self.state)
            .await?;
        let cluster = self.hosted_cluster()?;
        self.orchestrator
            .pause(client, &cluster, self.ctx.control_plane.as_ref())
            .await?;
        self.paused = true;
        Ok(())
    }

    async fn resume_once<C>(&mut self, client: &C) -> Result<()>
    where
        C: HostedClusterClient + ?Sized,
    {
        if self.resumed {
            return Ok(());
        }
        if self.ctx.migration {
            info!("Migration backup, leaving the hosted workload paused");
            return Ok(());
        }
        let cluster = self.hosted_cluster()?;
        self.orchestrator.resume(client, &cluster).await?;
        self.resumed = true;
        Ok(())
    }
}
