//! Resource completion checker
//!
//! One checker type serves all four watched kinds. Each call lists the kind in
//! its scope, drops objects from earlier attempts and objects belonging to
//! other backups, and classifies what remains:
//!
//! - a `Failed` object aborts the check with [`Error::BackupJobFailed`]
//! - `New` / `InProgress` objects mark the kind as started
//! - `Completed` objects are counted; the kind is finished when the count
//!   equals the job's expected units (3 in HA mode, otherwise 1)
//!
//! A kind with no relevant objects is finished vacuously when its objects
//! vanished after the kind had started, or when the checker allows it because
//! nothing upstream produced data for it. Otherwise an empty kind has simply
//! not started yet. Finished is sticky for the lifetime of the job.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};

use super::blacklist::BlacklistRegistry;
use super::client::ResourceLister;
use super::context::BackupJobContext;
use super::poll::{Probe, ProbeStatus};
use super::watched::{ListScope, Phase, WatchedKind, WatchedObject};

/// Per-kind `(started, finished)` pair; `finished` never reverts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompletionState {
    pub started: bool,
    pub finished: bool,
}

/// Everything one backup job remembers between checks
///
/// Owned by exactly one job; never shared between concurrent backups.
#[derive(Debug, Default)]
pub struct JobState {
    pub blacklist: BlacklistRegistry,
    completion: HashMap<WatchedKind, CompletionState>,
}

impl JobState {
    pub fn completion(&self, kind: WatchedKind) -> CompletionState {
        self.completion.get(&kind).copied().unwrap_or_default()
    }

    fn completion_mut(&mut self, kind: WatchedKind) -> &mut CompletionState {
        self.completion.entry(kind).or_default()
    }
}

/// Why a check reported finished
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishReason {
    /// The completed count reached the expected units
    Threshold,
    /// No relevant object was ever seen for this kind
    NotParticipating,
    /// Relevant objects disappeared after the kind had started
    Vanished,
    /// Finished on an earlier call
    Cached,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckOutcome {
    pub kind: WatchedKind,
    pub started: bool,
    pub finished: bool,
    pub completed: usize,
    pub pending: usize,
    pub expected: usize,
    pub reason: Option<FinishReason>,
}

impl std::fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}/{} completed, {} pending, started={}, finished={}",
            self.kind, self.completed, self.expected, self.pending, self.started, self.finished
        )
    }
}

/// Counts over the relevant objects of one listing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    pub relevant: usize,
    pub completed: usize,
    pub pending: usize,
}

/// Classify a listing for `kind` against the job context and blacklist.
///
/// Fails on the first relevant object in `Failed` phase.
pub fn classify(
    kind: WatchedKind,
    ctx: &BackupJobContext,
    blacklist: &BlacklistRegistry,
    listing: &[WatchedObject],
) -> Result<Tally> {
    let mut tally = Tally::default();
    for obj in listing {
        if obj.kind != kind || blacklist.is_blacklisted(kind, &obj.identity) {
            continue;
        }
        if kind.scope() == ListScope::Cluster
            && !obj
                .ref_namespace
                .as_deref()
                .is_some_and(|ns| ctx.includes_namespace(ns))
        {
            continue;
        }
        if !obj.belongs_to_backup(&ctx.backup_name) {
            continue;
        }

        tally.relevant += 1;
        match obj.phase {
            Phase::Failed => {
                return Err(Error::BackupJobFailed {
                    kind,
                    name: obj.identity.to_string(),
                    phase: obj.phase.to_string(),
                    message: obj.message.clone(),
                })
            }
            Phase::New | Phase::InProgress => tally.pending += 1,
            Phase::Completed => tally.completed += 1,
        }
    }
    Ok(tally)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceChecker {
    kind: WatchedKind,
    vacuous_finish: bool,
}

impl ResourceChecker {
    pub fn new(kind: WatchedKind) -> Self {
        Self {
            kind,
            vacuous_finish: true,
        }
    }

    /// Whether an empty listing of a kind that never started counts as finished.
    ///
    /// Must be off for a stage whose objects are created only after an
    /// upstream stage produced data.
    pub fn with_vacuous_finish(mut self, allowed: bool) -> Self {
        self.vacuous_finish = allowed;
        self
    }

    pub fn kind(&self) -> WatchedKind {
        self.kind
    }

    /// Build the kind's blacklist from a fresh listing unless it already exists.
    pub async fn seed_blacklist<L>(
        &self,
        lister: &L,
        ctx: &BackupJobContext,
        state: &mut JobState,
    ) -> Result<()>
    where
        L: ResourceLister + ?Sized,
    {
        if state.blacklist.is_built(self.kind) {
            return Ok(());
        }
        let listing = self.list_in_scope(lister, ctx).await?;
        self.record_leftovers(state, &listing);
        Ok(())
    }

    fn record_leftovers(&self, state: &mut JobState, listing: &[WatchedObject]) {
        if state.blacklist.record_initial(self.kind, listing) {
            let skipped = state.blacklist.len(self.kind);
            if skipped > 0 {
                info!(kind = %self.kind, skipped, "Ignoring objects completed by an earlier backup attempt");
            }
        }
    }

    async fn list_in_scope<L>(&self, lister: &L, ctx: &BackupJobContext) -> Result<Vec<WatchedObject>>
    where
        L: ResourceLister + ?Sized,
    {
        match self.kind.scope() {
            ListScope::Cluster => lister.list(self.kind, None).await,
            ListScope::BackupNamespace => {
                lister.list(self.kind, Some(&ctx.backup_namespace)).await
            }
            ListScope::IncludedNamespaces => {
                let listings = futures::future::try_join_all(
                    ctx.included_namespaces
                        .iter()
                        .map(|ns| lister.list(self.kind, Some(ns.as_str()))),
                )
                .await?;
                Ok(listings.into_iter().flatten().collect())
            }
        }
    }

    /// One list-and-classify pass.
    #[instrument(skip_all, fields(kind = %self.kind, backup = %ctx.backup_name))]
    pub async fn check<L>(
        &self,
        lister: &L,
        ctx: &BackupJobContext,
        state: &mut JobState,
    ) -> Result<CheckOutcome>
    where
        L: ResourceLister + ?Sized,
    {
        let expected = ctx.expected_units();
        let current = state.completion(self.kind);
        if current.finished {
            return Ok(CheckOutcome {
                kind: self.kind,
                started: current.started,
                finished: true,
                completed: expected,
                pending: 0,
                expected,
                reason: Some(FinishReason::Cached),
            });
        }

        let listing = self.list_in_scope(lister, ctx).await?;
        self.record_leftovers(state, &listing);

        let tally = match classify(self.kind, ctx, &state.blacklist, &listing) {
            Ok(tally) => tally,
            Err(e) => {
                warn!(error = %e, "Watched job failed");
                return Err(e);
            }
        };

        let entry = state.completion_mut(self.kind);
        let reason = if tally.relevant == 0 {
            if entry.started {
                Some(FinishReason::Vanished)
            } else if self.vacuous_finish {
                Some(FinishReason::NotParticipating)
            } else {
                None
            }
        } else {
            entry.started = true;
            (tally.completed == expected).then_some(FinishReason::Threshold)
        };
        entry.finished = reason.is_some();

        let outcome = CheckOutcome {
            kind: self.kind,
            started: entry.started,
            finished: entry.finished,
            completed: tally.completed,
            pending: tally.pending,
            expected,
            reason,
        };
        match reason {
            Some(FinishReason::Vanished) => {
                warn!("Watched objects disappeared after starting, treating kind as finished")
            }
            Some(FinishReason::NotParticipating) => {
                debug!("No relevant objects, kind does not take part in this backup")
            }
            Some(_) => info!(completed = tally.completed, expected, "Kind finished"),
            None if tally.relevant == 0 => debug!("No objects created yet"),
            None => debug!(outcome = %outcome, "Kind not finished"),
        }
        Ok(outcome)
    }
}

/// Adapter running a [`ResourceChecker`] under the poll engine
pub struct CheckerProbe<'a, L: ?Sized> {
    pub checker: ResourceChecker,
    pub lister: &'a L,
    pub ctx: &'a BackupJobContext,
    pub state: &'a mut JobState,
}

#[async_trait]
impl<L> Probe for CheckerProbe<'_, L>
where
    L: ResourceLister + ?Sized,
{
    fn describe(&self) -> String {
        format!(
            "{} completion for backup {}",
            self.checker.kind(),
            self.ctx.backup_name
        )
    }

    async fn probe(&mut self) -> Result<ProbeStatus> {
        let outcome = self.checker.check(self.lister, self.ctx, self.state).await?;
        Ok(ProbeStatus {
            done: outcome.finished,
            detail: outcome.to_string(),
        })
    }
}
