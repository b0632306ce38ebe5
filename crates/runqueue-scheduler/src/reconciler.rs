//! Turns pipeline run events into admission decisions and records them.

use crate::{Admission, DroppedQueue, QueueManager, QueueResult};
use runqueue_core::{PipelineRun, QueueKey, RepoKey, Repository, ResourceStore, RunState};
use std::sync::Arc;
use tracing::{debug, info};

/// What an observed pipeline run asks of the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunAction {
    /// Nothing to track.
    Ignore,
    /// Release the run's slot and mark it completed.
    Finish(RepoKey),
    /// Queue the run and try to admit it.
    Admit(RepoKey),
}

impl RunAction {
    pub fn for_run(run: &PipelineRun) -> Self {
        let Some(repo) = run.repository_key() else {
            return RunAction::Ignore;
        };
        if run.finished {
            // Only runs that went through admission carry a queued/started label.
            return match run.state {
                Some(RunState::Queued | RunState::Started) => RunAction::Finish(repo),
                _ => RunAction::Ignore,
            };
        }
        match run.state {
            Some(RunState::Queued) => RunAction::Admit(repo),
            _ => RunAction::Ignore,
        }
    }
}

/// Result of handling an observed pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Ignored,
    Finished { promoted: Option<QueueKey> },
    Admission(Admission),
}

/// Applies [`QueueManager`] decisions to the resource store.
///
/// Errors are returned to the caller; nothing is retried here.
pub struct Reconciler<S: ?Sized> {
    manager: Arc<QueueManager>,
    store: Arc<S>,
}

impl<S> Reconciler<S>
where
    S: ResourceStore + ?Sized,
{
    pub fn new(manager: Arc<QueueManager>, store: Arc<S>) -> Self {
        Self { manager, store }
    }

    pub fn manager(&self) -> &Arc<QueueManager> {
        &self.manager
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Rebuild the manager's queues from the store.
    pub async fn bootstrap(&self) -> QueueResult<crate::RecoverySummary> {
        self.manager.init_queues(self.store.as_ref()).await
    }

    /// A new run was observed for `repo`.
    ///
    /// Re-delivering an event for a run that is already running reports it as
    /// admitted again, which repairs a state label a previous call failed to write.
    pub async fn run_created(&self, repo: &Repository, run: &PipelineRun) -> QueueResult<Admission> {
        let admission = self.manager.add_to_queue(repo, run)?;
        let state = if admission.is_admitted() {
            RunState::Started
        } else {
            RunState::Queued
        };
        if run.state != Some(state) {
            self.store.set_run_state(&run.key, state).await?;
        }
        Ok(admission)
    }

    /// A run of `repo` finished or was deleted. Returns the run promoted in its place.
    pub async fn run_finished(&self, repo: &RepoKey, run: &QueueKey) -> QueueResult<Option<QueueKey>> {
        let Some(next) = self.manager.remove_from_queue(repo, run) else {
            return Ok(None);
        };
        self.store.set_run_state(&next, RunState::Started).await?;
        info!(queue_key = %next, repository = %repo, "Started promoted pipeline run");
        Ok(Some(next))
    }

    /// A pipeline run was created or updated.
    ///
    /// Queued runs of repositories with concurrency enabled go through
    /// admission; finished runs free their slot and are marked completed.
    pub async fn run_applied(&self, run: &PipelineRun) -> QueueResult<RunOutcome> {
        match RunAction::for_run(run) {
            RunAction::Ignore => Ok(RunOutcome::Ignored),
            RunAction::Finish(repo) => {
                let promoted = self.run_finished(&repo, &run.key).await?;
                self.store.set_run_state(&run.key, RunState::Completed).await?;
                Ok(RunOutcome::Finished { promoted })
            }
            RunAction::Admit(key) => {
                let Some(repo) = self.store.get_repository(&key).await? else {
                    debug!(queue_key = %run.key, repository = %key, "Repository not found for queued run");
                    return Ok(RunOutcome::Ignored);
                };
                if !repo.concurrency_enabled() {
                    return Ok(RunOutcome::Ignored);
                }
                let admission = self.run_created(&repo, run).await?;
                if !admission.is_admitted() {
                    debug!(queue_key = %run.key, reason = %admission.message(), "Pipeline run left waiting");
                }
                Ok(RunOutcome::Admission(admission))
            }
        }
    }

    /// A pipeline run was deleted. Returns the run promoted in its place.
    pub async fn run_deleted(&self, run: &PipelineRun) -> QueueResult<Option<QueueKey>> {
        match run.repository_key() {
            Some(repo) => self.run_finished(&repo, &run.key).await,
            None => Ok(None),
        }
    }

    /// The repository's spec changed. Drops its queue when concurrency was turned off.
    pub fn repository_changed(&self, repo: &Repository) -> Option<DroppedQueue> {
        if repo.concurrency_enabled() {
            return None;
        }
        self.manager.remove_repository(&repo.key)
    }

    pub fn repository_deleted(&self, repo: &RepoKey) -> Option<DroppedQueue> {
        self.manager.remove_repository(repo)
    }
}
