//! Resource store abstraction.
//!
//! The store is the durable source of truth for repositories and pipeline
//! runs. The scheduler only keeps a cache of it and rebuilds that cache from
//! the store on startup.

use async_trait::async_trait;

use crate::{PipelineRun, QueueKey, RepoKey, Repository, Result, RunState};

/// Read and label access to repositories and pipeline runs.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// List every repository visible to the controller.
    async fn list_repositories(&self) -> Result<Vec<Repository>>;

    /// List the runs belonging to `repo` whose state label equals `state`.
    async fn list_runs(&self, repo: &RepoKey, state: RunState) -> Result<Vec<PipelineRun>>;

    /// Fetch a single repository, `None` if it does not exist.
    async fn get_repository(&self, key: &RepoKey) -> Result<Option<Repository>>;

    /// Record an admission decision on the run's state label.
    async fn set_run_state(&self, run: &QueueKey, state: RunState) -> Result<()>;
}
