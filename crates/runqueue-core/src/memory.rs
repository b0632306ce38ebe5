//! In-process resource store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::{Error, PipelineRun, QueueKey, RepoKey, Repository, ResourceStore, Result, RunState};

#[derive(Default)]
struct Inner {
    repositories: BTreeMap<RepoKey, Repository>,
    runs: HashMap<QueueKey, PipelineRun>,
    fail_next_listing: Option<String>,
}

/// A [`ResourceStore`] backed by in-process maps.
///
/// Used by tests and by local tooling that has no cluster to talk to.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_repository(&self, repo: Repository) {
        self.lock().repositories.insert(repo.key.clone(), repo);
    }

    pub fn insert_run(&self, run: PipelineRun) {
        self.lock().runs.insert(run.key.clone(), run);
    }

    pub fn run(&self, key: &QueueKey) -> Option<PipelineRun> {
        self.lock().runs.get(key).cloned()
    }

    /// Make the next listing call fail with `message`.
    pub fn fail_next_listing(&self, message: impl Into<String>) {
        self.lock().fail_next_listing = Some(message.into());
    }

    fn take_failure(inner: &mut Inner) -> Result<()> {
        match inner.fail_next_listing.take() {
            Some(message) => Err(Error::Store(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let mut inner = self.lock();
        Self::take_failure(&mut inner)?;
        Ok(inner.repositories.values().cloned().collect())
    }

    async fn list_runs(&self, repo: &RepoKey, state: RunState) -> Result<Vec<PipelineRun>> {
        let mut inner = self.lock();
        Self::take_failure(&mut inner)?;
        Ok(inner
            .runs
            .values()
            .filter(|run| {
                run.namespace() == repo.namespace()
                    && run.repository.as_deref() == Some(repo.name())
                    && run.state == Some(state)
            })
            .cloned()
            .collect())
    }

    async fn get_repository(&self, key: &RepoKey) -> Result<Option<Repository>> {
        Ok(self.lock().repositories.get(key).cloned())
    }

    async fn set_run_state(&self, run: &QueueKey, state: RunState) -> Result<()> {
        let mut inner = self.lock();
        let stored = inner
            .runs
            .get_mut(run)
            .ok_or_else(|| Error::NotFound(format!("pipeline run {}", run)))?;
        stored.state = Some(state);
        Ok(())
    }
}
