//! Registry of per-repository semaphores.

use crate::semaphore::{Semaphore, WaitReason};
use crate::{QueueError, QueueResult};
use runqueue_core::{PipelineRun, QueueKey, RepoKey, Repository, ResourceStore, RunState};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Outcome of asking for a run to be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The run may start now.
    Admitted,
    /// The run stays in the waiting queue.
    Waiting(WaitReason),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }

    /// Human-readable reason, empty when admitted.
    pub fn message(&self) -> String {
        match self {
            Admission::Admitted => String::new(),
            Admission::Waiting(reason) => reason.to_string(),
        }
    }
}

/// Counts from a queue rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    pub repositories: usize,
    pub queued: usize,
    pub started: usize,
}

/// Runs that were still tracked when a repository's queue was dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DroppedQueue {
    pub waiting: Vec<QueueKey>,
    pub running: Vec<QueueKey>,
}

impl DroppedQueue {
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty() && self.running.is_empty()
    }
}

/// Thread-safe registry mapping each repository to its semaphore.
///
/// Every operation holds a single lock for its whole duration, so no caller
/// can observe a semaphore mid-mutation.
#[derive(Debug, Default)]
pub struct QueueManager {
    queues: Mutex<HashMap<RepoKey, Semaphore>>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RepoKey, Semaphore>> {
        // Mutations never leave a semaphore half-updated, so a poisoned map is still consistent.
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `run` for `repo` and try to admit it immediately.
    pub fn add_to_queue(&self, repo: &Repository, run: &PipelineRun) -> QueueResult<Admission> {
        let mut queues = self.lock();
        let sema = semaphore(&mut queues, repo)?;

        sema.add_to_queue(run.key.clone(), run.created_at);
        info!(queue_key = %run.key, repository = %repo.key, "Added pipeline run to queue");

        match sema.try_acquire(&run.key) {
            Ok(()) => {
                info!(queue_key = %run.key, repository = %repo.key, "Moved pipeline run to running");
                Ok(Admission::Admitted)
            }
            Err(reason) => {
                debug!(queue_key = %run.key, repository = %repo.key, %reason, "Pipeline run is waiting");
                Ok(Admission::Waiting(reason))
            }
        }
    }

    /// Drop `run` from the repository's queue and promote the next waiting run.
    ///
    /// Returns the promoted run, if any.
    pub fn remove_from_queue(&self, repo: &RepoKey, run: &QueueKey) -> Option<QueueKey> {
        let mut queues = self.lock();
        let sema = queues.get_mut(repo)?;

        sema.release(run);
        sema.remove_from_queue(run);
        info!(queue_key = %run, repository = %repo, "Removed pipeline run from queue");

        let next = sema.acquire_latest()?;
        info!(queue_key = %next, repository = %repo, "Moved pipeline run to running");
        Some(next)
    }

    /// Rebuild every queue from the resource store.
    ///
    /// The new registry is assembled off-lock and swapped in only once every
    /// listing succeeded, so a failed rebuild leaves no partial state. Call this
    /// before the manager is shared with event handlers.
    pub async fn init_queues<S>(&self, store: &S) -> QueueResult<RecoverySummary>
    where
        S: ResourceStore + ?Sized,
    {
        let repos = store
            .list_repositories()
            .await
            .map_err(QueueError::Recovery)?;

        let mut rebuilt = HashMap::new();
        let mut summary = RecoverySummary::default();

        for repo in repos.iter().filter(|r| r.concurrency_enabled()) {
            summary.repositories += 1;

            let queued = store
                .list_runs(&repo.key, RunState::Queued)
                .await
                .map_err(QueueError::Recovery)?;
            for run in &queued {
                semaphore(&mut rebuilt, repo)?.add_to_queue(run.key.clone(), run.created_at);
            }
            summary.queued += queued.len();

            let started = store
                .list_runs(&repo.key, RunState::Started)
                .await
                .map_err(QueueError::Recovery)?;
            for run in &started {
                semaphore(&mut rebuilt, repo)?.acquire(run.key.clone());
            }
            summary.started += started.len();
        }

        *self.lock() = rebuilt;
        info!(
            repositories = summary.repositories,
            queued = summary.queued,
            started = summary.started,
            "Rebuilt pipeline run queues"
        );
        Ok(summary)
    }

    /// Forget a repository's queue without promoting anything.
    ///
    /// Returns the runs that were still tracked so the caller can decide what
    /// to do with them.
    pub fn remove_repository(&self, repo: &RepoKey) -> Option<DroppedQueue> {
        let sema = self.lock().remove(repo)?;
        let dropped = DroppedQueue {
            waiting: sema.current_pending(),
            running: sema.current_running(),
        };
        if dropped.is_empty() {
            info!(repository = %repo, "Removed repository queue");
        } else {
            warn!(
                repository = %repo,
                waiting = dropped.waiting.len(),
                running = dropped.running.len(),
                "Removed repository queue with tracked pipeline runs"
            );
        }
        Some(dropped)
    }

    /// Waiting runs for `repo`, earliest arrival first.
    pub fn queued_pipeline_runs(&self, repo: &RepoKey) -> Vec<QueueKey> {
        self.lock()
            .get(repo)
            .map(Semaphore::current_pending)
            .unwrap_or_default()
    }

    pub fn running_pipeline_runs(&self, repo: &RepoKey) -> Vec<QueueKey> {
        self.lock()
            .get(repo)
            .map(Semaphore::current_running)
            .unwrap_or_default()
    }

    /// Current limit for `repo`, if it has a queue.
    pub fn limit(&self, repo: &RepoKey) -> Option<usize> {
        self.lock().get(repo).map(Semaphore::limit)
    }

    /// Repositories that currently have a queue, sorted.
    pub fn repositories(&self) -> Vec<RepoKey> {
        let mut keys: Vec<_> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Find or create the semaphore for `repo`, resizing it if the configured limit changed.
fn semaphore<'a>(
    queues: &'a mut HashMap<RepoKey, Semaphore>,
    repo: &Repository,
) -> QueueResult<&'a mut Semaphore> {
    let Some(limit) = repo.effective_limit() else {
        warn!(repository = %repo.key, "Rejected pipeline run: concurrency is not enabled");
        return Err(QueueError::ConcurrencyDisabled(repo.key.clone()));
    };
    let limit = limit as usize;

    let sema = queues
        .entry(repo.key.clone())
        .or_insert_with(|| Semaphore::new(limit));

    if sema.limit() != limit && !sema.resize(limit) {
        let running = sema.current_running().len();
        warn!(repository = %repo.key, requested = limit, running, "Failed to resize queue");
        return Err(QueueError::Resize {
            repository: repo.key.clone(),
            requested: limit,
            running,
        });
    }
    Ok(sema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use runqueue_core::InMemoryStore;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn repo(limit: u32) -> Repository {
        Repository::new(RepoKey::new("ci", "app"), Some(limit))
    }

    fn run(name: &str, secs: i64) -> PipelineRun {
        PipelineRun::new(QueueKey::new("ci", name), at(secs)).with_repository("app")
    }

    fn key(name: &str) -> QueueKey {
        QueueKey::new("ci", name)
    }

    #[test]
    fn test_single_slot_handoff() {
        let qm = QueueManager::new();
        let repo = repo(1);

        assert_eq!(qm.add_to_queue(&repo, &run("r1", 1)).unwrap(), Admission::Admitted);

        let admission = qm.add_to_queue(&repo, &run("r2", 2)).unwrap();
        assert!(!admission.is_admitted());
        assert_eq!(admission.message(), "at capacity");
        assert_eq!(qm.queued_pipeline_runs(&repo.key), vec![key("r2")]);

        assert_eq!(qm.remove_from_queue(&repo.key, &key("r1")), Some(key("r2")));
        assert_eq!(qm.running_pipeline_runs(&repo.key), vec![key("r2")]);
        assert!(qm.queued_pipeline_runs(&repo.key).is_empty());
    }

    #[test]
    fn test_failed_shrink_keeps_limit() {
        let qm = QueueManager::new();
        let repo2 = repo(2);

        assert!(qm.add_to_queue(&repo2, &run("a", 1)).unwrap().is_admitted());
        assert!(qm.add_to_queue(&repo2, &run("b", 2)).unwrap().is_admitted());
        assert!(!qm.add_to_queue(&repo2, &run("c", 3)).unwrap().is_admitted());

        let err = qm.add_to_queue(&repo(1), &run("d", 4)).unwrap_err();
        assert!(matches!(
            err,
            QueueError::Resize {
                requested: 1,
                running: 2,
                ..
            }
        ));
        assert_eq!(qm.limit(&repo2.key), Some(2));
        // The rejected run was never queued.
        assert_eq!(qm.queued_pipeline_runs(&repo2.key), vec![key("c")]);

        assert_eq!(qm.remove_from_queue(&repo2.key, &key("a")), Some(key("c")));
        assert_eq!(qm.running_pipeline_runs(&repo2.key), vec![key("b"), key("c")]);
    }

    #[test]
    fn test_growing_limit_admits_waiting_runs() {
        let qm = QueueManager::new();
        qm.add_to_queue(&repo(1), &run("a", 1)).unwrap();
        qm.add_to_queue(&repo(1), &run("b", 2)).unwrap();
        qm.add_to_queue(&repo(1), &run("c", 3)).unwrap();

        // "c" is behind "b", so growing the limit on its own call does not let it jump ahead.
        let admission = qm.add_to_queue(&repo(3), &run("c", 3)).unwrap();
        assert_eq!(admission, Admission::Waiting(WaitReason::EarlierRun));
        assert!(qm.add_to_queue(&repo(3), &run("b", 2)).unwrap().is_admitted());
        assert!(qm.add_to_queue(&repo(3), &run("c", 3)).unwrap().is_admitted());
    }

    #[test]
    fn test_disabled_repository_is_rejected() {
        let qm = QueueManager::new();
        let disabled = Repository::new(RepoKey::new("ci", "app"), Some(0));

        let err = qm.add_to_queue(&disabled, &run("a", 1)).unwrap_err();
        assert!(matches!(err, QueueError::ConcurrencyDisabled(_)));
        assert!(qm.repositories().is_empty());
    }

    #[test]
    fn test_unknown_repository_reads_are_empty() {
        let qm = QueueManager::new();
        let missing = RepoKey::new("ci", "missing");

        assert_eq!(qm.remove_from_queue(&missing, &key("a")), None);
        assert!(qm.queued_pipeline_runs(&missing).is_empty());
        assert!(qm.running_pipeline_runs(&missing).is_empty());
        assert_eq!(qm.remove_repository(&missing), None);
    }

    #[test]
    fn test_removing_waiting_run_promotes_nothing_when_full() {
        let qm = QueueManager::new();
        let repo = repo(1);
        qm.add_to_queue(&repo, &run("a", 1)).unwrap();
        qm.add_to_queue(&repo, &run("b", 2)).unwrap();
        qm.add_to_queue(&repo, &run("c", 3)).unwrap();

        assert_eq!(qm.remove_from_queue(&repo.key, &key("b")), None);
        assert_eq!(qm.queued_pipeline_runs(&repo.key), vec![key("c")]);
        assert_eq!(qm.running_pipeline_runs(&repo.key), vec![key("a")]);
    }

    #[test]
    fn test_remove_repository_reports_dropped_runs() {
        let qm = QueueManager::new();
        let repo = repo(1);
        qm.add_to_queue(&repo, &run("a", 1)).unwrap();
        qm.add_to_queue(&repo, &run("b", 2)).unwrap();

        let dropped = qm.remove_repository(&repo.key).unwrap();
        assert_eq!(dropped.running, vec![key("a")]);
        assert_eq!(dropped.waiting, vec![key("b")]);
        assert!(qm.repositories().is_empty());
    }

    #[test]
    fn test_repositories_are_independent() {
        let qm = QueueManager::new();
        let app = repo(1);
        let other = Repository::new(RepoKey::new("ci", "other"), Some(1));

        assert!(qm.add_to_queue(&app, &run("a", 1)).unwrap().is_admitted());
        assert!(qm.add_to_queue(&other, &run("b", 2)).unwrap().is_admitted());
        assert_eq!(qm.repositories(), vec![app.key.clone(), other.key.clone()]);
    }

    #[tokio::test]
    async fn test_init_queues_restores_state() {
        let store = InMemoryStore::new();
        let repo = repo(2);
        store.insert_repository(repo.clone());
        store.insert_repository(Repository::new(RepoKey::new("ci", "plain"), None));
        store.insert_run(run("queued-job", 5).with_state(RunState::Queued));
        store.insert_run(run("started-job", 1).with_state(RunState::Started));

        let qm = QueueManager::new();
        let summary = qm.init_queues(&store).await.unwrap();
        assert_eq!(
            summary,
            RecoverySummary {
                repositories: 1,
                queued: 1,
                started: 1
            }
        );

        assert_eq!(qm.running_pipeline_runs(&repo.key), vec![key("started-job")]);
        assert_eq!(qm.queued_pipeline_runs(&repo.key), vec![key("queued-job")]);

        assert_eq!(
            qm.remove_from_queue(&repo.key, &key("started-job")),
            Some(key("queued-job"))
        );
    }

    #[tokio::test]
    async fn test_init_queues_keeps_repositories_in_one_namespace_apart() {
        let store = InMemoryStore::new();
        let a = Repository::new(RepoKey::new("ci", "a"), Some(1));
        let b = Repository::new(RepoKey::new("ci", "b"), Some(1));
        store.insert_repository(a.clone());
        store.insert_repository(b.clone());
        store.insert_run(
            PipelineRun::new(key("a-run"), at(1))
                .with_repository("a")
                .with_state(RunState::Started),
        );
        store.insert_run(
            PipelineRun::new(key("b-run"), at(2))
                .with_repository("b")
                .with_state(RunState::Queued),
        );

        let qm = QueueManager::new();
        qm.init_queues(&store).await.unwrap();

        assert_eq!(qm.running_pipeline_runs(&a.key), vec![key("a-run")]);
        assert!(qm.queued_pipeline_runs(&a.key).is_empty());
        assert_eq!(qm.queued_pipeline_runs(&b.key), vec![key("b-run")]);
        assert!(qm.running_pipeline_runs(&b.key).is_empty());

        // Finishing a's run must not start a run that belongs to b.
        assert_eq!(qm.remove_from_queue(&a.key, &key("a-run")), None);
        assert_eq!(qm.queued_pipeline_runs(&b.key), vec![key("b-run")]);
    }

    #[tokio::test]
    async fn test_init_queues_orders_by_creation_time() {
        let store = InMemoryStore::new();
        let repo = repo(1);
        store.insert_repository(repo.clone());
        store.insert_run(run("third", 30).with_state(RunState::Queued));
        store.insert_run(run("first", 10).with_state(RunState::Queued));
        store.insert_run(run("second", 20).with_state(RunState::Queued));

        let qm = QueueManager::new();
        qm.init_queues(&store).await.unwrap();

        assert_eq!(
            qm.queued_pipeline_runs(&repo.key),
            vec![key("first"), key("second"), key("third")]
        );
    }

    #[tokio::test]
    async fn test_init_queues_keeps_started_runs_over_limit() {
        let store = InMemoryStore::new();
        let repo = repo(1);
        store.insert_repository(repo.clone());
        store.insert_run(run("a", 1).with_state(RunState::Started));
        store.insert_run(run("b", 2).with_state(RunState::Started));
        store.insert_run(run("c", 3).with_state(RunState::Queued));

        let qm = QueueManager::new();
        qm.init_queues(&store).await.unwrap();
        assert_eq!(qm.running_pipeline_runs(&repo.key), vec![key("a"), key("b")]);

        // One finish still leaves the repository at its limit.
        assert_eq!(qm.remove_from_queue(&repo.key, &key("a")), None);
        assert_eq!(qm.remove_from_queue(&repo.key, &key("b")), Some(key("c")));
    }

    #[tokio::test]
    async fn test_init_queues_failure_keeps_previous_state() {
        let store = InMemoryStore::new();
        let repo = repo(1);
        store.insert_repository(repo.clone());

        let qm = QueueManager::new();
        qm.add_to_queue(&repo, &run("a", 1)).unwrap();

        store.fail_next_listing("connection refused");
        let err = qm.init_queues(&store).await.unwrap_err();
        assert!(matches!(err, QueueError::Recovery(_)));
        assert_eq!(qm.running_pipeline_runs(&repo.key), vec![key("a")]);
    }
}
