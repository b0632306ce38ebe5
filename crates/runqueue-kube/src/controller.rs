//! Watch loop driving the scheduler from cluster events.

use crate::KubeStore;
use crate::store::{repository_from_object, run_from_object};
use futures::StreamExt;
use kube::api::DynamicObject;
use kube::runtime::watcher::Event;
use kube::runtime::{WatchStreamExt, watcher};
use runqueue_scheduler::{QueueResult, Reconciler};
use tracing::{error, info, warn};

/// Watches pipeline runs and repositories and feeds them to a [`Reconciler`].
pub struct Controller {
    reconciler: Reconciler<KubeStore>,
}

impl Controller {
    pub fn new(reconciler: Reconciler<KubeStore>) -> Self {
        Self { reconciler }
    }

    pub fn reconciler(&self) -> &Reconciler<KubeStore> {
        &self.reconciler
    }

    /// Rebuild the queues, then watch until the process stops.
    ///
    /// A failed rebuild is returned before any watch starts.
    pub async fn run(&self) -> QueueResult<()> {
        let summary = self.reconciler.bootstrap().await?;
        info!(
            repositories = summary.repositories,
            queued = summary.queued,
            started = summary.started,
            "Queues rebuilt, starting watches"
        );

        tokio::join!(self.watch_runs(), self.watch_repositories());
        Ok(())
    }

    async fn watch_runs(&self) {
        let api = self.reconciler.store().pipeline_runs_api();
        let mut events = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();

        while let Some(event) = events.next().await {
            let result = match event {
                Ok(Event::Apply(obj) | Event::InitApply(obj)) => self.run_applied(&obj).await,
                Ok(Event::Delete(obj)) => self.run_deleted(&obj).await,
                Ok(Event::Init | Event::InitDone) => Ok(()),
                Err(e) => {
                    warn!(error = %e, "Pipeline run watch error");
                    Ok(())
                }
            };
            if let Err(e) = result {
                error!(error = %e, "Failed to handle pipeline run event");
            }
        }
    }

    async fn watch_repositories(&self) {
        let api = self.reconciler.store().repositories_api();
        let mut events = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();

        while let Some(event) = events.next().await {
            match event {
                Ok(Event::Apply(obj) | Event::InitApply(obj)) => match repository_from_object(&obj) {
                    Ok(repo) => {
                        self.reconciler.repository_changed(&repo);
                    }
                    Err(e) => error!(error = %e, "Failed to handle repository event"),
                },
                Ok(Event::Delete(obj)) => match repository_from_object(&obj) {
                    Ok(repo) => {
                        self.reconciler.repository_deleted(&repo.key);
                    }
                    Err(e) => error!(error = %e, "Failed to handle repository event"),
                },
                Ok(Event::Init | Event::InitDone) => {}
                Err(e) => warn!(error = %e, "Repository watch error"),
            }
        }
    }

    async fn run_applied(&self, obj: &DynamicObject) -> QueueResult<()> {
        let run = run_from_object(obj, self.reconciler.store().config())?;
        self.reconciler.run_applied(&run).await?;
        Ok(())
    }

    async fn run_deleted(&self, obj: &DynamicObject) -> QueueResult<()> {
        let run = run_from_object(obj, self.reconciler.store().config())?;
        self.reconciler.run_deleted(&run).await?;
        Ok(())
    }
}
