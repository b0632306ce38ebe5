//! Long-running admission controller.

use anyhow::{Context, Result};
use runqueue_config::ControllerConfig;
use runqueue_kube::{Controller, KubeStore};
use runqueue_scheduler::{QueueManager, Reconciler};
use std::sync::Arc;
use tracing::info;

/// Rebuild queues from the cluster, then watch for run and repository events.
///
/// Exits with an error if the rebuild fails; the controller never runs on
/// partially recovered state.
pub async fn run(config: ControllerConfig, namespace: Option<String>) -> Result<()> {
    info!(namespace = namespace.as_deref().unwrap_or("*"), "Starting runqueue controller");

    let store = KubeStore::new(Arc::new(config), namespace)
        .await
        .context("Failed to connect to Kubernetes")?;
    let reconciler = Reconciler::new(Arc::new(QueueManager::new()), Arc::new(store));

    Controller::new(reconciler)
        .run()
        .await
        .context("Controller stopped")?;
    Ok(())
}
