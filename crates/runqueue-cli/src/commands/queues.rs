//! Print rebuilt queues.

use anyhow::{Context, Result};
use runqueue_config::ControllerConfig;
use runqueue_core::RepoKey;
use runqueue_kube::KubeStore;
use runqueue_scheduler::{QueueManager, RecoverySummary};
use std::sync::Arc;

pub async fn show(
    config: ControllerConfig,
    namespace: Option<String>,
    repository: Option<String>,
) -> Result<()> {
    let filter: Option<RepoKey> = repository
        .map(|r| r.parse::<RepoKey>())
        .transpose()
        .context("Invalid repository key")?;

    let store = KubeStore::new(Arc::new(config), namespace)
        .await
        .context("Failed to connect to Kubernetes")?;
    let manager = QueueManager::new();
    let summary = manager
        .init_queues(&store)
        .await
        .context("Failed to rebuild queues")?;

    let repos: Vec<RepoKey> = match filter {
        Some(key) => vec![key],
        None => manager.repositories(),
    };

    if let Some(message) = empty_message(&summary, repos.len()) {
        println!("{}", message);
        return Ok(());
    }

    for repo in &repos {
        let limit = manager
            .limit(repo)
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".to_string());
        let running = manager.running_pipeline_runs(repo);
        let waiting = manager.queued_pipeline_runs(repo);

        println!("{} (limit {}, {} running, {} waiting)", repo, limit, running.len(), waiting.len());
        for key in &running {
            println!("  ▶ {}", key);
        }
        for (position, key) in waiting.iter().enumerate() {
            println!("  {}. {}", position + 1, key);
        }
    }

    println!(
        "\n{} repositories, {} queued, {} started",
        summary.repositories, summary.queued, summary.started
    );
    Ok(())
}

/// Message to print instead of the queue listing, if there is nothing to list.
fn empty_message(summary: &RecoverySummary, shown: usize) -> Option<&'static str> {
    if summary.repositories == 0 {
        Some("No repositories with concurrency limits")
    } else if shown == 0 {
        Some("No queued or started pipeline runs")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_message_depends_on_enabled_repositories() {
        let none = RecoverySummary::default();
        assert_eq!(
            empty_message(&none, 0),
            Some("No repositories with concurrency limits")
        );

        let idle = RecoverySummary {
            repositories: 2,
            ..RecoverySummary::default()
        };
        assert_eq!(empty_message(&idle, 0), Some("No queued or started pipeline runs"));
        assert_eq!(empty_message(&idle, 1), None);
    }
}
