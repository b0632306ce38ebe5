//! Pipeline run types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{QueueKey, RepoKey};

/// Admission state recorded on a pipeline run's state label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Queued,
    Started,
    Completed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Queued => "queued",
            RunState::Started => "started",
            RunState::Completed => "completed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(RunState::Queued),
            "started" => Ok(RunState::Started),
            "completed" => Ok(RunState::Completed),
            _ => Err(format!("Unknown run state: {}", s)),
        }
    }
}

/// A pipeline run as observed in the resource store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub key: QueueKey,
    /// Name of the owning repository, from the run's repository label.
    pub repository: Option<String>,
    /// Arrival time used to order the waiting queue.
    pub created_at: DateTime<Utc>,
    pub state: Option<RunState>,
    /// The run has reached a terminal condition.
    pub finished: bool,
}

impl PipelineRun {
    pub fn new(key: QueueKey, created_at: DateTime<Utc>) -> Self {
        Self {
            key,
            repository: None,
            created_at,
            state: None,
            finished: false,
        }
    }

    pub fn with_state(mut self, state: RunState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn namespace(&self) -> &str {
        self.key.namespace()
    }

    /// Key of the owning repository, if the run carries a repository label.
    pub fn repository_key(&self) -> Option<RepoKey> {
        self.repository
            .as_deref()
            .map(|name| RepoKey::new(self.namespace(), name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_roundtrip_labels() {
        assert_eq!("queued".parse::<RunState>().unwrap(), RunState::Queued);
        assert_eq!("Started".parse::<RunState>().unwrap(), RunState::Started);
        assert_eq!(RunState::Completed.to_string(), "completed");
        assert!("pending".parse::<RunState>().is_err());
    }

    #[test]
    fn test_repository_key_uses_run_namespace() {
        let run = PipelineRun::new(QueueKey::new("ci", "app-push-1"), Utc::now());
        assert_eq!(run.repository_key(), None);
        assert_eq!(
            run.with_repository("app").repository_key(),
            Some(RepoKey::new("ci", "app"))
        );
    }
}
