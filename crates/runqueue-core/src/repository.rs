//! Repository types.

use serde::{Deserialize, Serialize};

use crate::RepoKey;

/// A repository whose pipeline runs are subject to a concurrency limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub key: RepoKey,
    /// Maximum runs allowed at once. `None` or `Some(0)` disables queueing.
    pub concurrency_limit: Option<u32>,
}

impl Repository {
    pub fn new(key: RepoKey, concurrency_limit: Option<u32>) -> Self {
        Self {
            key,
            concurrency_limit,
        }
    }

    /// The configured limit, if concurrency control is enabled.
    pub fn effective_limit(&self) -> Option<u32> {
        self.concurrency_limit.filter(|limit| *limit > 0)
    }

    pub fn concurrency_enabled(&self) -> bool {
        self.effective_limit().is_some()
    }

    pub fn namespace(&self) -> &str {
        self.key.namespace()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_limit_disables_concurrency() {
        let repo = Repository::new(RepoKey::new("ci", "app"), Some(0));
        assert_eq!(repo.effective_limit(), None);
        assert!(!repo.concurrency_enabled());

        let repo = Repository::new(RepoKey::new("ci", "app"), None);
        assert!(!repo.concurrency_enabled());

        let repo = Repository::new(RepoKey::new("ci", "app"), Some(3));
        assert_eq!(repo.effective_limit(), Some(3));
    }
}
