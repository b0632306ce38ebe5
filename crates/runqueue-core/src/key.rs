//! Namespaced resource keys.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Identity of a repository, `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct RepoKey(String);

/// Identity of a pipeline run inside its repository's queue, `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct QueueKey(String);

impl RepoKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self(format!("{}/{}", namespace, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace half of the key.
    pub fn namespace(&self) -> &str {
        split(&self.0).0
    }

    pub fn name(&self) -> &str {
        split(&self.0).1
    }
}

impl QueueKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self(format!("{}/{}", namespace, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> &str {
        split(&self.0).0
    }

    pub fn name(&self) -> &str {
        split(&self.0).1
    }
}

impl std::str::FromStr for RepoKey {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        validate(s)?;
        Ok(Self(s.to_string()))
    }
}

impl std::str::FromStr for QueueKey {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        validate(s)?;
        Ok(Self(s.to_string()))
    }
}

// Keys built through `new` or `FromStr` always contain exactly one '/'.
fn split(key: &str) -> (&str, &str) {
    key.split_once('/').unwrap_or((key, ""))
}

fn validate(s: &str) -> crate::Result<()> {
    match s.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => Ok(()),
        _ => Err(Error::InvalidKey(format!(
            "expected namespace/name, got '{}'",
            s
        ))),
    }
}
