//! Scheduler error types.

use runqueue_core::RepoKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(
        "failed to resize queue for {repository} to {requested}: {running} runs still running"
    )]
    Resize {
        repository: RepoKey,
        requested: usize,
        running: usize,
    },

    #[error("concurrency is not enabled for repository {0}")]
    ConcurrencyDisabled(RepoKey),

    #[error("failed to rebuild queues: {0}")]
    Recovery(#[source] runqueue_core::Error),

    #[error("resource store error: {0}")]
    Store(#[from] runqueue_core::Error),
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
