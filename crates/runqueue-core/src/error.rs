//! Error types for runqueue.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("resource store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, Error>;
