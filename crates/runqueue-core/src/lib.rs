//! Core domain types and traits for the runqueue admission controller.
//!
//! This crate contains:
//! - Repository and queue keys
//! - Repository and pipeline run types
//! - The resource store abstraction the scheduler rebuilds itself from

pub mod error;
pub mod key;
pub mod memory;
pub mod repository;
pub mod run;
pub mod store;

pub use error::{Error, Result};
pub use key::{QueueKey, RepoKey};
pub use memory::InMemoryStore;
pub use repository::Repository;
pub use run::{PipelineRun, RunState};
pub use store::ResourceStore;
