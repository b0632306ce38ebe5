//! Kubernetes backend for runqueue.
//!
//! Provides:
//! - [`KubeStore`], a resource store over Repository and PipelineRun custom resources
//! - [`Controller`], the watch loop feeding run and repository events to the scheduler

pub mod controller;
pub mod store;

pub use controller::Controller;
pub use store::KubeStore;
