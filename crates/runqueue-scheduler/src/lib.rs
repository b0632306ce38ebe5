//! Admission control for pipeline runs.
//!
//! Limits how many runs of a repository may execute at once, keeps the rest
//! waiting in arrival order and promotes them as runs finish. State lives in
//! memory and is rebuilt from the resource store on startup.

pub mod error;
pub mod manager;
pub mod reconciler;
pub mod semaphore;

pub use error::{QueueError, QueueResult};
pub use manager::{Admission, DroppedQueue, QueueManager, RecoverySummary};
pub use reconciler::{Reconciler, RunAction, RunOutcome};
pub use semaphore::{Semaphore, WaitReason};
