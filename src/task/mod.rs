//! Task module - asynchronous scrape tasks, their registry and the manager
//! that runs them in the background.

pub mod manager;
pub mod store;
pub mod task;

pub use manager::{ManagerConfig, TaskManager, TaskResult, TaskStats};
pub use store::{StatusCounts, TaskStore};
pub use task::{Task, TaskError, TaskId, TaskOutcome, TaskSnapshot, TaskStatus};
