//! Processing tier: TCP listener in front of a pool of worker processes.

pub mod listener;
pub mod pool;
pub mod worker;

pub use listener::{ListenerConfig, ProcessingServer};
pub use pool::{PoolConfig, PoolError, WorkerCommand, WorkerPool, WORKER_FLAG};
