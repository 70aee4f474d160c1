//! Worker Pool module
//!
//! Binds agent identities to LLM-backed workers and tracks their runtime
//! status.

pub mod core;
pub mod pool;

pub use self::core::{Worker, WorkerInfo, WorkerStatus};
pub use pool::{PoolStats, WorkerPool};
