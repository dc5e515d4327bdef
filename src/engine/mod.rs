//! Retry engine: worker loop, retry policy, worker pool.

pub mod backoff;
pub mod pool;
pub mod worker;

pub use backoff::RetryPolicy;
pub use pool::WorkerPool;
pub use worker::{Disposition, Step, Worker};
