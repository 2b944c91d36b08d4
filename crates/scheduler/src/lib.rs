pub mod limiter;
pub mod mutex;

pub use limiter::{ConcurrencyLimiter, ConcurrencyStats, TaskHandle};
pub use mutex::{Mutex, MutexGuard};
