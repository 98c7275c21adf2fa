//! Decoded page cache with background prefetch around the reading position

mod error;
mod in_flight;
mod pool;
mod prefetch;
mod stats;
mod window;

pub use error::{LoadCause, PageLoadError};
pub use in_flight::{InFlightLoad, LoadState};
pub use pool::{WorkerPool, is_worker_thread};
pub use prefetch::PrefetchCache;
pub use stats::CacheStats;
pub use window::CacheWindow;
