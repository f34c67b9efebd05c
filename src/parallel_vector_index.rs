//! Parallel execution for batched index operations.
//!
//! Batched insertions and searches fan out over a fixed set of workers that
//! claim row indexes from a shared atomic cursor. The first failing row
//! cancels the rest of the batch and its error is returned to the caller.

pub mod executor;

pub use executor::ParallelExecutor;

/// Batches with at most this many rows per requested thread run sequentially.
pub const MIN_ROWS_PER_THREAD: usize = 4;
