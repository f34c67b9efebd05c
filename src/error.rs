//! Error types for the Vicinity library.
//!
//! Every fallible operation returns [`Result`], whose error type is the
//! [`VicinityError`] enum. Callers that only care about the broad category of
//! a failure (for example to decide whether retrying with a larger `ef` makes
//! sense) can use [`VicinityError::kind`].
//!
//! # Examples
//!
//! ```
//! use vicinity::error::{ErrorKind, Result, VicinityError};
//!
//! fn example_operation() -> Result<()> {
//!     Err(VicinityError::invalid_argument("dimension must be > 0"))
//! }
//!
//! let err = example_operation().unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::InvalidArgument);
//! ```

use std::collections::TryReserveError;
use std::io;

use thiserror::Error;

/// The main error type for Vicinity operations.
#[derive(Error, Debug)]
pub enum VicinityError {
    /// Dimension mismatch, malformed parameters or batch shape.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The index has not been initialized with `init` or `load`.
    #[error("Index not initialized: {0}")]
    NotInitialized(String),

    /// Insertion beyond the configured capacity.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A search could not assemble `requested` live results.
    #[error(
        "Insufficient results: requested {requested}, found {found} (ef or M is probably too small)"
    )]
    InsufficientResults { requested: usize, found: usize },

    /// I/O errors (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A persisted index that is truncated or malformed.
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// Allocation failure while growing the node arena.
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Worker pool construction failure.
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

/// Result type alias for operations that may fail with VicinityError.
pub type Result<T> = std::result::Result<T, VicinityError>;

/// Coarse classification of a [`VicinityError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotInitialized,
    CapacityExceeded,
    InsufficientResults,
    IoError,
    OutOfMemory,
    /// The worker pool for a parallel batch could not be started.
    ThreadPool,
}

impl VicinityError {
    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        VicinityError::InvalidArgument(msg.into())
    }

    /// Create a new not initialized error.
    pub fn not_initialized<S: Into<String>>(msg: S) -> Self {
        VicinityError::NotInitialized(msg.into())
    }

    /// Create a new capacity exceeded error.
    pub fn capacity_exceeded<S: Into<String>>(msg: S) -> Self {
        VicinityError::CapacityExceeded(msg.into())
    }

    /// Create a new insufficient results error.
    pub fn insufficient_results(requested: usize, found: usize) -> Self {
        VicinityError::InsufficientResults { requested, found }
    }

    /// Create a new corrupt index error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        VicinityError::CorruptIndex(msg.into())
    }

    /// The broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VicinityError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            VicinityError::NotInitialized(_) => ErrorKind::NotInitialized,
            VicinityError::CapacityExceeded(_) => ErrorKind::CapacityExceeded,
            VicinityError::InsufficientResults { .. } => ErrorKind::InsufficientResults,
            VicinityError::Io(_) | VicinityError::CorruptIndex(_) => ErrorKind::IoError,
            VicinityError::OutOfMemory(_) => ErrorKind::OutOfMemory,
            VicinityError::ThreadPool(_) => ErrorKind::ThreadPool,
        }
    }
}

impl From<TryReserveError> for VicinityError {
    fn from(err: TryReserveError) -> Self {
        VicinityError::OutOfMemory(err.to_string())
    }
}
