//! Error Module - SGC Error Types
//!
//! Defines all error types used in SGC.
//!
//! # Error Categories
//!
//! ## Memory Errors
//! - `OutOfMemory` - Heap exhaustion after the allocation retry policy gave up
//! - `NullReference` - Access through a null reference
//! - `BoundsCheckFailed` - Field or array index outside the object
//!
//! ## Region Errors
//! - `IllegalTransition` - Region state machine violation
//! - `HeapInitialization` - Heap could not be built from the configuration
//!
//! ## Collector Errors
//! - `VerificationFailed` - Heap verifier found a broken invariant (fatal)
//! - `InvalidState` - Operation issued in the wrong collector phase
//! - `ShuttingDown` - Runtime is stopping, waiters are released
//!
//! ## Runtime Errors
//! - `ClassUnloaded` - Class or loader was already unloaded
//! - `InvalidArgument` - Invalid function argument
//! - `Configuration` - Invalid configuration

use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for all SGC operations
///
/// # Examples
///
/// ```rust
/// use sgc::error::SgcError;
///
/// fn report(err: &SgcError) -> String {
///     match err {
///         SgcError::OutOfMemory { .. } => "java.lang.OutOfMemoryError: Java heap space".to_string(),
///         other => other.to_string(),
///     }
/// }
///
/// let err = SgcError::OutOfMemory { requested: 64, available: 0 };
/// assert!(report(&err).contains("OutOfMemoryError"));
/// ```
#[derive(Debug, Error)]
pub enum SgcError {
    /// Out of memory - heap exhaustion
    ///
    /// **When returned:** A mutator allocation still fails after the collector
    /// ran degenerated cycles and at least one Full GC
    ///
    /// **Recovery strategy:** Release references and retry, or surface as
    /// `java.lang.OutOfMemoryError` to the application
    #[error("Out of memory: requested {requested} bytes, available {available} bytes")]
    OutOfMemory { requested: usize, available: usize },

    /// Heap initialization failed
    ///
    /// **When returned:** Region geometry cannot be derived from the heap size
    ///
    /// **Recovery strategy:** Cannot recover - fix the heap options
    #[error("Heap initialization failed: {0}")]
    HeapInitialization(String),

    /// Region state machine violation
    ///
    /// **When returned:** A region is asked to move to a state that is not
    /// reachable from its current state
    ///
    /// **Recovery strategy:** Cannot recover - indicates a collector bug
    #[error("Illegal region transition for region {region}: {from} -> {to}")]
    IllegalTransition {
        region: usize,
        from: &'static str,
        to: &'static str,
    },

    /// Access through null reference
    ///
    /// **When returned:** Field access, clone or class query on a null reference
    ///
    /// **Recovery strategy:** Caller bug; surface as a null pointer failure
    #[error("Null reference")]
    NullReference,

    /// Bounds check failed
    ///
    /// **When returned:** Field or element index outside the object shape
    ///
    /// **Recovery strategy:** Validate index before access
    #[error("Bounds check failed: index {index} out of bounds for length {length}")]
    BoundsCheckFailed { index: usize, length: usize },

    /// Invalid argument
    ///
    /// **When returned:** Function argument fails validation, such as a
    /// handle that was already released or a class id that was never defined
    ///
    /// **Recovery strategy:** Fix caller to provide valid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid state
    ///
    /// **When returned:** Operation issued in a collector phase that forbids it
    ///
    /// **Recovery strategy:** Retry after the current cycle finishes
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Class or loader already unloaded
    ///
    /// **When returned:** A class id refers to a loader reclaimed by class unloading
    ///
    /// **Recovery strategy:** Caller held a stale class id; reload the class
    #[error("Class {0} has been unloaded")]
    ClassUnloaded(u32),

    /// Heap verification failed
    ///
    /// **When returned:** `ShenandoahVerify` found a broken heap invariant
    ///
    /// **Recovery strategy:** Cannot recover - the collector aborts the process
    #[error("Heap verification failed at {point}: {message}")]
    VerificationFailed { point: String, message: String },

    /// Configuration error
    ///
    /// **When returned:** Options failed validation or named an unknown flag
    ///
    /// **Recovery strategy:** Fix the options or use defaults
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Runtime shutting down
    ///
    /// **When returned:** A request waited for a GC while the runtime stopped
    ///
    /// **Recovery strategy:** None needed; the caller should unwind
    #[error("Runtime is shutting down")]
    ShuttingDown,

    /// Internal error - indicates a bug in SGC
    ///
    /// **When returned:** Invariant violation or unexpected state
    ///
    /// **Recovery strategy:** Cannot recover - this is a bug
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SgcError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SgcError::OutOfMemory { .. } | SgcError::InvalidState { .. } | SgcError::ShuttingDown
        )
    }

    /// Check if this error indicates a bug in the collector
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            SgcError::IllegalTransition { .. }
                | SgcError::VerificationFailed { .. }
                | SgcError::Internal(_)
        )
    }

    /// True for the error surfaced as `java.lang.OutOfMemoryError`
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, SgcError::OutOfMemory { .. })
    }
}

/// Result type alias for SGC operations
pub type Result<T> = std::result::Result<T, SgcError>;

/// Ensure condition is true, otherwise return error
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}
