//! Error handling module for the sgc launcher.
//!
//! Every failure maps to a process exit code the way a JVM launcher does:
//! bad options exit with 2, an uncaught exception in the main thread with 1.

use sgc::config::ConfigError;
use sgc::SgcError;
use thiserror::Error;

/// Exit code of a successful run
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code when the main thread dies with an uncaught exception
pub const EXIT_UNCAUGHT: i32 = 1;

/// Exit code for invalid options
pub const EXIT_USAGE: i32 = 2;

/// Main error type for the sgc launcher.
#[derive(Error, Debug)]
pub enum RunError {
    /// A VM option was rejected.
    #[error("{0}")]
    Options(#[from] ConfigError),

    /// Workload arguments could not be parsed.
    #[error("Invalid workload arguments: {0}")]
    Usage(String),

    /// The collector failed an operation.
    #[error("{0}")]
    Gc(#[from] SgcError),

    /// A workload read back a value it did not write.
    #[error("Illegal value at index {index}: {value}")]
    Corrupted { index: usize, value: u64 },

    /// A workload thread could not be started.
    #[error("Thread start failed: {0}")]
    ThreadStart(String),

    /// Error when IO operations fail.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error when JSON serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Options(_) | RunError::Usage(_) => EXIT_USAGE,
            RunError::Gc(SgcError::Configuration(_)) => EXIT_USAGE,
            _ => EXIT_UNCAUGHT,
        }
    }

    /// Does this error come from the options rather than the run?
    pub fn is_usage(&self) -> bool {
        self.exit_code() == EXIT_USAGE
    }

    /// Is this an out-of-memory failure?
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, RunError::Gc(SgcError::OutOfMemory { .. }))
    }

    /// The error rendered as the Java exception a program would see
    ///
    /// # Returns
    /// `java.lang.OutOfMemoryError: Java heap space` for allocation failure,
    /// `java.lang.IllegalStateException: ...` for corrupted values, and
    /// `java.lang.Error: ...` for anything else
    pub fn java_exception(&self) -> String {
        match self {
            RunError::Gc(SgcError::OutOfMemory { .. }) => {
                "java.lang.OutOfMemoryError: Java heap space".to_string()
            }
            RunError::Corrupted { .. } => format!("java.lang.IllegalStateException: {}", self),
            other => format!("java.lang.Error: {}", other),
        }
    }
}

/// Result type alias using RunError.
pub type Result<T> = std::result::Result<T, RunError>;
