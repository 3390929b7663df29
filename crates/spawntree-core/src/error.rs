//! Error types for spawntree.

use thiserror::Error;

/// Exit code reported by a node that hit an injected failure.
pub const SYNTHETIC_FAILURE_EXIT_CODE: i32 = 10;

/// Result type alias using spawntree Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for spawntree operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed marker argument, config file or value
    #[error("Configuration error: {0}")]
    Config(String),

    /// The OS refused to create a child process
    #[error("Failed to spawn child (identity {identity}, depth {depth}): {source}")]
    Spawn {
        identity: u32,
        depth: u32,
        #[source]
        source: std::io::Error,
    },

    /// Injected failure used to exercise failure-detection tooling
    #[error("Encountered test error process #{identity}")]
    SyntheticFailure { identity: u32 },

    /// Process-tree inspection error
    #[error("Inspection error: {0}")]
    Inspect(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit code for this error.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::SyntheticFailure { .. } => SYNTHETIC_FAILURE_EXIT_CODE,
            _ => 1,
        }
    }
}
