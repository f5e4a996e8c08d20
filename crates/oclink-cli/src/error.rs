//! Error types for the oclink CLI.

use thiserror::Error;

/// CLI result type alias.
pub type CliResult<T> = Result<T, CliError>;

/// CLI error type.
#[derive(Error, Debug)]
pub enum CliError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error reported by the library.
    #[error("{0}")]
    Oclink(#[from] oclink::OclinkError),

    /// Malformed `--define` argument.
    #[error("Invalid define '{0}': expected NAME=VALUE")]
    InvalidDefine(String),

    /// Invalid backend specification.
    #[error("Invalid backend: {0}")]
    InvalidBackend(String),
}
