//! Error types for oclink.

use thiserror::Error;

use crate::status::Status;

/// Result type alias for oclink operations.
pub type Result<T> = std::result::Result<T, OclinkError>;

/// Errors raised while moving data between host and device or dispatching kernels.
#[derive(Error, Debug)]
pub enum OclinkError {
    /// A variable, kernel or group was constructed with an invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A caller contract was violated (empty ring read, out-of-range transfer).
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// A device operation failed but the execution context is still usable.
    #[error("Device error in {context}: {status}")]
    Device {
        /// Status reported by the device.
        status: Status,
        /// Variable, argument or operation involved.
        context: String,
    },

    /// The execution context is broken and no further work can succeed on it.
    #[error("Fatal device error in {context}: {status}")]
    Fatal {
        /// Status reported by the device.
        status: Status,
        /// Variable, argument or operation involved.
        context: String,
    },

    /// A `#include` directive could not be resolved.
    #[error("Could not find kernel include file `{include}` (searched {searched:?})")]
    IncludeNotFound {
        /// The include path as written in the source.
        include: String,
        /// Every candidate path that was tried.
        searched: Vec<String>,
    },

    /// Include expansion did not terminate within the configured depth.
    #[error("Include expansion exceeded depth {depth} while expanding `{include}`")]
    IncludeCycle {
        /// The include that was being expanded when the limit was hit.
        include: String,
        /// The configured maximum depth.
        depth: usize,
    },

    /// Program compilation failed.
    #[error("Kernel compilation failed: {0}")]
    Compilation(String),

    /// The requested backend is not compiled in or has no devices.
    #[error("Backend not available: {0}")]
    BackendUnavailable(String),

    /// IO error while reading kernel sources.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl OclinkError {
    /// Build a device error, escalating to [`OclinkError::Fatal`] for broken contexts.
    pub fn device(status: Status, context: impl Into<String>) -> Self {
        let context = context.into();
        if status.is_fatal() {
            Self::Fatal { status, context }
        } else {
            Self::Device { status, context }
        }
    }

    /// Create a precondition error.
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Device status carried by this error, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Device { status, .. } | Self::Fatal { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether execution cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// Whether this is a device error the caller may log and move past.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Device { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_classification() {
        let err = OclinkError::device(Status::INVALID_COMMAND_QUEUE, "upload");
        assert!(err.is_fatal());
        assert_eq!(err.status(), Some(Status::INVALID_COMMAND_QUEUE));

        let err = OclinkError::device(Status::INVALID_VALUE, "upload");
        assert!(err.is_recoverable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_error_display_carries_context() {
        let err = OclinkError::device(Status::INVALID_MEM_OBJECT, "variable `weights`");
        let text = err.to_string();
        assert!(text.contains("weights"));
        assert!(text.contains("CL memory object is invalid!"));
    }
}
