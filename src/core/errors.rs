/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use crate::policy::PolicyError;
use crate::security::backend::BackendError;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for sandbox construction
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Result type for engine-level operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Sandbox construction errors with serialization support
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error", content = "details", rename_all = "snake_case")]
pub enum SandboxError {
    #[error("Invalid argument: {0}")]
    #[diagnostic(
        code(sandbox::arg_invalid),
        help("A required identity field or configuration value is missing or malformed.")
    )]
    ArgInvalid(String),

    #[error("Policy format error: {0}")]
    #[diagnostic(
        code(sandbox::config_format),
        help("A policy entry has the wrong shape. Check the JSON against the policy schema.")
    )]
    ConfigFormat(String),

    #[error("{op} failed on {path}: errno {errno}")]
    #[diagnostic(
        code(sandbox::mount_syscall),
        help("The kernel rejected a mount or namespace call. See the errno for the cause.")
    )]
    MountSyscall { op: String, path: String, errno: i32 },

    #[error("Resource exhausted: {0}")]
    #[diagnostic(
        code(sandbox::resource_exhausted),
        help("A fixed-capacity table is full.")
    )]
    ResourceExhausted(String),

    #[error("Invalid state: {0}")]
    #[diagnostic(
        code(sandbox::invalid_state),
        help("The operation is not allowed in the current lifecycle stage.")
    )]
    InvalidState(String),

    #[error("I/O error: {0}")]
    #[diagnostic(
        code(sandbox::io_error),
        help("Filesystem operation failed. Check permissions and paths.")
    )]
    Io(String),
}

impl SandboxError {
    /// Errno of a failed syscall, if this error came from one
    pub fn errno(&self) -> Option<i32> {
        match self {
            SandboxError::MountSyscall { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

impl From<BackendError> for SandboxError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Syscall { op, path, errno } => SandboxError::MountSyscall { op, path, errno },
            BackendError::InvalidArgument(msg) => SandboxError::ArgInvalid(msg),
            BackendError::PlatformNotSupported(msg) => SandboxError::InvalidState(msg),
        }
    }
}

impl From<PolicyError> for SandboxError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::Io { .. } => SandboxError::Io(err.to_string()),
            _ => SandboxError::ConfigFormat(err.to_string()),
        }
    }
}

impl From<std::io::Error> for SandboxError {
    fn from(err: std::io::Error) -> Self {
        SandboxError::Io(err.to_string())
    }
}

/// Unified engine error type with miette diagnostics
#[derive(Error, Debug, Diagnostic)]
pub enum EngineError {
    #[error("Sandbox error: {0}")]
    #[diagnostic(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Policy error: {0}")]
    #[diagnostic(transparent)]
    Policy(#[from] PolicyError),

    #[error("Backend error: {0}")]
    #[diagnostic(
        code(engine::backend_error),
        help("A syscall backend operation failed outside sandbox construction.")
    )]
    Backend(#[from] BackendError),

    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(engine::configuration_error),
        help("Invalid engine configuration. Review the SANDBOX_* environment variables.")
    )]
    Configuration(String),

    #[error("I/O error: {0}")]
    #[diagnostic(
        code(engine::io_error),
        help("Filesystem or I/O operation failed. Check file permissions.")
    )]
    Io(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

impl From<String> for EngineError {
    fn from(msg: String) -> Self {
        EngineError::Configuration(msg)
    }
}

impl From<&str> for EngineError {
    fn from(msg: &str) -> Self {
        EngineError::Configuration(msg.to_string())
    }
}
