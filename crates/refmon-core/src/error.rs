use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures of the management operations.
///
/// `PermissionDenied` and `InvalidCredential` render the same message so a
/// caller cannot tell which of the two checks rejected it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("invalid monitor state {0}; admissible states are 0-on, 1-off, 2-rec_on, 3-rec_off")]
    InvalidState(i32),

    #[error("access denied")]
    PermissionDenied,

    #[error("access denied")]
    InvalidCredential,

    #[error("reference monitor is not in a reconfiguration state")]
    NotReconfigurable,

    #[error("path already blacklisted: {0}")]
    AlreadyExists(String),

    #[error("path not found in blacklist: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("audit log unavailable: {0}")]
    LoggingFailure(String),
}

/// Wire name of each error kind, carried in management responses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidState,
    PermissionDenied,
    InvalidCredential,
    NotReconfigurable,
    AlreadyExists,
    NotFound,
    InvalidPath,
    ResourceExhausted,
    LoggingFailure,
    Internal,
}

impl MonitorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MonitorError::InvalidState(_) => ErrorCode::InvalidState,
            MonitorError::PermissionDenied => ErrorCode::PermissionDenied,
            MonitorError::InvalidCredential => ErrorCode::InvalidCredential,
            MonitorError::NotReconfigurable => ErrorCode::NotReconfigurable,
            MonitorError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            MonitorError::NotFound(_) => ErrorCode::NotFound,
            MonitorError::InvalidPath(_) => ErrorCode::InvalidPath,
            MonitorError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            MonitorError::LoggingFailure(_) => ErrorCode::LoggingFailure,
        }
    }

    /// `NotFound` on removal is informational rather than a hard failure.
    pub fn is_informational(&self) -> bool {
        matches!(self, MonitorError::NotFound(_))
    }

    /// Errno for callers following the syscall convention.
    pub fn errno(&self) -> i32 {
        self.code().errno()
    }
}

impl ErrorCode {
    pub fn errno(self) -> i32 {
        match self {
            ErrorCode::InvalidState | ErrorCode::InvalidPath => libc::EINVAL,
            ErrorCode::PermissionDenied | ErrorCode::NotReconfigurable => libc::EPERM,
            ErrorCode::InvalidCredential => libc::EACCES,
            ErrorCode::AlreadyExists => libc::EEXIST,
            ErrorCode::NotFound => libc::ENOENT,
            ErrorCode::ResourceExhausted => libc::ENOMEM,
            ErrorCode::LoggingFailure | ErrorCode::Internal => libc::EIO,
        }
    }
}

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;
