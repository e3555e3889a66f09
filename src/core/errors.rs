/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by verification, session lifecycle and restriction enforcement
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SandboxError {
    #[error("Not found: {0}")]
    #[diagnostic(
        code(sandbox::not_found),
        help("The referenced module, container or segment does not exist.")
    )]
    NotFound(String),

    #[error("Corrupt format: {0}")]
    #[diagnostic(
        code(sandbox::corrupt_format),
        help("The bytecode or allow-list document is malformed. The previous allow-list stays in effect.")
    )]
    CorruptFormat(String),

    #[error("Illegal state: {0}")]
    #[diagnostic(
        code(sandbox::illegal_state),
        help("The operation is not permitted in the current session state.")
    )]
    IllegalState(String),

    #[error("Security violation: {0}")]
    #[diagnostic(
        code(sandbox::security_violation),
        help("The sandboxed module attempted an action that the restriction policy denies.")
    )]
    SecurityViolation(String),

    #[error("Sandbox process died: {0}")]
    #[diagnostic(
        code(sandbox::process_died),
        help("The isolated process terminated. Pending requests on its sessions were failed.")
    )]
    ProcessDied(String),

    #[error("Timed out: {0}")]
    #[diagnostic(
        code(sandbox::timeout),
        help("A bounded wait exceeded its deadline. Retrying is up to the caller.")
    )]
    Timeout(String),

    #[error("Cancelled: {0}")]
    #[diagnostic(code(sandbox::cancelled))]
    Cancelled(String),

    #[error("Internal error: {0}")]
    #[diagnostic(code(sandbox::internal))]
    Internal(String),
}

impl SandboxError {
    #[inline]
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::SecurityViolation(_))
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    #[inline]
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Self::IllegalState(_))
    }

    /// Short machine-readable name used in logs and audit records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::CorruptFormat(_) => "corrupt_format",
            Self::IllegalState(_) => "illegal_state",
            Self::SecurityViolation(_) => "security_violation",
            Self::ProcessDied(_) => "process_died",
            Self::Timeout(_) => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for SandboxError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => SandboxError::NotFound(err.to_string()),
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::InvalidData => {
                SandboxError::CorruptFormat(err.to_string())
            }
            _ => SandboxError::Internal(err.to_string()),
        }
    }
}

impl From<prost::DecodeError> for SandboxError {
    fn from(err: prost::DecodeError) -> Self {
        SandboxError::CorruptFormat(format!("protobuf decode failed: {}", err))
    }
}

impl From<base64::DecodeError> for SandboxError {
    fn from(err: base64::DecodeError) -> Self {
        SandboxError::CorruptFormat(format!("base64 decode failed: {}", err))
    }
}

impl From<zip::result::ZipError> for SandboxError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => io.into(),
            zip::result::ZipError::FileNotFound => {
                SandboxError::NotFound("archive entry not found".to_string())
            }
            other => SandboxError::CorruptFormat(format!("invalid archive: {}", other)),
        }
    }
}

impl From<serde_json::Error> for SandboxError {
    fn from(err: serde_json::Error) -> Self {
        SandboxError::CorruptFormat(format!("invalid JSON document: {}", err))
    }
}

pub type SandboxResult<T> = Result<T, SandboxError>;
