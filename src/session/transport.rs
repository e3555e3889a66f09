/*!
 * Sandbox Transport and Callbacks
 *
 * Narrow interfaces to the isolated process and to the calling application.
 * Requests go out through [`SandboxTransport`]; results come back through
 * the session's signal methods and are forwarded to the caller's callbacks.
 */

use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::types::ApplicationInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

/// Free-form parameters passed through to the module
pub type Params = BTreeMap<String, String>;

/// Load failure codes reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSdkErrorCode {
    ProcessNotAvailable,
    AlreadyLoaded,
    NotFound,
    InternalError,
    SdkDefinedError,
    VerificationFailed,
}

impl fmt::Display for LoadSdkErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Load failure codes reported by the isolated process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxLoadErrorCode {
    AlreadyLoaded,
    NotFound,
    ProviderInitError,
    InstantiationError,
    InternalError,
    SdkDefinedError,
}

impl From<SandboxLoadErrorCode> for LoadSdkErrorCode {
    fn from(code: SandboxLoadErrorCode) -> Self {
        match code {
            SandboxLoadErrorCode::AlreadyLoaded => Self::AlreadyLoaded,
            SandboxLoadErrorCode::NotFound => Self::NotFound,
            SandboxLoadErrorCode::ProviderInitError
            | SandboxLoadErrorCode::InstantiationError
            | SandboxLoadErrorCode::InternalError => Self::InternalError,
            SandboxLoadErrorCode::SdkDefinedError => Self::SdkDefinedError,
        }
    }
}

/// Load failure delivered to [`LoadCallback::on_load_failure`]
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("load failed ({code:?}): {message}")]
pub struct LoadSdkError {
    pub code: LoadSdkErrorCode,
    pub message: String,
}

impl LoadSdkError {
    pub fn new(code: LoadSdkErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The error taxonomy entry this failure belongs to
    pub fn to_sandbox_error(&self) -> SandboxError {
        match self.code {
            LoadSdkErrorCode::ProcessNotAvailable => SandboxError::ProcessDied(self.message.clone()),
            LoadSdkErrorCode::AlreadyLoaded => SandboxError::IllegalState(self.message.clone()),
            LoadSdkErrorCode::NotFound => SandboxError::NotFound(self.message.clone()),
            LoadSdkErrorCode::VerificationFailed => {
                SandboxError::SecurityViolation(self.message.clone())
            }
            LoadSdkErrorCode::InternalError | LoadSdkErrorCode::SdkDefinedError => {
                SandboxError::Internal(self.message.clone())
            }
        }
    }
}

/// Surface package failure codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfacePackageErrorCode {
    NotLoaded,
    InternalError,
    ProcessDied,
    TimedOut,
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("surface package request failed ({code:?}): {message}")]
pub struct SurfacePackageError {
    pub code: SurfacePackageErrorCode,
    pub message: String,
}

impl SurfacePackageError {
    pub fn new(code: SurfacePackageErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Lifecycle ordering mistake rather than a failure in the sandbox
    pub fn is_not_loaded(&self) -> bool {
        self.code == SurfacePackageErrorCode::NotLoaded
    }
}

/// Where a call failed, for latency attribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Success,
    FailedAtSystemServerAppToSandbox,
    FailedAtSandbox,
    FailedAtSystemServerSandboxToApp,
}

/// Timestamps collected while a call crosses the manager and the sandbox
#[derive(Debug, Clone)]
pub struct SandboxLatencyInfo {
    created: Instant,
    call_finished: Option<Instant>,
    received_from_sandbox: Option<Instant>,
    called_app: Option<Instant>,
    status: SandboxStatus,
}

impl Default for SandboxLatencyInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxLatencyInfo {
    pub fn new() -> Self {
        Self {
            created: Instant::now(),
            call_finished: None,
            received_from_sandbox: None,
            called_app: None,
            status: SandboxStatus::Success,
        }
    }

    /// Manager finished its part and handed the call to the sandbox
    pub fn mark_call_finished(&mut self) {
        self.call_finished = Some(Instant::now());
    }

    pub fn mark_received_from_sandbox(&mut self) {
        self.received_from_sandbox = Some(Instant::now());
    }

    /// Result handed back to the calling application
    pub fn mark_called_app(&mut self) {
        self.called_app = Some(Instant::now());
    }

    pub fn set_status(&mut self, status: SandboxStatus) {
        self.status = status;
    }

    pub fn status(&self) -> SandboxStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == SandboxStatus::Success
    }

    /// Time spent in the manager before the call left for the sandbox
    pub fn app_to_sandbox(&self) -> Option<Duration> {
        self.call_finished.map(|t| t.duration_since(self.created))
    }

    /// Time between handing the call to the sandbox and hearing back
    pub fn sandbox_round_trip(&self) -> Option<Duration> {
        match (self.call_finished, self.received_from_sandbox) {
            (Some(sent), Some(received)) => Some(received.saturating_duration_since(sent)),
            _ => None,
        }
    }

    /// Time from creation until the caller was answered
    pub fn total(&self) -> Option<Duration> {
        self.called_app.map(|t| t.duration_since(self.created))
    }
}

/// Handle to a loaded module, returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxedSdk {
    pub module_name: String,
    /// Opaque interface token minted by the sandbox
    pub interface_token: String,
}

/// Rendered surface handed back for a surface request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfacePackage {
    pub surface_package_id: i32,
    pub params: Params,
}

/// Parameters of one surface package request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceRequest {
    pub display_id: i32,
    pub width: u32,
    pub height: u32,
    pub params: Params,
    /// Overrides the configured deadline for this request
    pub timeout: Option<Duration>,
}

impl SurfaceRequest {
    pub fn new(display_id: i32, width: u32, height: u32) -> Self {
        Self {
            display_id,
            width,
            height,
            params: Params::new(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What the isolated process needs to instantiate a module
#[derive(Debug, Clone)]
pub struct LoadRequest<'a> {
    pub calling_package: &'a str,
    pub module_name: &'a str,
    pub provider_class_name: &'a str,
    pub provider_application: &'a ApplicationInfo,
    pub customized_application: &'a ApplicationInfo,
    pub params: &'a Params,
}

/// Outbound half of the channel to one isolated process
///
/// `Err(SandboxError::ProcessDied)` means the process is gone; other errors
/// are treated as internal failures.
pub trait SandboxTransport: Send + Sync {
    fn send_load(&self, request: LoadRequest<'_>) -> SandboxResult<()>;

    fn send_unload(&self, module_name: &str) -> SandboxResult<()>;

    fn send_surface_request(
        &self,
        module_name: &str,
        request_id: Uuid,
        request: &SurfaceRequest,
    ) -> SandboxResult<()>;
}

/// Caller-side load result receiver; invoked at most once
pub trait LoadCallback: Send + Sync {
    fn on_load_success(&self, sdk: SandboxedSdk, latency: SandboxLatencyInfo);
    fn on_load_failure(&self, error: LoadSdkError, latency: SandboxLatencyInfo);
}

pub trait UnloadCallback: Send + Sync {
    fn on_unload(&self, latency: SandboxLatencyInfo);
}

/// Caller-side surface result receiver; invoked once per request
pub trait SurfacePackageCallback: Send + Sync {
    fn on_surface_package_ready(&self, package: SurfacePackage, latency: SandboxLatencyInfo);
    fn on_surface_package_error(&self, error: SurfacePackageError, latency: SandboxLatencyInfo);
}
