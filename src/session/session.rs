/*!
 * Load Session
 *
 * Lifecycle of one module loaded (or loading) on behalf of one caller.
 * All state lives behind a single per-session lock; callbacks are always
 * invoked after the lock is released.
 *
 * Rules:
 * - `load` is accepted once, from `LoadPending` only
 * - success/failure signals apply only while `LoadPending`; later ones are dropped
 * - `unload` while pending is an error, on a failed or unloaded session a no-op
 * - sandbox death wins over everything and fails every outstanding callback
 */

use super::state::LoadStatus;
use super::transport::{
    LoadCallback, LoadRequest, LoadSdkError, LoadSdkErrorCode, Params, SandboxLatencyInfo,
    SandboxLoadErrorCode, SandboxStatus, SandboxTransport, SandboxedSdk, SurfacePackage,
    SurfacePackageCallback, SurfacePackageError, SurfacePackageErrorCode, SurfaceRequest,
    UnloadCallback,
};
use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::limits::DEFAULT_SURFACE_REQUEST_TIMEOUT;
use crate::core::types::{ApplicationInfo, CallingInfo, SdkProviderInfo};
use crate::monitoring::{LatencyStage, NoopTelemetry, StageSpan, TelemetrySink};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Collaborators shared by every session
#[derive(Clone)]
pub struct SessionOptions {
    pub telemetry: Arc<dyn TelemetrySink>,
    /// Runtime used for surface request deadlines; without one requests
    /// are only bounded by unload and sandbox death
    pub timer: Option<tokio::runtime::Handle>,
    pub surface_request_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            telemetry: Arc::new(NoopTelemetry),
            timer: tokio::runtime::Handle::try_current().ok(),
            surface_request_timeout: DEFAULT_SURFACE_REQUEST_TIMEOUT,
        }
    }
}

struct PendingSurface {
    callback: Arc<dyn SurfacePackageCallback>,
    latency: SandboxLatencyInfo,
    span: StageSpan,
}

struct SessionState {
    status: LoadStatus,
    load_dispatched: bool,
    transport: Option<Arc<dyn SandboxTransport>>,
    sandboxed_sdk: Option<SandboxedSdk>,
    load_callback: Option<Arc<dyn LoadCallback>>,
    load_span: Option<StageSpan>,
    pending_surfaces: AHashMap<Uuid, PendingSurface>,
}

/// One (caller, module) load session
pub struct LoadSdkSession {
    calling_info: CallingInfo,
    provider: SdkProviderInfo,
    params: Params,
    options: SessionOptions,
    state: Mutex<SessionState>,
    weak_self: Weak<LoadSdkSession>,
}

impl LoadSdkSession {
    pub fn new(
        calling_info: CallingInfo,
        provider: SdkProviderInfo,
        params: Params,
        load_callback: Arc<dyn LoadCallback>,
        options: SessionOptions,
    ) -> Arc<Self> {
        debug!(
            caller = %calling_info,
            module = %provider.module_name,
            "Load session created"
        );
        Arc::new_cyclic(|weak_self| Self {
            calling_info,
            provider,
            params,
            options,
            state: Mutex::new(SessionState {
                status: LoadStatus::LoadPending,
                load_dispatched: false,
                transport: None,
                sandboxed_sdk: None,
                load_callback: Some(load_callback),
                load_span: None,
                pending_surfaces: AHashMap::new(),
            }),
            weak_self: weak_self.clone(),
        })
    }

    pub fn calling_info(&self) -> &CallingInfo {
        &self.calling_info
    }

    pub fn module_name(&self) -> &str {
        &self.provider.module_name
    }

    pub fn provider_info(&self) -> &SdkProviderInfo {
        &self.provider
    }

    pub fn status(&self) -> LoadStatus {
        self.state.lock().status
    }

    /// Handle returned by the sandbox once loaded
    pub fn sandboxed_sdk(&self) -> Option<SandboxedSdk> {
        self.state.lock().sandboxed_sdk.clone()
    }

    pub fn pending_surface_requests(&self) -> usize {
        self.state.lock().pending_surfaces.len()
    }

    // =========================================================================
    // Load
    // =========================================================================

    /// Ask the isolated process to load this module
    ///
    /// Only the first call on a pending session is accepted; every later call
    /// fails with `IllegalState` and changes nothing. `None` for `transport`
    /// means no isolated process is available and fails the load at once.
    pub fn load(
        &self,
        transport: Option<Arc<dyn SandboxTransport>>,
        customized_info: ApplicationInfo,
        mut latency: SandboxLatencyInfo,
    ) -> SandboxResult<()> {
        {
            let mut state = self.state.lock();
            if state.status != LoadStatus::LoadPending || state.load_dispatched {
                debug!(
                    caller = %self.calling_info,
                    module = %self.module_name(),
                    status = %state.status,
                    "Rejecting repeated load request"
                );
                return Err(SandboxError::IllegalState(format!(
                    "load of {} for {} was already attempted ({})",
                    self.module_name(),
                    self.calling_info,
                    state.status
                )));
            }
            state.load_dispatched = true;
            state.transport = transport.clone();
            state.load_span = Some(StageSpan::new(
                LatencyStage::LoadSdk,
                self.calling_info.uid,
                Arc::clone(&self.options.telemetry),
            ));
        }

        let Some(transport) = transport else {
            latency.set_status(SandboxStatus::FailedAtSystemServerAppToSandbox);
            latency.mark_call_finished();
            debug!(caller = %self.calling_info, "Sandbox is not available");
            self.on_load_failure(
                LoadSdkError::new(
                    LoadSdkErrorCode::ProcessNotAvailable,
                    "sandbox is not available",
                ),
                latency,
            );
            return Ok(());
        };

        latency.mark_call_finished();
        debug!(
            caller = %self.calling_info,
            module = %self.module_name(),
            "Contacting sandbox to load module"
        );
        let request = LoadRequest {
            calling_package: &self.calling_info.package_name,
            module_name: &self.provider.module_name,
            provider_class_name: &self.provider.provider_class_name,
            provider_application: &self.provider.application_info,
            customized_application: &customized_info,
            params: &self.params,
        };
        if let Err(e) = transport.send_load(request) {
            latency.set_status(SandboxStatus::FailedAtSystemServerAppToSandbox);
            let error = match e {
                SandboxError::ProcessDied(_) => LoadSdkError::new(
                    LoadSdkErrorCode::ProcessNotAvailable,
                    "failed to load module as sandbox is dead",
                ),
                other => LoadSdkError::new(
                    LoadSdkErrorCode::InternalError,
                    format!("failed to load module: {}", other),
                ),
            };
            self.on_load_failure(error, latency);
        }
        Ok(())
    }

    /// Fail the load before it reaches the sandbox
    ///
    /// Used when the module is rejected up front, for example by bytecode
    /// verification. Counts as this session's single load attempt.
    pub fn abort_load(&self, error: LoadSdkError, latency: SandboxLatencyInfo) -> SandboxResult<()> {
        {
            let mut state = self.state.lock();
            if state.status != LoadStatus::LoadPending || state.load_dispatched {
                return Err(SandboxError::IllegalState(format!(
                    "load of {} for {} was already attempted ({})",
                    self.module_name(),
                    self.calling_info,
                    state.status
                )));
            }
            state.load_dispatched = true;
            state.load_span = Some(StageSpan::new(
                LatencyStage::LoadSdk,
                self.calling_info.uid,
                Arc::clone(&self.options.telemetry),
            ));
        }
        self.on_load_failure(error, latency);
        Ok(())
    }

    /// Success signal from the isolated process
    pub fn on_load_success(&self, sdk: SandboxedSdk, mut latency: SandboxLatencyInfo) {
        latency.mark_received_from_sandbox();
        let (callback, span) = {
            let mut state = self.state.lock();
            if state.status != LoadStatus::LoadPending || !state.load_dispatched {
                debug!(
                    module = %self.module_name(),
                    status = %state.status,
                    "Dropping late load success"
                );
                return;
            }
            state.status = LoadStatus::Loaded;
            state.sandboxed_sdk = Some(sdk.clone());
            (state.load_callback.take(), state.load_span.take())
        };

        info!(
            caller = %self.calling_info,
            module = %self.module_name(),
            "Module loaded"
        );
        if let Some(span) = span {
            span.finish(true);
        }
        latency.mark_called_app();
        if let Some(callback) = callback {
            callback.on_load_success(sdk, latency);
        }
    }

    /// Failure signal from the isolated process
    pub fn on_sandbox_load_error(
        &self,
        code: SandboxLoadErrorCode,
        message: impl Into<String>,
        mut latency: SandboxLatencyInfo,
    ) {
        latency.mark_received_from_sandbox();
        latency.set_status(SandboxStatus::FailedAtSandbox);
        self.on_load_failure(LoadSdkError::new(code.into(), message), latency);
    }

    /// Fail a pending load
    pub fn on_load_failure(&self, error: LoadSdkError, mut latency: SandboxLatencyInfo) {
        let (callback, span) = {
            let mut state = self.state.lock();
            if state.status != LoadStatus::LoadPending || !state.load_dispatched {
                debug!(
                    module = %self.module_name(),
                    status = %state.status,
                    "Dropping late load failure"
                );
                return;
            }
            state.status = LoadStatus::LoadFailed;
            (state.load_callback.take(), state.load_span.take())
        };

        warn!(
            caller = %self.calling_info,
            module = %self.module_name(),
            code = %error.code,
            error = %error.message,
            "Module failed to load"
        );
        if let Some(span) = span {
            span.finish(false);
        }
        latency.mark_called_app();
        if let Some(callback) = callback {
            callback.on_load_failure(error, latency);
        }
    }

    // =========================================================================
    // Unload
    // =========================================================================

    /// Unload a loaded module
    ///
    /// `IllegalState` while the load is pending. A failed or already unloaded
    /// session is left as is and nothing is sent to the sandbox.
    pub fn unload(
        &self,
        mut latency: SandboxLatencyInfo,
        callback: Arc<dyn UnloadCallback>,
    ) -> SandboxResult<()> {
        let (transport, cancelled) = {
            let mut state = self.state.lock();
            match state.status {
                LoadStatus::LoadPending => {
                    return Err(SandboxError::IllegalState(format!(
                        "module {} is still loading for {}; unload after it has loaded",
                        self.module_name(),
                        self.calling_info
                    )));
                }
                LoadStatus::Loaded => {
                    state.status = LoadStatus::Unloaded;
                    state.sandboxed_sdk = None;
                    let cancelled: Vec<PendingSurface> =
                        state.pending_surfaces.drain().map(|(_, p)| p).collect();
                    (state.transport.take(), cancelled)
                }
                LoadStatus::LoadFailed | LoadStatus::Unloaded => {
                    info!(
                        caller = %self.calling_info,
                        module = %self.module_name(),
                        status = %state.status,
                        "Module is not loaded, ignoring unload"
                    );
                    return Ok(());
                }
            }
        };

        let span = StageSpan::new(
            LatencyStage::UnloadSdk,
            self.calling_info.uid,
            Arc::clone(&self.options.telemetry),
        );
        fail_surfaces(
            cancelled,
            SurfacePackageErrorCode::Cancelled,
            "module was unloaded before the surface package was ready",
        );

        latency.mark_call_finished();
        let sent = match transport {
            Some(transport) => match transport.send_unload(self.module_name()) {
                Ok(()) => true,
                Err(SandboxError::ProcessDied(_)) => {
                    info!(
                        caller = %self.calling_info,
                        module = %self.module_name(),
                        "Sandbox is dead, module already gone"
                    );
                    true
                }
                Err(e) => {
                    warn!(module = %self.module_name(), error = %e, "Failed to unload module");
                    false
                }
            },
            None => true,
        };

        info!(
            caller = %self.calling_info,
            module = %self.module_name(),
            "Module unloaded"
        );
        span.finish(sent);
        latency.mark_called_app();
        callback.on_unload(latency);
        Ok(())
    }

    // =========================================================================
    // Surface packages
    // =========================================================================

    /// Request a surface package from the loaded module
    ///
    /// Never returns an error: every outcome, including "not loaded", is
    /// delivered to `callback` exactly once. The returned id identifies the
    /// request in later signals.
    pub fn request_surface_package(
        &self,
        request: SurfaceRequest,
        mut latency: SandboxLatencyInfo,
        callback: Arc<dyn SurfacePackageCallback>,
    ) -> Uuid {
        let request_id = Uuid::new_v4();
        let span = StageSpan::new(
            LatencyStage::RequestSurfacePackage,
            self.calling_info.uid,
            Arc::clone(&self.options.telemetry),
        );

        let transport = {
            let mut state = self.state.lock();
            if state.status != LoadStatus::Loaded {
                let status = state.status;
                drop(state);
                latency.mark_call_finished();
                latency.set_status(SandboxStatus::FailedAtSystemServerAppToSandbox);
                fail_surfaces(
                    vec![PendingSurface {
                        callback,
                        latency,
                        span,
                    }],
                    SurfacePackageErrorCode::NotLoaded,
                    &format!("module {} is not loaded ({})", self.module_name(), status),
                );
                return request_id;
            }
            latency.mark_call_finished();
            state.pending_surfaces.insert(
                request_id,
                PendingSurface {
                    callback,
                    latency,
                    span,
                },
            );
            state.transport.clone()
        };

        self.arm_surface_timeout(request_id, request.timeout);

        let sent = match transport {
            Some(transport) => {
                transport.send_surface_request(self.module_name(), request_id, &request)
            }
            None => Err(SandboxError::Internal("no sandbox transport".to_string())),
        };
        if let Err(e) = sent {
            let (code, message) = match e {
                SandboxError::ProcessDied(msg) => (SurfacePackageErrorCode::ProcessDied, msg),
                other => (SurfacePackageErrorCode::InternalError, other.to_string()),
            };
            self.fail_surface_request(request_id, code, &message);
        }
        request_id
    }

    /// Surface package produced by the sandbox
    pub fn on_surface_package_ready(
        &self,
        request_id: Uuid,
        package: SurfacePackage,
        latency: SandboxLatencyInfo,
    ) {
        let Some(pending) = self.state.lock().pending_surfaces.remove(&request_id) else {
            debug!(request = %request_id, "Dropping surface package for finished request");
            return;
        };
        let mut merged = pending.latency;
        merged.mark_received_from_sandbox();
        merged.set_status(latency.status());
        merged.mark_called_app();
        pending.span.finish(true);
        pending.callback.on_surface_package_ready(package, merged);
    }

    /// Surface request failed inside the sandbox
    pub fn on_surface_package_error(
        &self,
        request_id: Uuid,
        error: SurfacePackageError,
        _latency: SandboxLatencyInfo,
    ) {
        let Some(mut pending) = self.state.lock().pending_surfaces.remove(&request_id) else {
            debug!(request = %request_id, "Dropping surface error for finished request");
            return;
        };
        pending.latency.mark_received_from_sandbox();
        pending.latency.set_status(SandboxStatus::FailedAtSandbox);
        fail_surfaces(vec![pending], error.code, &error.message);
    }

    fn fail_surface_request(&self, request_id: Uuid, code: SurfacePackageErrorCode, message: &str) {
        let pending = self.state.lock().pending_surfaces.remove(&request_id);
        if let Some(pending) = pending {
            fail_surfaces(vec![pending], code, message);
        }
    }

    fn arm_surface_timeout(&self, request_id: Uuid, timeout: Option<Duration>) {
        let Some(timer) = &self.options.timer else {
            debug!(request = %request_id, "No timer runtime, surface request is unbounded");
            return;
        };
        let timeout = timeout.unwrap_or(self.options.surface_request_timeout);
        let session = self.weak_self.clone();
        timer.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(session) = session.upgrade() {
                session.fail_surface_request(
                    request_id,
                    SurfacePackageErrorCode::TimedOut,
                    &format!("surface package not ready within {:?}", timeout),
                );
            }
        });
    }

    // =========================================================================
    // Death
    // =========================================================================

    /// The isolated process died
    ///
    /// Idempotent. Always ends in `Unloaded`; a pending load and every
    /// outstanding surface request are failed exactly once.
    pub fn on_sandbox_death(&self) {
        let (previous, load_callback, load_span, surfaces) = {
            let mut state = self.state.lock();
            let previous = state.status;
            state.status = LoadStatus::Unloaded;
            state.transport = None;
            state.sandboxed_sdk = None;
            let surfaces: Vec<PendingSurface> =
                state.pending_surfaces.drain().map(|(_, p)| p).collect();
            (
                previous,
                state.load_callback.take(),
                state.load_span.take(),
                surfaces,
            )
        };

        if previous != LoadStatus::Unloaded {
            info!(
                caller = %self.calling_info,
                module = %self.module_name(),
                previous = %previous,
                "Sandbox died, session unloaded"
            );
        }

        if let Some(span) = load_span {
            span.finish(false);
        }
        if let Some(callback) = load_callback {
            let mut latency = SandboxLatencyInfo::new();
            latency.set_status(SandboxStatus::FailedAtSandbox);
            latency.mark_called_app();
            callback.on_load_failure(
                LoadSdkError::new(
                    LoadSdkErrorCode::ProcessNotAvailable,
                    "could not load module, sandbox has died",
                ),
                latency,
            );
        }
        fail_surfaces(
            surfaces,
            SurfacePackageErrorCode::ProcessDied,
            "sandbox died, could not request surface package",
        );
    }
}

fn fail_surfaces(pending: Vec<PendingSurface>, code: SurfacePackageErrorCode, message: &str) {
    for PendingSurface {
        callback,
        mut latency,
        span,
    } in pending
    {
        span.finish(false);
        latency.mark_called_app();
        callback.on_surface_package_error(SurfacePackageError::new(code, message), latency);
    }
}

impl std::fmt::Debug for LoadSdkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadSdkSession")
            .field("calling_info", &self.calling_info)
            .field("module", &self.provider.module_name)
            .field("status", &self.status())
            .finish()
    }
}
