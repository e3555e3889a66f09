/*!
 * Sandbox Manager
 *
 * Entry point tying verification, load sessions and restrictions together.
 * The host binds the isolated process and hands its transport in; this
 * type decides what happens with it.
 */

use crate::config::SandboxCoreConfig;
use crate::core::dispatch::CallbackExecutor;
use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::types::{ApplicationInfo, CallingInfo, SdkProviderInfo, TargetSdkVersion, Uid};
use crate::monitoring::TelemetrySink;
use crate::restrictions::{
    DispatchDescriptor, PropertySource, RestrictionPolicyEngine, RestrictionSettingsStore,
};
use crate::session::{
    LoadCallback, LoadSdkError, LoadSdkErrorCode, LoadSdkSession, LoadStatus, Params,
    SandboxLatencyInfo, SandboxStatus, SandboxTransport, SandboxedSdk, SessionOptions,
    SessionRegistry, SurfacePackageCallback, SurfacePackageError, SurfacePackageErrorCode,
    SurfaceRequest, UnloadCallback,
};
use crate::verifier::{AllowlistCatalog, SdkDexVerifier, Verdict};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One load request from a client application
#[derive(Debug, Clone)]
pub struct LoadSdkRequest {
    pub calling_info: CallingInfo,
    pub provider: SdkProviderInfo,
    /// Application info the sandbox should instantiate the module with;
    /// defaults to the provider's own
    pub customized_info: Option<ApplicationInfo>,
    pub params: Params,
}

impl LoadSdkRequest {
    pub fn new(calling_info: CallingInfo, provider: SdkProviderInfo) -> Self {
        Self {
            calling_info,
            provider,
            customized_info: None,
            params: Params::new(),
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

/// Facade over the sandbox core
pub struct SdkSandboxManager {
    config: SandboxCoreConfig,
    registry: SessionRegistry,
    verifier: Option<Arc<SdkDexVerifier>>,
    restrictions: Arc<RestrictionPolicyEngine>,
    executor: Arc<dyn CallbackExecutor>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SdkSandboxManager {
    /// Build a manager without bytecode verification
    ///
    /// Surface request deadlines use the current Tokio runtime when there is
    /// one; see [`SdkSandboxManager::with_timer`].
    pub fn new(
        config: SandboxCoreConfig,
        properties: Arc<dyn PropertySource>,
        executor: Arc<dyn CallbackExecutor>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let settings = Arc::new(RestrictionSettingsStore::new(
            properties,
            config.restrictions.property_namespace.clone(),
        ));
        let restrictions = Arc::new(RestrictionPolicyEngine::new(
            settings,
            &config.restrictions,
            Arc::clone(&telemetry),
        ));
        let registry = SessionRegistry::new(SessionOptions {
            telemetry: Arc::clone(&telemetry),
            timer: tokio::runtime::Handle::try_current().ok(),
            surface_request_timeout: config.sessions.surface_request_timeout,
        });

        info!(
            verification = config.verification.enabled,
            namespace = %config.restrictions.property_namespace,
            "Sandbox manager initialized"
        );

        Self {
            config,
            registry,
            verifier: None,
            restrictions,
            executor,
            telemetry,
        }
    }

    /// Enable bytecode verification against `catalog`
    ///
    /// Has no effect when verification is disabled in the configuration.
    pub fn with_verifier(mut self, catalog: AllowlistCatalog) -> SandboxResult<Self> {
        if !self.config.verification.enabled {
            debug!("Verification disabled, allow-list catalog ignored");
            return Ok(self);
        }
        self.verifier = Some(Arc::new(SdkDexVerifier::new(
            catalog,
            self.config.verification.clone(),
            Arc::clone(&self.executor),
            Arc::clone(&self.telemetry),
        )?));
        Ok(self)
    }

    /// Use `handle` for surface request deadlines
    ///
    /// Must be called before the first load; sessions already opened keep
    /// the previous timer.
    pub fn with_timer(mut self, handle: tokio::runtime::Handle) -> Self {
        self.registry = SessionRegistry::new(SessionOptions {
            telemetry: Arc::clone(&self.telemetry),
            timer: Some(handle),
            surface_request_timeout: self.config.sessions.surface_request_timeout,
        });
        self
    }

    pub fn config(&self) -> &SandboxCoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn verifier(&self) -> Option<&Arc<SdkDexVerifier>> {
        self.verifier.as_ref()
    }

    pub fn restrictions(&self) -> &Arc<RestrictionPolicyEngine> {
        &self.restrictions
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Load a module into the caller's sandbox
    ///
    /// A second request while a session for the same module is pending or
    /// loaded is rejected with `AlreadyLoaded` and the callback is not used.
    /// Every other outcome reaches `callback` exactly once. When the module
    /// has a code container and verification is enabled, it is loaded only
    /// after a passing verdict.
    pub fn load_sdk(
        &self,
        request: LoadSdkRequest,
        transport: Option<Arc<dyn SandboxTransport>>,
        callback: Arc<dyn LoadCallback>,
    ) -> Result<Arc<LoadSdkSession>, LoadSdkError> {
        let LoadSdkRequest {
            calling_info,
            provider,
            customized_info,
            params,
        } = request;
        let customized_info =
            customized_info.unwrap_or_else(|| provider.application_info.clone());
        let container = provider.application_info.source_dir.clone();
        let target_sdk = provider.application_info.target_sdk_version;

        let session = self
            .registry
            .open_session(calling_info, provider, params, callback)?;
        let latency = SandboxLatencyInfo::new();

        match (&self.verifier, container) {
            (Some(verifier), Some(container)) => {
                let pending = Arc::clone(&session);
                let queued = verifier.verify_module(
                    container,
                    session.module_name(),
                    target_sdk,
                    session.calling_info().uid,
                    move |result| {
                        finish_verification(&pending, result, transport, customized_info, latency)
                    },
                );
                if let Err(e) = queued {
                    warn!(
                        module = %session.module_name(),
                        error = %e,
                        "Could not queue verification"
                    );
                    let mut latency = SandboxLatencyInfo::new();
                    latency.set_status(SandboxStatus::FailedAtSystemServerAppToSandbox);
                    abort(
                        &session,
                        LoadSdkError::new(
                            LoadSdkErrorCode::InternalError,
                            format!("verification could not start: {}", e),
                        ),
                        latency,
                    );
                }
            }
            _ => {
                session
                    .load(transport, customized_info, latency)
                    .map_err(|e| {
                        LoadSdkError::new(LoadSdkErrorCode::InternalError, e.to_string())
                    })?;
            }
        }
        Ok(session)
    }

    /// Unload a module; `NotFound` when it was never requested
    pub fn unload_sdk(
        &self,
        calling_info: &CallingInfo,
        module_name: &str,
        callback: Arc<dyn UnloadCallback>,
    ) -> SandboxResult<()> {
        let session = self.session(calling_info, module_name)?;
        session.unload(SandboxLatencyInfo::new(), callback)
    }

    /// Request a surface package; every outcome reaches `callback`
    pub fn request_surface_package(
        &self,
        calling_info: &CallingInfo,
        module_name: &str,
        request: SurfaceRequest,
        callback: Arc<dyn SurfacePackageCallback>,
    ) -> Uuid {
        match self.registry.get(calling_info, module_name) {
            Some(session) => {
                session.request_surface_package(request, SandboxLatencyInfo::new(), callback)
            }
            None => {
                let mut latency = SandboxLatencyInfo::new();
                latency.set_status(SandboxStatus::FailedAtSystemServerAppToSandbox);
                latency.mark_called_app();
                callback.on_surface_package_error(
                    SurfacePackageError::new(
                        SurfacePackageErrorCode::NotLoaded,
                        format!("module {} is not loaded", module_name),
                    ),
                    latency,
                );
                Uuid::new_v4()
            }
        }
    }

    /// Death notification for a caller's sandbox process
    pub fn notify_sandbox_died(&self, calling_info: &CallingInfo) -> usize {
        self.registry.on_sandbox_death(calling_info)
    }

    pub fn session_status(
        &self,
        calling_info: &CallingInfo,
        module_name: &str,
    ) -> Option<LoadStatus> {
        self.registry
            .get(calling_info, module_name)
            .map(|session| session.status())
    }

    /// Handles of every module currently loaded for the caller
    pub fn loaded_sdks(&self, calling_info: &CallingInfo) -> Vec<SandboxedSdk> {
        self.registry
            .sessions_for(calling_info)
            .iter()
            .filter_map(|session| session.sandboxed_sdk())
            .collect()
    }

    fn session(
        &self,
        calling_info: &CallingInfo,
        module_name: &str,
    ) -> SandboxResult<Arc<LoadSdkSession>> {
        self.registry.get(calling_info, module_name).ok_or_else(|| {
            SandboxError::NotFound(format!(
                "module {} was not requested by {}",
                module_name, calling_info
            ))
        })
    }

    // =========================================================================
    // Restrictions
    // =========================================================================

    /// Check an action attempted from inside the sandbox
    pub fn enforce_action(
        &self,
        descriptor: &DispatchDescriptor,
        target_sdk: TargetSdkVersion,
        caller_uid: Uid,
    ) -> SandboxResult<()> {
        self.restrictions.enforce(descriptor, target_sdk, caller_uid)
    }

    pub fn is_action_allowed(
        &self,
        descriptor: &DispatchDescriptor,
        target_sdk: TargetSdkVersion,
    ) -> bool {
        self.restrictions.is_action_allowed(descriptor, target_sdk)
    }

    /// Change notification from the property source
    pub fn on_properties_changed<S: AsRef<str>>(
        &self,
        namespace: &str,
        changed_keys: &[S],
    ) -> SandboxResult<()> {
        self.restrictions
            .settings()
            .on_properties_changed(namespace, changed_keys)
    }
}

fn finish_verification(
    session: &LoadSdkSession,
    result: SandboxResult<Verdict>,
    transport: Option<Arc<dyn SandboxTransport>>,
    customized_info: ApplicationInfo,
    latency: SandboxLatencyInfo,
) {
    match result {
        Ok(verdict) if verdict.passed() => {
            debug!(
                module = %session.module_name(),
                segments = verdict.segments_checked,
                "Verification passed"
            );
            if let Err(e) = session.load(transport, customized_info, latency) {
                debug!(
                    module = %session.module_name(),
                    error = %e,
                    "Session moved on during verification"
                );
            }
        }
        Ok(verdict) => {
            let mut latency = latency;
            latency.set_status(SandboxStatus::FailedAtSystemServerAppToSandbox);
            abort(
                session,
                LoadSdkError::new(LoadSdkErrorCode::VerificationFailed, verdict.describe()),
                latency,
            );
        }
        Err(e) => {
            let mut latency = latency;
            latency.set_status(SandboxStatus::FailedAtSystemServerAppToSandbox);
            abort(
                session,
                LoadSdkError::new(
                    LoadSdkErrorCode::InternalError,
                    format!("verification failed with {}: {}", e.kind(), e),
                ),
                latency,
            );
        }
    }
}

fn abort(session: &LoadSdkSession, error: LoadSdkError, latency: SandboxLatencyInfo) {
    if let Err(e) = session.abort_load(error, latency) {
        debug!(
            module = %session.module_name(),
            error = %e,
            "Session moved on during verification"
        );
    }
}

impl std::fmt::Debug for SdkSandboxManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkSandboxManager")
            .field("sessions", &self.registry.len())
            .field("verification", &self.verifier.is_some())
            .field("restrictions", &self.restrictions)
            .finish()
    }
}
