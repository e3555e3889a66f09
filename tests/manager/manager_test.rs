/*!
 * Sandbox Manager Tests
 * Verification gating, session routing and restriction checks
 */

use crate::common::{caller, link, provider, sdk, write_apk, DexBuilder, FakeTransport};
use crate::common::{LoadRecorder, SurfaceRecorder, UnloadRecorder};
use sdksandbox_core::monitoring::RecordingTelemetry;
use sdksandbox_core::restrictions::{keys, MemoryPropertySource};
use sdksandbox_core::session::{
    LoadSdkErrorCode, SandboxLatencyInfo, SurfacePackageErrorCode, SurfaceRequest,
};
use sdksandbox_core::verifier::{AllowedApi, ApiAllowlist};
use sdksandbox_core::{
    AllowlistCatalog, CallbackExecutor, DispatchDescriptor, HandlerThread, LatencyStage,
    LoadSdkRequest, LoadStatus, SandboxCoreConfig, SandboxError, SdkSandboxManager,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);
const MODULE: &str = "com.example.sdk";

struct Fixture {
    manager: SdkSandboxManager,
    properties: Arc<MemoryPropertySource>,
    telemetry: Arc<RecordingTelemetry>,
}

fn fixture(config: SandboxCoreConfig) -> Fixture {
    let properties = Arc::new(MemoryPropertySource::new());
    let telemetry = Arc::new(RecordingTelemetry::new());
    let executor: Arc<dyn CallbackExecutor> = HandlerThread::spawn("manager-test").unwrap();
    let manager = SdkSandboxManager::new(config, properties.clone(), executor, telemetry.clone());
    Fixture {
        manager,
        properties,
        telemetry,
    }
}

fn verifying_fixture(apis: Vec<AllowedApi>) -> Fixture {
    let Fixture {
        manager,
        properties,
        telemetry,
    } = fixture(SandboxCoreConfig::default());
    let mut catalog = AllowlistCatalog::new();
    catalog.insert(33, ApiAllowlist::from_apis(apis));
    Fixture {
        manager: manager.with_verifier(catalog).unwrap(),
        properties,
        telemetry,
    }
}

fn module_apk(dir: &Path) -> PathBuf {
    let apk = dir.join("module.apk");
    write_apk(
        &apk,
        &[(
            "classes.dex",
            DexBuilder::new()
                .define_class("Lcom/example/sdk/Entry;")
                .method("LX;", "m1", &[], "V")
                .build(),
        )],
    );
    apk
}

fn request(source_dir: Option<PathBuf>) -> LoadSdkRequest {
    LoadSdkRequest::new(caller(), provider(MODULE, source_dir))
}

fn wait_for_dispatch(transport: &FakeTransport) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if !transport.loads().is_empty() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn provider_access(authority: &str) -> DispatchDescriptor {
    DispatchDescriptor::AccessContentProvider {
        authority: authority.to_string(),
    }
}

#[test]
fn test_load_without_container_dispatches_directly() {
    let fx = fixture(SandboxCoreConfig::default());
    let transport = FakeTransport::new();
    let callback = LoadRecorder::new();

    let session = fx
        .manager
        .load_sdk(request(None), link(&transport), callback.clone())
        .unwrap();
    assert_eq!(transport.loads(), vec![MODULE]);

    session.on_load_success(sdk(), SandboxLatencyInfo::new());
    assert_eq!(callback.results(), vec![Ok(sdk())]);
    assert_eq!(fx.manager.session_status(&caller(), MODULE), Some(LoadStatus::Loaded));
    assert_eq!(fx.manager.loaded_sdks(&caller()), vec![sdk()]);
}

#[test]
fn test_verified_module_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let fx = verifying_fixture(vec![AllowedApi::class("X")]);
    let transport = FakeTransport::new();
    let callback = LoadRecorder::new();

    let session = fx
        .manager
        .load_sdk(
            request(Some(module_apk(dir.path()))),
            link(&transport),
            callback.clone(),
        )
        .unwrap();

    assert!(wait_for_dispatch(&transport));
    session.on_load_success(sdk(), SandboxLatencyInfo::new());
    assert_eq!(callback.results(), vec![Ok(sdk())]);

    let records = fx.telemetry.records_for(LatencyStage::VerifyModule);
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
}

#[test]
fn test_rejected_module_never_reaches_sandbox() {
    let dir = tempfile::tempdir().unwrap();
    let fx = verifying_fixture(vec![AllowedApi::method("X", "m2")]);
    let transport = FakeTransport::new();
    let callback = LoadRecorder::new();

    fx.manager
        .load_sdk(
            request(Some(module_apk(dir.path()))),
            link(&transport),
            callback.clone(),
        )
        .unwrap();

    assert!(callback.wait(WAIT));
    let results = callback.results();
    assert_eq!(results.len(), 1);
    let error = results[0].as_ref().unwrap_err();
    assert_eq!(error.code, LoadSdkErrorCode::VerificationFailed);
    assert!(error.message.contains("X.m1"), "{}", error.message);

    assert!(transport.loads().is_empty());
    assert_eq!(
        fx.manager.session_status(&caller(), MODULE),
        Some(LoadStatus::LoadFailed)
    );
}

#[test]
fn test_verification_disabled_skips_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SandboxCoreConfig::default();
    config.verification.enabled = false;
    let fx = fixture(config);
    let manager = fx.manager.with_verifier(AllowlistCatalog::new()).unwrap();
    assert!(manager.verifier().is_none());

    let transport = FakeTransport::new();
    manager
        .load_sdk(
            request(Some(module_apk(dir.path()))),
            link(&transport),
            LoadRecorder::new(),
        )
        .unwrap();
    assert_eq!(transport.loads(), vec![MODULE]);
}

#[test]
fn test_duplicate_load_rejected_synchronously() {
    let fx = fixture(SandboxCoreConfig::default());
    let transport = FakeTransport::new();
    let first = LoadRecorder::new();
    let second = LoadRecorder::new();

    fx.manager
        .load_sdk(request(None), link(&transport), first)
        .unwrap();
    let err = fx
        .manager
        .load_sdk(request(None), link(&transport), second.clone())
        .err()
        .unwrap();

    assert_eq!(err.code, LoadSdkErrorCode::AlreadyLoaded);
    assert_eq!(second.count(), 0);
    assert_eq!(transport.loads().len(), 1);
}

#[test]
fn test_unload_unknown_module_not_found() {
    let fx = fixture(SandboxCoreConfig::default());
    let result = fx
        .manager
        .unload_sdk(&caller(), "com.example.missing", UnloadRecorder::new());
    assert!(matches!(result, Err(SandboxError::NotFound(_))));
}

#[test]
fn test_unload_loaded_module() {
    let fx = fixture(SandboxCoreConfig::default());
    let transport = FakeTransport::new();
    let session = fx
        .manager
        .load_sdk(request(None), link(&transport), LoadRecorder::new())
        .unwrap();
    session.on_load_success(sdk(), SandboxLatencyInfo::new());

    let unloaded = UnloadRecorder::new();
    fx.manager
        .unload_sdk(&caller(), MODULE, unloaded.clone())
        .unwrap();

    assert_eq!(unloaded.count(), 1);
    assert_eq!(transport.unloads(), vec![MODULE]);
    assert_eq!(
        fx.manager.session_status(&caller(), MODULE),
        Some(LoadStatus::Unloaded)
    );
    assert!(fx.manager.loaded_sdks(&caller()).is_empty());
}

#[test]
fn test_surface_request_without_session_not_loaded() {
    let fx = fixture(SandboxCoreConfig::default());
    let callback = SurfaceRecorder::new();

    fx.manager.request_surface_package(
        &caller(),
        MODULE,
        SurfaceRequest::new(0, 320, 50),
        callback.clone(),
    );

    let results = callback.results();
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].as_ref().unwrap_err().code,
        SurfacePackageErrorCode::NotLoaded
    );
}

#[test]
fn test_sandbox_death_fails_pending_load() {
    let fx = fixture(SandboxCoreConfig::default());
    let transport = FakeTransport::new();
    let callback = LoadRecorder::new();
    let session = fx
        .manager
        .load_sdk(request(None), link(&transport), callback.clone())
        .unwrap();

    assert_eq!(fx.manager.notify_sandbox_died(&caller()), 1);
    session.on_load_success(sdk(), SandboxLatencyInfo::new());

    let results = callback.results();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());
    assert!(!fx
        .manager
        .session_status(&caller(), MODULE)
        .unwrap()
        .is_live());
}

#[test]
fn test_restrictions_follow_property_changes() {
    let fx = fixture(SandboxCoreConfig::default());
    let namespace = fx.manager.config().restrictions.property_namespace.clone();
    let contacts = provider_access("com.android.contacts");

    assert!(fx.manager.is_action_allowed(&provider_access("settings"), 34));
    assert!(!fx.manager.is_action_allowed(&contacts, 34));
    assert!(matches!(
        fx.manager.enforce_action(&contacts, 34, 20_001),
        Err(SandboxError::SecurityViolation(_))
    ));

    fx.properties
        .set(&namespace, keys::ENFORCE_RESTRICTIONS, "false");
    fx.manager
        .on_properties_changed(&namespace, &[keys::ENFORCE_RESTRICTIONS])
        .unwrap();

    assert!(fx.manager.is_action_allowed(&contacts, 34));
    assert!(fx.manager.enforce_action(&contacts, 34, 20_001).is_ok());
    assert_eq!(fx.manager.restrictions().audit().denial_count(20_001), 1);
}
