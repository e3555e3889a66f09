/*!
 * Surface Package Request Tests
 */

use crate::common::{
    loaded_session, new_session, quiet_options, FakeTransport, LoadRecorder, SurfaceRecorder,
    UnloadRecorder,
};
use sdksandbox_core::monitoring::NoopTelemetry;
use sdksandbox_core::session::{
    Params, SandboxLatencyInfo, SessionOptions, SurfacePackage, SurfacePackageError,
    SurfacePackageErrorCode, SurfaceRequest,
};
use std::sync::Arc;
use std::time::Duration;

fn package(id: i32) -> SurfacePackage {
    SurfacePackage {
        surface_package_id: id,
        params: Params::new(),
    }
}

fn timed_options(timeout: Duration) -> SessionOptions {
    SessionOptions {
        telemetry: Arc::new(NoopTelemetry),
        timer: Some(tokio::runtime::Handle::current()),
        surface_request_timeout: timeout,
    }
}

#[test]
fn test_request_before_load_reports_not_loaded() {
    let session = new_session(&LoadRecorder::new(), quiet_options());
    let callback = SurfaceRecorder::new();

    session.request_surface_package(
        SurfaceRequest::new(0, 100, 100),
        SandboxLatencyInfo::new(),
        callback.clone(),
    );

    let results = callback.results();
    assert_eq!(results.len(), 1);
    assert!(results[0].clone().unwrap_err().is_not_loaded());
    assert_eq!(session.pending_surface_requests(), 0);
}

#[test]
fn test_ready_delivered_once() {
    let transport = FakeTransport::new();
    let session = loaded_session(&LoadRecorder::new(), &transport, quiet_options());
    let callback = SurfaceRecorder::new();

    let id = session.request_surface_package(
        SurfaceRequest::new(0, 320, 50),
        SandboxLatencyInfo::new(),
        callback.clone(),
    );
    assert_eq!(transport.surface_requests(), vec![id]);

    session.on_surface_package_ready(id, package(7), SandboxLatencyInfo::new());
    session.on_surface_package_ready(id, package(8), SandboxLatencyInfo::new());
    assert_eq!(callback.results(), vec![Ok(package(7))]);
}

#[test]
fn test_sandbox_error_forwarded() {
    let transport = FakeTransport::new();
    let session = loaded_session(&LoadRecorder::new(), &transport, quiet_options());
    let callback = SurfaceRecorder::new();

    let id = session.request_surface_package(
        SurfaceRequest::new(0, 320, 50),
        SandboxLatencyInfo::new(),
        callback.clone(),
    );
    session.on_surface_package_error(
        id,
        SurfacePackageError::new(SurfacePackageErrorCode::InternalError, "render failed"),
        SandboxLatencyInfo::new(),
    );

    let error = callback.results()[0].clone().unwrap_err();
    assert_eq!(error.code, SurfacePackageErrorCode::InternalError);
    assert_eq!(error.message, "render failed");
}

#[test]
fn test_dead_transport_fails_request() {
    let transport = FakeTransport::new();
    let session = loaded_session(&LoadRecorder::new(), &transport, quiet_options());
    transport.kill();
    let callback = SurfaceRecorder::new();

    session.request_surface_package(
        SurfaceRequest::new(0, 320, 50),
        SandboxLatencyInfo::new(),
        callback.clone(),
    );
    assert_eq!(
        callback.results()[0].clone().unwrap_err().code,
        SurfacePackageErrorCode::ProcessDied
    );
    assert_eq!(session.pending_surface_requests(), 0);
}

#[test]
fn test_unload_cancels_outstanding_requests() {
    let transport = FakeTransport::new();
    let session = loaded_session(&LoadRecorder::new(), &transport, quiet_options());
    let callback = SurfaceRecorder::new();

    let id = session.request_surface_package(
        SurfaceRequest::new(0, 320, 50),
        SandboxLatencyInfo::new(),
        callback.clone(),
    );
    session.unload(SandboxLatencyInfo::new(), UnloadRecorder::new()).unwrap();
    session.on_surface_package_ready(id, package(1), SandboxLatencyInfo::new());

    let results = callback.results();
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].clone().unwrap_err().code,
        SurfacePackageErrorCode::Cancelled
    );
}

#[tokio::test]
async fn test_request_times_out() {
    let transport = FakeTransport::new();
    let session = loaded_session(
        &LoadRecorder::new(),
        &transport,
        timed_options(Duration::from_millis(20)),
    );
    let callback = SurfaceRecorder::new();

    let id = session.request_surface_package(
        SurfaceRequest::new(0, 320, 50),
        SandboxLatencyInfo::new(),
        callback.clone(),
    );
    let arrived = tokio::time::timeout(Duration::from_secs(5), callback.wait_async())
        .await
        .unwrap_or(false);
    assert!(arrived);
    assert_eq!(
        callback.results()[0].clone().unwrap_err().code,
        SurfacePackageErrorCode::TimedOut
    );

    // Too late: already reported
    session.on_surface_package_ready(id, package(3), SandboxLatencyInfo::new());
    assert_eq!(callback.count(), 1);
}

#[tokio::test]
async fn test_per_request_timeout_overrides_default() {
    let transport = FakeTransport::new();
    let session = loaded_session(
        &LoadRecorder::new(),
        &transport,
        timed_options(Duration::from_secs(600)),
    );
    let callback = SurfaceRecorder::new();

    session.request_surface_package(
        SurfaceRequest::new(0, 320, 50).with_timeout(Duration::from_millis(20)),
        SandboxLatencyInfo::new(),
        callback.clone(),
    );
    let arrived = tokio::time::timeout(Duration::from_secs(5), callback.wait_async())
        .await
        .unwrap_or(false);
    assert!(arrived);
    assert_eq!(
        callback.results()[0].clone().unwrap_err().code,
        SurfacePackageErrorCode::TimedOut
    );
}

#[tokio::test]
async fn test_answered_request_not_timed_out() {
    let transport = FakeTransport::new();
    let session = loaded_session(
        &LoadRecorder::new(),
        &transport,
        timed_options(Duration::from_millis(20)),
    );
    let callback = SurfaceRecorder::new();

    let id = session.request_surface_package(
        SurfaceRequest::new(0, 320, 50),
        SandboxLatencyInfo::new(),
        callback.clone(),
    );
    session.on_surface_package_ready(id, package(5), SandboxLatencyInfo::new());
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(callback.results(), vec![Ok(package(5))]);
}
