/*!
 * Sandbox Death Tests
 * Death always ends in Unloaded and fails outstanding callbacks once
 */

use crate::common::{
    loaded_session, new_session, quiet_options, sdk, start_load, FakeTransport, LoadRecorder,
    SurfaceRecorder,
};
use sdksandbox_core::session::{
    LoadSdkErrorCode, SandboxLatencyInfo, SurfacePackageErrorCode, SurfaceRequest,
};
use sdksandbox_core::LoadStatus;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_death_fails_pending_load() {
    let callback = LoadRecorder::new();
    let transport = FakeTransport::new();
    let session = new_session(&callback, quiet_options());
    start_load(&session, &transport);

    session.on_sandbox_death();
    assert_eq!(session.status(), LoadStatus::Unloaded);
    let error = callback.results()[0].clone().unwrap_err();
    assert_eq!(error.code, LoadSdkErrorCode::ProcessNotAvailable);

    // The sandbox answering afterwards changes nothing
    session.on_load_success(sdk(), SandboxLatencyInfo::new());
    assert_eq!(session.status(), LoadStatus::Unloaded);
    assert_eq!(callback.count(), 1);
}

#[test]
fn test_death_before_dispatch() {
    let callback = LoadRecorder::new();
    let session = new_session(&callback, quiet_options());

    session.on_sandbox_death();
    assert_eq!(session.status(), LoadStatus::Unloaded);
    assert_eq!(callback.count(), 1);
}

#[test]
fn test_death_from_every_state() {
    let transport = FakeTransport::new();

    let loaded = loaded_session(&LoadRecorder::new(), &transport, quiet_options());
    loaded.on_sandbox_death();
    assert_eq!(loaded.status(), LoadStatus::Unloaded);
    assert_eq!(loaded.sandboxed_sdk(), None);

    let failed = new_session(&LoadRecorder::new(), quiet_options());
    failed
        .load(
            None,
            failed.provider_info().application_info.clone(),
            SandboxLatencyInfo::new(),
        )
        .unwrap();
    assert_eq!(failed.status(), LoadStatus::LoadFailed);
    failed.on_sandbox_death();
    assert_eq!(failed.status(), LoadStatus::Unloaded);
}

#[test]
fn test_death_is_idempotent() {
    let callback = LoadRecorder::new();
    let transport = FakeTransport::new();
    let session = new_session(&callback, quiet_options());
    start_load(&session, &transport);

    session.on_sandbox_death();
    session.on_sandbox_death();
    assert_eq!(session.status(), LoadStatus::Unloaded);
    assert_eq!(callback.count(), 1);
}

#[test]
fn test_death_fails_outstanding_surfaces() {
    let transport = FakeTransport::new();
    let session = loaded_session(&LoadRecorder::new(), &transport, quiet_options());

    let first = SurfaceRecorder::new();
    let second = SurfaceRecorder::new();
    session.request_surface_package(
        SurfaceRequest::new(0, 320, 50),
        SandboxLatencyInfo::new(),
        first.clone(),
    );
    session.request_surface_package(
        SurfaceRequest::new(0, 320, 50),
        SandboxLatencyInfo::new(),
        second.clone(),
    );
    assert_eq!(session.pending_surface_requests(), 2);

    session.on_sandbox_death();
    assert_eq!(session.pending_surface_requests(), 0);
    for recorder in [&first, &second] {
        let results = recorder.results();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].clone().unwrap_err().code,
            SurfacePackageErrorCode::ProcessDied
        );
    }
}

#[test]
fn test_death_races_load_success() {
    for _ in 0..50 {
        let callback = LoadRecorder::new();
        let transport = FakeTransport::new();
        let session = new_session(&callback, quiet_options());
        start_load(&session, &transport);

        let barrier = Arc::new(Barrier::new(2));
        let success = {
            let session = Arc::clone(&session);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                session.on_load_success(sdk(), SandboxLatencyInfo::new());
            })
        };
        let death = {
            let session = Arc::clone(&session);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                session.on_sandbox_death();
            })
        };
        success.join().unwrap();
        death.join().unwrap();

        // Whichever ran first, the caller hears exactly once and death wins
        assert_eq!(session.status(), LoadStatus::Unloaded);
        assert_eq!(callback.count(), 1);
    }
}
