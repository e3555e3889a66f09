/*!
 * Telemetry Sink
 * Fire-and-forget latency reporting at stage boundaries
 */

use crate::core::types::Uid;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Stage boundaries reported by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyStage {
    LoadSdk,
    UnloadSdk,
    RequestSurfacePackage,
    VerifyModule,
    EnforceRestriction,
}

impl LatencyStage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LoadSdk => "load_sdk",
            Self::UnloadSdk => "unload_sdk",
            Self::RequestSurfacePackage => "request_surface_package",
            Self::VerifyModule => "verify_module",
            Self::EnforceRestriction => "enforce_restriction",
        }
    }
}

/// Receiver of latency records
///
/// Implementations must not block; the core never looks at the outcome.
pub trait TelemetrySink: Send + Sync {
    fn record_latency(&self, stage: LatencyStage, duration_ms: u64, success: bool, caller_uid: Uid);
}

/// Sink that drops every record
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record_latency(&self, _: LatencyStage, _: u64, _: bool, _: Uid) {}
}

/// One latency record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyRecord {
    pub stage: LatencyStage,
    pub duration_ms: u64,
    pub success: bool,
    pub caller_uid: Uid,
}

/// Sink that keeps records in memory, for hosts that batch uploads
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    records: Mutex<Vec<LatencyRecord>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all records collected so far
    pub fn drain(&self) -> Vec<LatencyRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    pub fn records_for(&self, stage: LatencyStage) -> Vec<LatencyRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.stage == stage)
            .cloned()
            .collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record_latency(&self, stage: LatencyStage, duration_ms: u64, success: bool, caller_uid: Uid) {
        self.records.lock().push(LatencyRecord {
            stage,
            duration_ms,
            success,
            caller_uid,
        });
    }
}
