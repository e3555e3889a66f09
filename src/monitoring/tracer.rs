/*!
 * Structured Tracing
 * Subscriber setup and per-stage spans for the sandbox core
 *
 * Features:
 * - Env-driven log level (RUST_LOG)
 * - JSON-formatted logs for structured parsing
 * - Stage spans that time an operation and report it to telemetry
 */

use super::telemetry::{LatencyStage, TelemetrySink};
use crate::core::types::Uid;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, span, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};
use uuid::Uuid;

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - SDKSANDBOX_TRACE_JSON: Enable JSON output (default: false)
///
/// Panics if a global subscriber is already installed; use
/// [`try_init_tracing`] where that can happen.
pub fn init_tracing() {
    if let Err(e) = try_init_tracing() {
        panic!("failed to install tracing subscriber: {}", e);
    }
}

/// Initialize structured tracing unless a subscriber is already installed
pub fn try_init_tracing() -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("SDKSANDBOX_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?;
        info!("Structured tracing initialized with JSON output");
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()?;
        info!("Structured tracing initialized");
    }
    Ok(())
}

/// Generate a unique trace ID for request correlation
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Times one stage of a request and reports it exactly once
///
/// Dropping the span without calling [`StageSpan::finish`] reports a failure.
pub struct StageSpan {
    span: tracing::Span,
    stage: LatencyStage,
    caller_uid: Uid,
    start: Instant,
    sink: Option<Arc<dyn TelemetrySink>>,
}

impl StageSpan {
    pub fn new(stage: LatencyStage, caller_uid: Uid, sink: Arc<dyn TelemetrySink>) -> Self {
        let trace_id = generate_trace_id();
        let span = span!(
            Level::DEBUG,
            "stage",
            trace_id = %trace_id,
            stage = stage.as_str(),
            caller_uid = caller_uid,
        );
        Self {
            span,
            stage,
            caller_uid,
            start: Instant::now(),
            sink: Some(sink),
        }
    }

    /// Enter the span context
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    /// Report the stage outcome
    pub fn finish(mut self, success: bool) {
        self.report(success);
    }

    fn report(&mut self, success: bool) {
        if let Some(sink) = self.sink.take() {
            let duration_ms = self.start.elapsed().as_millis() as u64;
            let _entered = self.span.enter();
            debug!(
                stage = self.stage.as_str(),
                duration_ms = duration_ms,
                success = success,
                "stage completed"
            );
            sink.record_latency(self.stage, duration_ms, success, self.caller_uid);
        }
    }
}

impl Drop for StageSpan {
    fn drop(&mut self) {
        self.report(false);
    }
}
