/*!
 * Monitoring
 * Structured tracing and telemetry reporting
 */

mod telemetry;
mod tracer;

pub use telemetry::{LatencyRecord, LatencyStage, NoopTelemetry, RecordingTelemetry, TelemetrySink};
pub use tracer::{generate_trace_id, init_tracing, try_init_tracing, StageSpan};
