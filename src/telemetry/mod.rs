//! Best-effort observability for tool calls and guardrail verdicts.
//!
//! The recorder never blocks and never fails its caller. Storage errors are
//! logged on the writer thread and dropped.

pub mod decorators;
pub mod recorder;
pub mod sink;

pub use decorators::{Telemetered, ToolTelemetry, INVALID_TOOL_NAME};
pub use recorder::{status_from_verdict, TelemetryRecorder};
pub use sink::{MemoryTelemetrySink, SqliteTelemetrySink, TelemetryError, TelemetrySink};
