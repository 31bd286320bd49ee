//! Observability for the ingestion reader
//!
//! - Structured logging (JSON lines)
//! - Named lifecycle events
//! - Relaxed counters
//! - The process halt used for invariant violations and corruption
//!
//! # Usage
//!
//! ```ignore
//! use cdc_ingest::observability::{log_event_with_fields, ReaderEvent};
//!
//! log_event_with_fields(ReaderEvent::StageUpdated, &[("stage", "StoreDiskApply")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::ReaderEvent;
pub use logger::{Logger, Severity};
pub use metrics::{ReaderMetrics, ReaderMetricsSnapshot};

/// Log a lifecycle event at INFO (FATAL for fatal events)
pub fn log_event(event: ReaderEvent) {
    log_event_with_fields(event, &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: ReaderEvent, fields: &[(&str, &str)]) {
    let severity = if event.is_fatal() {
        Severity::Fatal
    } else {
        Severity::Info
    };
    Logger::log(severity, event.as_str(), fields);
}

/// Log a lifecycle event at an explicit severity
pub fn log_event_at(severity: Severity, event: ReaderEvent, fields: &[(&str, &str)]) {
    Logger::log(severity, event.as_str(), fields);
}

/// Writes a FATAL line with context and aborts the process.
///
/// No unwinding, no cleanup. The overflow queue owns durability, so an
/// abrupt stop re-delivers uncommitted records on restart.
pub fn halt(event: ReaderEvent, fields: &[(&str, &str)]) -> ! {
    Logger::fatal(event.as_str(), fields);
    std::process::abort();
}
