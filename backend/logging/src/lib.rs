//! Structured logging for the ModHost runtime.
//!
//! Console + rolling NDJSON file output, secret redaction, and a typed
//! module lifecycle event log.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{EventLogEntry, EventLogger, RuntimeEvent};
pub use logger::init_logger;
pub use redact::redact_sensitive_data;
