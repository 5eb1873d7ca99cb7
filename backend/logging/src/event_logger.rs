//! Module Lifecycle Event Logger
//!
//! Typed runtime events (registration, load failure, dropped contribution)
//! emitted on the `module_events` target so they can be routed to their own
//! NDJSON stream.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::redact::redact_sensitive_data;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    ModuleRegistered {
        version: Option<String>,
        slots: Vec<String>,
        replaced: bool,
    },
    ModuleLoaded {
        strategy: &'static str,
        elapsed_ms: u64,
    },
    ModuleLoadFailed {
        kind: &'static str,
        error_msg: String,
    },
    ContributionDropped {
        slot: String,
        error_msg: String,
    },
}

impl RuntimeEvent {
    fn is_failure(&self) -> bool {
        matches!(self, Self::ModuleLoadFailed { .. } | Self::ContributionDropped { .. })
    }
}

#[derive(Debug, Serialize)]
pub struct EventLogEntry {
    pub module_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: RuntimeEvent,
}

pub struct EventLogger;

impl EventLogger {
    /// Log a runtime event for one module. Free-text fields are redacted first.
    pub fn log_event(module_id: &str, mut event: RuntimeEvent) {
        match &mut event {
            RuntimeEvent::ModuleLoadFailed { error_msg, .. }
            | RuntimeEvent::ContributionDropped { error_msg, .. } => {
                *error_msg = redact_sensitive_data(error_msg);
            }
            RuntimeEvent::ModuleRegistered { .. } | RuntimeEvent::ModuleLoaded { .. } => {}
        }

        let failure = event.is_failure();
        let entry = EventLogEntry {
            module_id: module_id.into(),
            timestamp: Utc::now(),
            event,
        };
        let json = serde_json::to_string(&entry).unwrap_or_default();

        if failure {
            warn!(target: "module_events", module = %module_id, event = %json, "Module runtime event");
        } else {
            info!(target: "module_events", module = %module_id, event = %json, "Module runtime event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_events_are_classified() {
        let failed = RuntimeEvent::ModuleLoadFailed { kind: "fetch", error_msg: "404".into() };
        let loaded = RuntimeEvent::ModuleLoaded { strategy: "local", elapsed_ms: 1 };
        assert!(failed.is_failure());
        assert!(!loaded.is_failure());
    }

    #[test]
    fn entry_serializes_with_type_tag() {
        let entry = EventLogEntry {
            module_id: "lidar".into(),
            timestamp: Utc::now(),
            event: RuntimeEvent::ModuleRegistered {
                version: Some("1.0.0".into()),
                slots: vec!["context-panel".into()],
                replaced: false,
            },
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["event"]["type"], "module_registered");
        assert_eq!(json["module_id"], "lidar");
    }
}
