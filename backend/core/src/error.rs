use serde::Serialize;
use thiserror::Error;

/// Why a single module could not be turned into a registered module.
///
/// Every variant carries the module id so a [`LoadReport`](crate::LoadReport)
/// can be rendered without extra bookkeeping. Failures are values, never
/// panics: the loader hands them back and moves on to the next module.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadFailure {
    /// No bundled entry and no remote URL for this id.
    #[error("module '{module_id}' is unavailable: no bundled entry and no remote URL")]
    Unresolvable { module_id: String },

    /// Remote code needs the broker populated before it runs.
    #[error("module '{module_id}' cannot load: shared dependencies not published: {}", missing.join(", "))]
    MissingSharedDependencies { module_id: String, missing: Vec<String> },

    /// Network or filesystem error while retrieving the entry script.
    #[error("failed to fetch module '{module_id}' from {url}: {cause}")]
    Fetch { module_id: String, url: String, cause: String },

    /// The entry was retrieved but rejected, or its activation failed or panicked.
    #[error("module '{module_id}' failed to execute: {cause}")]
    Execution { module_id: String, cause: String },

    /// The entry ran without error but never called `register()`.
    #[error("module '{module_id}' did not register within {timeout_ms} ms")]
    RegistrationTimeout { module_id: String, timeout_ms: u64 },
}

impl LoadFailure {
    pub fn module_id(&self) -> &str {
        match self {
            Self::Unresolvable { module_id }
            | Self::MissingSharedDependencies { module_id, .. }
            | Self::Fetch { module_id, .. }
            | Self::Execution { module_id, .. }
            | Self::RegistrationTimeout { module_id, .. } => module_id,
        }
    }

    /// Stable short name, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unresolvable { .. } => "unresolvable",
            Self::MissingSharedDependencies { .. } => "missing_shared_dependencies",
            Self::Fetch { .. } => "fetch",
            Self::Execution { .. } => "execution",
            Self::RegistrationTimeout { .. } => "registration_timeout",
        }
    }
}

/// Host integration bugs detected by the shared-dependency broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("shared binding '{name}' was already published with a different value")]
    AlreadyPublished { name: String },
}

/// Errors raised by host context accessors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("viewer state accessed outside of any viewer: no '{name}' binding has been published")]
    ViewerUnavailable { name: String },
}

/// A widget declaration that cannot be rendered. Dropped by the slot engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("module '{module_id}' slot '{slot}' contribution #{index} is missing {}", missing.join(", "))]
pub struct MalformedContribution {
    pub module_id: String,
    pub slot: String,
    pub index: usize,
    pub missing: Vec<&'static str>,
}

/// Top-level error type for host-facing surfaces (catalog, config, CLI).
#[derive(Debug, Error)]
pub enum ModHostError {
    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reports_module_and_kind() {
        let failure = LoadFailure::RegistrationTimeout {
            module_id: "lidar".into(),
            timeout_ms: 250,
        };
        assert_eq!(failure.module_id(), "lidar");
        assert_eq!(failure.kind(), "registration_timeout");
        assert_eq!(failure.to_string(), "module 'lidar' did not register within 250 ms");
    }

    #[test]
    fn missing_dependencies_are_listed() {
        let failure = LoadFailure::MissingSharedDependencies {
            module_id: "lidar".into(),
            missing: vec!["router".into(), "viewer".into()],
        };
        assert!(failure.to_string().ends_with("router, viewer"));
    }

    #[test]
    fn failure_serializes_with_kind_tag() {
        let failure = LoadFailure::Unresolvable { module_id: "ghost".into() };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "unresolvable");
        assert_eq!(json["module_id"], "ghost");
    }
}
