//! Config validation: field-path errors and warnings collected in one pass.

use std::collections::HashSet;

use crate::schema::RuntimeConfig;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError { path: path.into(), message: message.into() });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError { path: path.into(), message: message.into() });
    }
}

pub fn validate(config: &RuntimeConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_loader(config, &mut report);
    validate_logging(config, &mut report);
    validate_slots(config, &mut report);
    report
}

fn validate_loader(config: &RuntimeConfig, report: &mut ValidationReport) {
    let Some(loader) = &config.loader else { return };

    if loader.registration_timeout_ms == Some(0) {
        report.error("loader.registrationTimeoutMs", "Must be greater than zero");
    }
    if loader.fetch_timeout_ms == Some(0) {
        report.error("loader.fetchTimeoutMs", "Must be greater than zero");
    }
    if let (Some(fetch), Some(register)) = (loader.fetch_timeout_ms, loader.registration_timeout_ms) {
        if fetch > register {
            report.warn(
                "loader.fetchTimeoutMs",
                "Exceeds registrationTimeoutMs; slow fetches surface as fetch failures, never as timeouts",
            );
        }
    }
    if let Some(base) = &loader.base_url {
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            report.error("loader.baseUrl", format!("Expected an http(s) origin, got '{base}'"));
        }
    }
    if let Some(bindings) = &loader.required_bindings {
        let unique: HashSet<_> = bindings.iter().collect();
        if unique.len() != bindings.len() {
            report.warn("loader.requiredBindings", "Contains duplicate entries");
        }
    }
}

fn validate_logging(config: &RuntimeConfig, report: &mut ValidationReport) {
    let Some(level) = config.logging.as_ref().and_then(|l| l.level.as_deref()) else { return };
    // Directive strings such as "modhost_runtime=debug" are accepted as-is.
    if level.contains('=') {
        return;
    }
    if !matches!(level, "trace" | "debug" | "info" | "warn" | "error" | "off") {
        report.error("logging.level", format!("Unknown log level '{level}'"));
    }
}

fn validate_slots(config: &RuntimeConfig, report: &mut ValidationReport) {
    let Some(known) = config.slots.as_ref().and_then(|s| s.known.as_ref()) else { return };
    if known.is_empty() {
        report.warn("slots.known", "No slots declared; every contribution will be reported as unknown");
    }
    for (i, name) in known.iter().enumerate() {
        if name.trim().is_empty() {
            report.error(format!("slots.known[{i}]"), "Slot name cannot be empty");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::apply_all_defaults;
    use crate::schema::{LoaderConfig, LoggingConfig, SlotsConfig};

    #[test]
    fn defaults_are_valid() {
        let report = validate(&apply_all_defaults(RuntimeConfig::default()));
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn rejects_zero_timeout_and_bad_origin() {
        let cfg = RuntimeConfig {
            loader: Some(LoaderConfig {
                registration_timeout_ms: Some(0),
                base_url: Some("cdn.example.com".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = validate(&cfg);
        let paths: Vec<_> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["loader.registrationTimeoutMs", "loader.baseUrl"]);
    }

    #[test]
    fn warns_when_fetch_outlasts_registration() {
        let cfg = RuntimeConfig {
            loader: Some(LoaderConfig {
                registration_timeout_ms: Some(1_000),
                fetch_timeout_ms: Some(5_000),
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = validate(&cfg);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn unknown_level_and_empty_slot_name() {
        let cfg = RuntimeConfig {
            logging: Some(LoggingConfig { level: Some("loud".into()), dir: None }),
            slots: Some(SlotsConfig { known: Some(vec!["map-layer".into(), " ".into()]) }),
            ..Default::default()
        };
        let report = validate(&cfg);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.errors[1].path, "slots.known[1]");
    }
}
