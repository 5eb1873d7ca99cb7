//! `modhost load`: load a catalog and report which modules registered.

use std::path::PathBuf;

use anyhow::Result;

use modhost_config::RuntimeConfig;
use modhost_core::{LoadReport, ModuleDescriptor};

use crate::host::{read_catalog, Host};
use crate::terminal_output::{note_success, note_warn, paint, render_table, DIM, GREEN, RED};

pub async fn run(config: &RuntimeConfig, catalog: Option<PathBuf>, json: bool) -> Result<()> {
    let catalog = read_catalog(config, catalog).await?;
    let host = Host::start(config)?;
    let report = host.loader.load_all(&catalog).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print!("{}", render_table(&["MODULE", "SOURCE", "VERSION", "STATUS"], &rows(&catalog, &report)));
    println!();
    let auth = host.session.snapshot();
    println!("{}", paint(&format!("session: {}", if auth.has_token() { "authenticated" } else { "anonymous" }), DIM));
    if report.is_clean() {
        note_success(&format!("{} module(s) registered", report.loaded.len()));
    } else {
        note_warn(&format!(
            "{} of {} module(s) failed to load",
            report.failures.len(),
            catalog.len()
        ));
    }
    Ok(())
}

fn rows(catalog: &[ModuleDescriptor], report: &LoadReport) -> Vec<Vec<String>> {
    catalog
        .iter()
        .map(|descriptor| {
            let source = match descriptor.remote_url() {
                Some(url) if !descriptor.is_local => url.to_string(),
                _ => "bundled".to_string(),
            };
            let status = match report.failure_for(&descriptor.id) {
                Some(failure) => paint(&failure.to_string(), RED),
                None => paint("registered", GREEN),
            };
            vec![
                descriptor.id.clone(),
                source,
                descriptor.version.clone().unwrap_or_else(|| "-".into()),
                status,
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use modhost_core::LoadFailure;

    #[test]
    fn rows_show_source_and_failure() {
        let catalog = vec![
            ModuleDescriptor::local("weather").with_version("2.1.0"),
            ModuleDescriptor::remote("lidar", "/modules/lidar/module.js"),
        ];
        let report = LoadReport {
            loaded: vec!["weather".into()],
            failures: vec![LoadFailure::Fetch {
                module_id: "lidar".into(),
                url: "/modules/lidar/module.js".into(),
                cause: "HTTP 404".into(),
            }],
        };
        let rows = rows(&catalog, &report);
        assert_eq!(rows[0][1], "bundled");
        assert_eq!(rows[0][2], "2.1.0");
        assert!(rows[0][3].contains("registered"));
        assert_eq!(rows[1][1], "/modules/lidar/module.js");
        assert!(rows[1][3].contains("HTTP 404"));
    }
}
