use super::OutputFormat;
use super::render::{render_json, render_sarif, render_text};
use crate::config::SentinelConfig;
use crate::validation::{self, Report};
use anyhow::Context;
use std::path::Path;

pub struct CheckOutcome {
    pub report: Report,
    pub rendered: String,
    pub failed: bool,
}

/// Validates `file` with the project's rule set and renders the report.
pub fn run_check(
    project_root: &Path,
    file: &Path,
    format: OutputFormat,
    rules: Option<&Path>,
) -> anyhow::Result<CheckOutcome> {
    let config = SentinelConfig::load_or_default(project_root)?;
    let manager = config.build_manager(project_root, rules)?;

    let source = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let report = validation::validate(&source, manager.rule_set());
    tracing::debug!(
        file = %file.display(),
        violations = report.violations.len(),
        "document checked"
    );

    let label = file.display().to_string();
    let rendered = match format {
        OutputFormat::Text => render_text(&report, &label),
        OutputFormat::Json => render_json(&report, &label)?,
        OutputFormat::Sarif => render_sarif(&report, &label),
    };
    let failed = report.has_failures(config.fail_on);

    Ok(CheckOutcome {
        report,
        rendered,
        failed,
    })
}

/// Prints the report and returns the process exit code.
pub fn handle_check(
    project_root: &Path,
    file: &Path,
    format: OutputFormat,
    rules: Option<&Path>,
) -> anyhow::Result<i32> {
    let outcome = run_check(project_root, file, format, rules)?;
    println!("{}", outcome.rendered);
    Ok(if outcome.failed { 1 } else { 0 })
}
