use crate::rules::{Severity, Violation};
use crate::validation::Report;
use colored::*;
use serde::Serialize;
use std::fmt::Write as _;

fn sarif_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "note",
    }
}

/// Renders a SARIF 2.1.0 log for one checked document.
pub fn render_sarif(report: &Report, file: &str) -> String {
    let mut seen_rules: Vec<(&str, &str)> = Vec::new();
    for v in &report.violations {
        if !seen_rules.iter().any(|(id, _)| *id == v.rule_id) {
            seen_rules.push((v.rule_id.as_str(), v.rule_name.as_str()));
        }
    }

    let rules_json: Vec<serde_json::Value> = seen_rules
        .iter()
        .map(|(id, name)| {
            serde_json::json!({
                "id": id,
                "shortDescription": { "text": name }
            })
        })
        .collect();

    let results_json: Vec<serde_json::Value> = report
        .violations
        .iter()
        .map(|v| {
            let mut result = serde_json::json!({
                "ruleId": v.rule_id,
                "level": sarif_level(v.severity),
                "message": { "text": v.message },
                "locations": [{
                    "physicalLocation": {
                        "artifactLocation": {
                            "uri": file,
                            "uriBaseId": "%SRCROOT%"
                        },
                        "region": { "startLine": v.line.unwrap_or(1) }
                    }
                }]
            });
            if let Some(path) = &v.path {
                result["locations"][0]["logicalLocations"] =
                    serde_json::json!([{ "fullyQualifiedName": path }]);
            }
            result
        })
        .collect();

    let sarif = serde_json::json!({
        "$schema": "https://json.schemastore.org/sarif-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "contract-sentinel",
                    "version": env!("CARGO_PKG_VERSION"),
                    "rules": rules_json
                }
            },
            "results": results_json
        }]
    });

    serde_json::to_string_pretty(&sarif).unwrap_or_default()
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    file: &'a str,
    errors: usize,
    warnings: usize,
    infos: usize,
    parse_failed: bool,
    violations: &'a [Violation],
}

pub fn render_json(report: &Report, file: &str) -> anyhow::Result<String> {
    let out = JsonOutput {
        file,
        errors: report.count(Severity::Error),
        warnings: report.count(Severity::Warning),
        infos: report.count(Severity::Info),
        parse_failed: report.parse_failed,
        violations: &report.violations,
    };
    Ok(serde_json::to_string_pretty(&out)?)
}

fn severity_tag(severity: Severity) -> ColoredString {
    match severity {
        Severity::Error => "ERROR".red().bold(),
        Severity::Warning => "WARN ".yellow(),
        Severity::Info => "INFO ".blue(),
    }
}

/// Human readable report, one block per violation.
pub fn render_text(report: &Report, file: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", file.bold().cyan());

    for v in &report.violations {
        let line_info = v.line.map(|l| format!(":{}", l)).unwrap_or_default();
        let _ = writeln!(
            out,
            "   {} [{}{}] {}",
            severity_tag(v.severity),
            v.rule_id.yellow(),
            line_info,
            v.message
        );
        if let Some(path) = &v.path {
            let _ = writeln!(out, "      at {}", path.dimmed());
        }
        for suggestion in &v.suggestions {
            let _ = writeln!(out, "      {} {}", "hint:".green(), suggestion);
        }
    }

    if report.is_clean() {
        let _ = writeln!(out, "\n{}", "No problems found.".green());
    } else {
        let _ = writeln!(
            out,
            "\n{} error(s)  {} warning(s)  {} info(s)",
            report.count(Severity::Error).to_string().red().bold(),
            report.count(Severity::Warning).to_string().yellow(),
            report.count(Severity::Info).to_string().blue()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::builtin::default_rule_set;
    use crate::validation::validate;

    fn report() -> Report {
        validate(
            "openapi: 3.0.0
info: {title: t, version: '1'}
paths:
  /Users:
    get:
      operationId: x
      summary: s
      tags: [a]
      responses: {'200': {description: ok}}
",
            &default_rule_set(),
        )
    }

    #[test]
    fn test_render_sarif_produces_valid_structure() {
        let sarif = render_sarif(&report(), "api.yaml");
        let parsed: serde_json::Value = serde_json::from_str(&sarif).expect("must be valid JSON");
        assert_eq!(parsed["version"], "2.1.0");
        let result = &parsed["runs"][0]["results"][0];
        assert_eq!(result["ruleId"], "kebab-case-paths");
        assert_eq!(result["level"], "warning");
        assert_eq!(result["locations"][0]["physicalLocation"]["region"]["startLine"], 4);
        assert_eq!(result["locations"][0]["logicalLocations"][0]["fullyQualifiedName"], "/Users");
        let rule = &parsed["runs"][0]["tool"]["driver"]["rules"][0];
        assert_eq!(rule["shortDescription"]["text"], "Kebab-case paths");
    }

    #[test]
    fn test_render_json_counts() {
        let json = render_json(&report(), "api.yaml").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["warnings"], 1);
        assert_eq!(parsed["errors"], 0);
        assert_eq!(parsed["violations"][0]["rule_id"], "kebab-case-paths");
    }

    #[test]
    fn test_render_text_lists_rule_and_summary() {
        colored::control::set_override(false);
        let text = render_text(&report(), "api.yaml");
        assert!(text.contains("[kebab-case-paths:4]"));
        assert!(text.contains("at /Users"));
        assert!(text.contains("0 error(s)  1 warning(s)  0 info(s)"));

        let clean = render_text(&Report { violations: vec![], parse_failed: false }, "api.yaml");
        assert!(clean.contains("No problems found."));
    }
}
