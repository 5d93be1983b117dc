use crate::document::Document;
use crate::rules::structure::{check_structure, parse_failure};
use crate::rules::{RuleSet, Severity, Violation, evaluate_rules};
use serde::Serialize;

/// Merged outcome of one validation pass: structural findings first, then
/// rule findings.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub violations: Vec<Violation>,
    pub parse_failed: bool,
}

impl Report {
    pub fn count(&self, severity: Severity) -> usize {
        self.violations.iter().filter(|v| v.severity == severity).count()
    }

    /// Whether any violation is at least as severe as `threshold`.
    pub fn has_failures(&self, threshold: Severity) -> bool {
        self.violations.iter().any(|v| v.severity >= threshold)
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

pub fn validate_document(doc: &Document, rule_set: &RuleSet) -> Report {
    let mut violations = check_structure(doc);
    violations.extend(evaluate_rules(doc, rule_set));
    Report {
        violations,
        parse_failed: false,
    }
}

/// Parses and validates `source`. A document that cannot be parsed yields a
/// report holding only the parse failure.
pub fn validate(source: &str, rule_set: &RuleSet) -> Report {
    match Document::parse(source) {
        Ok(doc) => validate_document(&doc, rule_set),
        Err(err) => {
            tracing::debug!(error = %err, "document failed to parse");
            Report {
                violations: vec![parse_failure(&err)],
                parse_failed: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::builtin::default_rule_set;

    #[test]
    fn test_malformed_document_is_never_reported_clean() {
        let report = validate("paths: {\n", &default_rule_set());
        assert!(report.parse_failed);
        assert_eq!(report.violations.len(), 1);
        assert!(report.has_failures(Severity::Error));
    }

    #[test]
    fn test_structural_findings_come_first() {
        let report = validate("paths:\n  /Users:\n    get: {}\n", &default_rule_set());
        let first_rule = report
            .violations
            .iter()
            .position(|v| !v.rule_id.starts_with("structure/"))
            .unwrap();
        let structural = |v: &Violation| v.rule_id.starts_with("structure/");
        assert!(report.violations[..first_rule].iter().all(structural));
        assert!(!report.violations[first_rule..].iter().any(structural));
    }

    #[test]
    fn test_threshold_policy() {
        let report = validate(
            "openapi: 3.0.0\ninfo: {title: t}\npaths: {}\n",
            &default_rule_set(),
        );
        assert_eq!(report.count(Severity::Warning), 1);
        assert!(report.has_failures(Severity::Warning));
        assert!(!report.has_failures(Severity::Error));
    }
}
