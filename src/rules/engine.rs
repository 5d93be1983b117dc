use crate::document::{Document, operation_label};
use crate::rules::{InputShape, PredicateInput, Rule, RuleSet, Severity, Violation};
use tracing::{debug, warn};

/// Applies the enabled rules of a rule set to a document.
pub struct RuleEngine<'a> {
    rule_set: &'a RuleSet,
}

impl<'a> RuleEngine<'a> {
    pub fn new(rule_set: &'a RuleSet) -> Self {
        Self { rule_set }
    }

    /// Route rules run against each route key, then operation rules run
    /// against each operation under it. Routes keep declaration order and
    /// rules keep rule set order.
    pub fn evaluate(&self, doc: &Document) -> Vec<Violation> {
        let mut violations = Vec::new();

        for (route, item) in doc.routes() {
            let route_line = doc.line_of_route(route);
            for rule in self.rule_set.enabled_rules(InputShape::Route) {
                let input = PredicateInput::Route(route);
                self.apply(rule, input, route.to_string(), route_line, &mut violations);
            }

            for (method, operation) in Document::operations(item) {
                let label = operation_label(route, method);
                let line = doc.line_of_operation(route, method);
                for rule in self.rule_set.enabled_rules(InputShape::Operation) {
                    let input = PredicateInput::Operation(operation);
                    self.apply(rule, input, label.clone(), line, &mut violations);
                }
            }
        }

        debug!(
            rule_set = %self.rule_set.id,
            count = violations.len(),
            "rule evaluation finished"
        );
        violations
    }

    fn apply(
        &self,
        rule: &Rule,
        input: PredicateInput<'_>,
        path: String,
        line: Option<usize>,
        violations: &mut Vec<Violation>,
    ) {
        let group = self.rule_set.effective_group(rule);

        match rule.predicate.invoke(input) {
            Ok(outcome) if outcome.valid => {}
            Ok(outcome) => {
                let message = outcome
                    .message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| fallback_message(rule));
                violations.push(
                    Violation::new(&rule.id, &rule.name, rule.severity, message)
                        .in_group(group)
                        .at(path, line)
                        .with_suggestions(outcome.suggestions),
                );
            }
            Err(err) => {
                warn!(rule = %rule.id, %path, error = %err, "rule predicate failed");
                violations.push(
                    Violation::new(
                        &rule.id,
                        &rule.name,
                        Severity::Error,
                        format!("Rule '{}' malfunctioned: {}", rule.name, err),
                    )
                    .in_group(group)
                    .at(path, line),
                );
            }
        }
    }
}

fn fallback_message(rule: &Rule) -> String {
    if rule.description.trim().is_empty() {
        format!("Violates rule '{}'", rule.name)
    } else {
        rule.description.clone()
    }
}

pub fn evaluate_rules(doc: &Document, rule_set: &RuleSet) -> Vec<Violation> {
    RuleEngine::new(rule_set).evaluate(doc)
}
