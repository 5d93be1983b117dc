//! Builtin predicate library, the default style guide and the template gallery.
//!
//! Builtin predicates are plain Rust functions keyed by a stable string so
//! that exported rule sets can reference them without carrying code.

use super::{InputShape, PredicateInput, PredicateOutcome, Rule, RuleSet, RuleType, Severity};
use crate::error::{PredicateError, RuleSetError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static KEBAB_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("valid regex"));
static FILE_EXTENSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\.(json|xml|ya?ml|html?|txt|csv)$").expect("valid regex")
});
static VERSION_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^v[0-9]+$").expect("valid regex"));
static CAMEL_CASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-zA-Z0-9]*$").expect("valid regex"));

pub const MAX_PATH_DEPTH: usize = 6;

pub enum BuiltinCheck {
    Route(fn(&str) -> PredicateOutcome),
    Operation(fn(&Value) -> PredicateOutcome),
}

impl BuiltinCheck {
    pub fn input(&self) -> InputShape {
        match self {
            BuiltinCheck::Route(_) => InputShape::Route,
            BuiltinCheck::Operation(_) => InputShape::Operation,
        }
    }

    pub fn run(&self, input: PredicateInput<'_>) -> Result<PredicateOutcome, PredicateError> {
        match (self, input) {
            (BuiltinCheck::Route(check), PredicateInput::Route(route)) => Ok(check(route)),
            (BuiltinCheck::Operation(check), PredicateInput::Operation(op)) => Ok(check(op)),
            _ => Err(PredicateError::WrongInput {
                expected: self.input(),
            }),
        }
    }
}

pub struct BuiltinPredicate {
    pub key: &'static str,
    pub check: BuiltinCheck,
}

static LIBRARY: &[BuiltinPredicate] = &[
    BuiltinPredicate {
        key: "kebab-case-paths",
        check: BuiltinCheck::Route(kebab_case_paths),
    },
    BuiltinPredicate {
        key: "lowercase-segments",
        check: BuiltinCheck::Route(lowercase_segments),
    },
    BuiltinPredicate {
        key: "no-trailing-slash",
        check: BuiltinCheck::Route(no_trailing_slash),
    },
    BuiltinPredicate {
        key: "no-file-extensions",
        check: BuiltinCheck::Route(no_file_extensions),
    },
    BuiltinPredicate {
        key: "max-path-depth",
        check: BuiltinCheck::Route(max_path_depth),
    },
    BuiltinPredicate {
        key: "versioned-paths",
        check: BuiltinCheck::Route(versioned_paths),
    },
    BuiltinPredicate {
        key: "operation-summary",
        check: BuiltinCheck::Operation(operation_summary),
    },
    BuiltinPredicate {
        key: "operation-id",
        check: BuiltinCheck::Operation(operation_id),
    },
    BuiltinPredicate {
        key: "operation-tags",
        check: BuiltinCheck::Operation(operation_tags),
    },
    BuiltinPredicate {
        key: "success-response",
        check: BuiltinCheck::Operation(success_response),
    },
    BuiltinPredicate {
        key: "require-security",
        check: BuiltinCheck::Operation(require_security),
    },
    BuiltinPredicate {
        key: "require-description",
        check: BuiltinCheck::Operation(require_description),
    },
];

pub fn lookup(key: &str) -> Option<&'static BuiltinPredicate> {
    LIBRARY.iter().find(|p| p.key == key)
}

pub fn keys() -> impl Iterator<Item = &'static str> {
    LIBRARY.iter().map(|p| p.key)
}

/// Ready-made rule definition backed by a builtin predicate.
#[derive(Debug, Clone, Copy)]
pub struct RuleTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub rule_type: RuleType,
    pub severity: Severity,
    pub predicate: &'static str,
}

impl RuleTemplate {
    pub fn instantiate(&self, id: Option<&str>) -> Result<Rule, RuleSetError> {
        Rule::builtin(
            id.unwrap_or(self.id),
            self.name,
            self.description,
            self.rule_type,
            self.severity,
            self.predicate,
        )
    }
}

pub const DEFAULT_RULES: &[RuleTemplate] = &[
    RuleTemplate {
        id: "kebab-case-paths",
        name: "Kebab-case paths",
        description: "Path segments should be lowercase words separated by hyphens",
        rule_type: RuleType::Naming,
        severity: Severity::Warning,
        predicate: "kebab-case-paths",
    },
    RuleTemplate {
        id: "no-trailing-slash",
        name: "No trailing slash",
        description: "Paths should not end with a slash",
        rule_type: RuleType::Structure,
        severity: Severity::Warning,
        predicate: "no-trailing-slash",
    },
    RuleTemplate {
        id: "no-file-extensions",
        name: "No file extensions",
        description: "Paths should not expose representation formats as file extensions",
        rule_type: RuleType::Naming,
        severity: Severity::Info,
        predicate: "no-file-extensions",
    },
    RuleTemplate {
        id: "max-path-depth",
        name: "Shallow paths",
        description: "Paths should not nest more than six segments deep",
        rule_type: RuleType::Structure,
        severity: Severity::Info,
        predicate: "max-path-depth",
    },
    RuleTemplate {
        id: "operation-summary",
        name: "Operation summary",
        description: "Every operation should have a summary",
        rule_type: RuleType::Content,
        severity: Severity::Warning,
        predicate: "operation-summary",
    },
    RuleTemplate {
        id: "operation-id",
        name: "camelCase operationId",
        description: "Every operation should declare a camelCase operationId",
        rule_type: RuleType::Content,
        severity: Severity::Warning,
        predicate: "operation-id",
    },
    RuleTemplate {
        id: "operation-tags",
        name: "Operation tags",
        description: "Every operation should be tagged",
        rule_type: RuleType::Content,
        severity: Severity::Info,
        predicate: "operation-tags",
    },
    RuleTemplate {
        id: "success-response",
        name: "Success response",
        description: "Operations should document at least one 2xx or 3xx response",
        rule_type: RuleType::Content,
        severity: Severity::Warning,
        predicate: "success-response",
    },
];

/// Template gallery entries that are not part of the default style guide.
pub const TEMPLATES: &[RuleTemplate] = &[
    RuleTemplate {
        id: "lowercase-segments",
        name: "Lowercase segments",
        description: "Route segments must be lowercase",
        rule_type: RuleType::Naming,
        severity: Severity::Error,
        predicate: "lowercase-segments",
    },
    RuleTemplate {
        id: "versioned-paths",
        name: "Versioned paths",
        description: "Routes must start with a version segment such as /v1",
        rule_type: RuleType::Structure,
        severity: Severity::Warning,
        predicate: "versioned-paths",
    },
    RuleTemplate {
        id: "require-security",
        name: "Operation security",
        description: "Operations must declare security requirements",
        rule_type: RuleType::Content,
        severity: Severity::Error,
        predicate: "require-security",
    },
    RuleTemplate {
        id: "require-description",
        name: "Operation description",
        description: "Operations must have a description",
        rule_type: RuleType::Content,
        severity: Severity::Info,
        predicate: "require-description",
    },
];

/// Looks a template up in the gallery, default rules included.
pub fn template(id: &str) -> Option<&'static RuleTemplate> {
    TEMPLATES
        .iter()
        .chain(DEFAULT_RULES.iter())
        .find(|t| t.id == id)
}

pub fn default_rule_set() -> RuleSet {
    let mut set = RuleSet::new("default", "Default style guide", env!("CARGO_PKG_VERSION"));
    set.description = Some("Builtin API design conventions".to_string());
    for template in DEFAULT_RULES {
        match template.instantiate(None) {
            Ok(rule) => set.rules.push(rule),
            Err(err) => {
                tracing::error!(template = template.id, error = %err, "skipping builtin rule")
            }
        }
    }
    set
}

fn literal_segments(route: &str) -> impl Iterator<Item = &str> {
    route
        .split('/')
        .filter(|s| !s.is_empty() && !(s.starts_with('{') && s.ends_with('}')))
}

fn to_kebab(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len() + 4);
    for (i, c) in segment.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 && !out.ends_with('-') {
                out.push('-');
            }
            out.extend(c.to_lowercase());
        } else if c == '_' || c == ' ' {
            out.push('-');
        } else {
            out.push(c);
        }
    }
    out
}

fn non_empty_str<'a>(op: &'a Value, key: &str) -> Option<&'a str> {
    op.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn kebab_case_paths(route: &str) -> PredicateOutcome {
    match literal_segments(route).find(|s| !KEBAB_SEGMENT.is_match(s)) {
        None => PredicateOutcome::pass(),
        Some(segment) => {
            PredicateOutcome::fail(format!("Path segment '{}' is not kebab-case", segment))
                .suggest(format!("Rename the segment to '{}'", to_kebab(segment)))
        }
    }
}

fn lowercase_segments(route: &str) -> PredicateOutcome {
    match literal_segments(route).find(|s| s.chars().any(char::is_uppercase)) {
        None => PredicateOutcome::pass(),
        Some(segment) => {
            PredicateOutcome::fail(format!("Path segment '{}' is not lowercase", segment))
                .suggest(format!("Use '{}'", segment.to_lowercase()))
        }
    }
}

fn no_trailing_slash(route: &str) -> PredicateOutcome {
    if route.len() > 1 && route.ends_with('/') {
        PredicateOutcome::fail("Path ends with a trailing slash")
            .suggest(format!("Use '{}'", route.trim_end_matches('/')))
    } else {
        PredicateOutcome::pass()
    }
}

fn no_file_extensions(route: &str) -> PredicateOutcome {
    match FILE_EXTENSION.find(route) {
        None => PredicateOutcome::pass(),
        Some(ext) => {
            PredicateOutcome::fail(format!("Path exposes the '{}' extension", ext.as_str()))
                .suggest("Negotiate the format with the Accept header instead")
        }
    }
}

fn max_path_depth(route: &str) -> PredicateOutcome {
    let depth = route.split('/').filter(|s| !s.is_empty()).count();
    if depth > MAX_PATH_DEPTH {
        PredicateOutcome::fail(format!(
            "Path is {} segments deep (maximum recommended: {})",
            depth, MAX_PATH_DEPTH
        ))
    } else {
        PredicateOutcome::pass()
    }
}

fn versioned_paths(route: &str) -> PredicateOutcome {
    let first = route.split('/').find(|s| !s.is_empty());
    if first.is_some_and(|s| VERSION_SEGMENT.is_match(s)) {
        PredicateOutcome::pass()
    } else {
        PredicateOutcome::fail("Path does not start with a version segment")
            .suggest(format!("Use '/v1{}'", route))
    }
}

fn operation_summary(op: &Value) -> PredicateOutcome {
    if non_empty_str(op, "summary").is_some() {
        PredicateOutcome::pass()
    } else {
        PredicateOutcome::fail("Operation has no summary")
    }
}

fn operation_id(op: &Value) -> PredicateOutcome {
    match op.get("operationId").and_then(Value::as_str) {
        None => PredicateOutcome::fail("Operation has no operationId"),
        Some(id) if CAMEL_CASE.is_match(id) => PredicateOutcome::pass(),
        Some(id) => {
            let kebab = to_kebab(id);
            let mut camel = String::with_capacity(kebab.len());
            let mut upper = false;
            for c in kebab.chars() {
                if c == '-' {
                    upper = !camel.is_empty();
                } else if upper {
                    camel.extend(c.to_uppercase());
                    upper = false;
                } else {
                    camel.push(c);
                }
            }
            PredicateOutcome::fail(format!("operationId '{}' is not camelCase", id))
                .suggest(format!("Use '{}'", camel))
        }
    }
}

fn operation_tags(op: &Value) -> PredicateOutcome {
    let tagged = op
        .get("tags")
        .and_then(Value::as_array)
        .is_some_and(|tags| !tags.is_empty());
    if tagged {
        PredicateOutcome::pass()
    } else {
        PredicateOutcome::fail("Operation has no tags")
    }
}

fn success_response(op: &Value) -> PredicateOutcome {
    // Missing or empty responses are reported by the structural checks.
    let Some(responses) = op.get("responses").and_then(Value::as_object) else {
        return PredicateOutcome::pass();
    };
    let success = |code: &String| code.starts_with('2') || code.starts_with('3');
    if responses.is_empty() || responses.keys().any(success) {
        PredicateOutcome::pass()
    } else {
        PredicateOutcome::fail("Operation documents no 2xx or 3xx response")
            .suggest("Add the response returned on success")
    }
}

fn require_security(op: &Value) -> PredicateOutcome {
    let secured = op
        .get("security")
        .and_then(Value::as_array)
        .is_some_and(|s| !s.is_empty());
    if secured {
        PredicateOutcome::pass()
    } else {
        PredicateOutcome::fail("Operation declares no security requirement")
    }
}

fn require_description(op: &Value) -> PredicateOutcome {
    if non_empty_str(op, "description").is_some() {
        PredicateOutcome::pass()
    } else {
        PredicateOutcome::fail("Operation has no description")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_rule_set_has_every_default_rule() {
        let set = default_rule_set();
        assert_eq!(set.rules.len(), DEFAULT_RULES.len());
        assert!(set.rules.iter().all(|r| r.enabled && r.group.is_none()));
    }

    #[test]
    fn test_every_template_instantiates() {
        for template in TEMPLATES.iter().chain(DEFAULT_RULES) {
            assert!(template.instantiate(None).is_ok(), "{} must match its predicate", template.id);
        }
    }

    #[test]
    fn test_kebab_case_suggests_rename() {
        let outcome = kebab_case_paths("/userProfiles/{userId}");
        assert!(!outcome.valid);
        assert_eq!(outcome.suggestions, vec!["Rename the segment to 'user-profiles'"]);
        assert!(kebab_case_paths("/user-profiles/{userId}").valid);
    }

    #[test]
    fn test_lowercase_segments_ignores_template_variables() {
        assert!(lowercase_segments("/users/{userId}").valid);
        assert!(!lowercase_segments("/Users").valid);
    }

    #[test]
    fn test_trailing_slash_allows_root() {
        assert!(no_trailing_slash("/").valid);
        assert!(!no_trailing_slash("/users/").valid);
    }

    #[test]
    fn test_file_extension_and_depth() {
        assert!(!no_file_extensions("/report.json").valid);
        assert!(no_file_extensions("/reports").valid);
        assert!(!max_path_depth("/a/b/c/d/e/f/g").valid);
        assert!(max_path_depth("/a/b/c").valid);
    }

    #[test]
    fn test_versioned_paths() {
        assert!(versioned_paths("/v2/users").valid);
        assert!(!versioned_paths("/users").valid);
    }

    #[test]
    fn test_operation_id_camel_case_suggestion() {
        assert!(operation_id(&json!({"operationId": "listUsers"})).valid);
        let outcome = operation_id(&json!({"operationId": "list_users"}));
        assert!(!outcome.valid);
        assert_eq!(outcome.suggestions, vec!["Use 'listUsers'"]);
        assert!(!operation_id(&json!({})).valid);
    }

    #[test]
    fn test_success_response_defers_missing_responses() {
        assert!(success_response(&json!({})).valid);
        assert!(success_response(&json!({"responses": {"201": {}}})).valid);
        assert!(!success_response(&json!({"responses": {"404": {}}})).valid);
    }

    #[test]
    fn test_operation_content_checks() {
        let op = json!({"summary": " ", "tags": [], "security": [{"key": []}], "description": "d"});
        assert!(!operation_summary(&op).valid);
        assert!(!operation_tags(&op).valid);
        assert!(require_security(&op).valid);
        assert!(require_description(&op).valid);
    }

    #[test]
    fn test_builtin_rejects_wrong_input() {
        let pred = lookup("operation-tags").unwrap();
        let err = pred.check.run(PredicateInput::Route("/users")).unwrap_err();
        assert_eq!(err, PredicateError::WrongInput { expected: InputShape::Operation });
    }

    #[test]
    fn test_template_lookup_includes_defaults() {
        assert!(template("lowercase-segments").is_some());
        assert!(template("operation-summary").is_some());
        assert!(template("missing").is_none());
        assert_eq!(keys().count(), TEMPLATES.len() + DEFAULT_RULES.len());
    }
}
