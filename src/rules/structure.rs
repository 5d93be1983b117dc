use crate::document::{Document, HTTP_METHODS, PATH_ITEM_FIELDS, operation_label};
use crate::error::ParseError;
use crate::rules::{Severity, Violation};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;

/// Supported `openapi` major version prefix.
pub const SUPPORTED_VERSION_PREFIX: &str = "3.";

static TEMPLATE_VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]+)\}").expect("valid regex"));

/// A fixed format-conformance check run against every document.
pub trait StructuralCheck {
    fn check(&self, doc: &Document) -> Vec<Violation>;
}

/// `openapi` declaration with a supported major version.
pub struct VersionCheck;

impl StructuralCheck for VersionCheck {
    fn check(&self, doc: &Document) -> Vec<Violation> {
        let violation = |message: String| {
            Violation::new("structure/openapi-version", "OpenAPI version", Severity::Error, message)
        };
        match doc.get("openapi") {
            None => {
                let mut v = violation(
                    "Missing `openapi` version field; expected a 3.x declaration".to_string(),
                );
                if doc.get("swagger").is_some() {
                    v = v
                        .on_line(doc.find_key_line("swagger", 1))
                        .suggest("Convert the Swagger 2.0 document to OpenAPI 3");
                } else {
                    v = v.suggest("Add `openapi: 3.0.3` at the top of the document");
                }
                vec![v]
            }
            Some(Value::String(version)) if version.starts_with(SUPPORTED_VERSION_PREFIX) => vec![],
            Some(Value::String(version)) => vec![
                violation(format!(
                    "Unsupported `openapi` version '{}'; expected 3.x",
                    version
                ))
                .on_line(doc.find_key_line("openapi", 1)),
            ],
            Some(other) => vec![
                violation(format!(
                    "The `openapi` version field must be a string, found {}",
                    other
                ))
                .on_line(doc.find_key_line("openapi", 1))
                .suggest("Quote the version, e.g. openapi: \"3.0.3\""),
            ],
        }
    }
}

/// `info` section with `title` and `version`.
pub struct InfoCheck;

impl StructuralCheck for InfoCheck {
    fn check(&self, doc: &Document) -> Vec<Violation> {
        let Some(info) = doc.get("info").and_then(Value::as_object) else {
            return vec![Violation::new(
                "structure/info",
                "Info section",
                Severity::Error,
                "Missing `info` section",
            )
            .on_line(doc.find_key_line("info", 1))];
        };

        let info_line = doc.find_key_line("info", 1);
        let mut violations = Vec::new();
        let title = info.get("title").and_then(Value::as_str).map(str::trim);
        if title.is_none_or(str::is_empty) {
            violations.push(
                Violation::new(
                    "structure/info-title",
                    "API title",
                    Severity::Error,
                    "Missing `info.title`",
                )
                .on_line(info_line),
            );
        }
        if !info.get("version").is_some_and(|v| v.is_string()) {
            violations.push(
                Violation::new(
                    "structure/info-version",
                    "API version",
                    Severity::Warning,
                    "Missing `info.version` string",
                )
                .on_line(info_line),
            );
        }
        violations
    }
}

/// `paths` section present.
pub struct PathsCheck;

impl StructuralCheck for PathsCheck {
    fn check(&self, doc: &Document) -> Vec<Violation> {
        match doc.get("paths") {
            None => vec![Violation::new(
                "structure/paths",
                "Paths section",
                Severity::Error,
                "Missing `paths` section",
            )],
            Some(Value::Object(_)) => vec![],
            Some(_) => vec![
                Violation::new(
                    "structure/paths",
                    "Paths section",
                    Severity::Error,
                    "The `paths` section must be a mapping of routes",
                )
                .on_line(doc.find_key_line("paths", 1)),
            ],
        }
    }
}

/// Route keys start with `/`, operation keys are known HTTP methods.
pub struct RouteFormatCheck;

impl StructuralCheck for RouteFormatCheck {
    fn check(&self, doc: &Document) -> Vec<Violation> {
        let mut violations = Vec::new();

        for (route, item) in doc.routes() {
            let route_line = doc.line_of_route(route);
            if !route.starts_with('/') {
                violations.push(
                    Violation::new(
                        "structure/route-format",
                        "Route format",
                        Severity::Error,
                        format!("Route '{}' must begin with '/'", route),
                    )
                    .at(route, route_line)
                    .suggest(format!("Use '/{}'", route)),
                );
            }

            let Some(item) = item.as_object() else {
                violations.push(
                    Violation::new(
                        "structure/route-format",
                        "Route format",
                        Severity::Error,
                        format!("Route '{}' must map to a set of operations", route),
                    )
                    .at(route, route_line),
                );
                continue;
            };

            for key in item.keys() {
                if HTTP_METHODS.contains(&key.as_str())
                    || PATH_ITEM_FIELDS.contains(&key.as_str())
                    || key.starts_with("x-")
                {
                    continue;
                }
                let mut v = Violation::new(
                    "structure/method-name",
                    "HTTP method",
                    Severity::Error,
                    format!("Unknown HTTP method '{}' under route '{}'", key, route),
                )
                .at(operation_label(route, key), doc.line_of_operation(route, key));
                let lower = key.to_lowercase();
                if HTTP_METHODS.contains(&lower.as_str()) {
                    v = v.suggest(format!("Method keys are lowercase: use '{}'", lower));
                }
                violations.push(v);
            }
        }

        violations
    }
}

/// Every `{variable}` in a route is declared as a path parameter.
pub struct PathParameterCheck;

impl PathParameterCheck {
    fn declared_path_params(doc: &Document, params: Option<&Value>, into: &mut BTreeSet<String>) {
        let Some(params) = params.and_then(Value::as_array) else {
            return;
        };
        for param in params {
            let param = doc.resolve(param);
            if param.get("in").and_then(Value::as_str) == Some("path") {
                if let Some(name) = param.get("name").and_then(Value::as_str) {
                    into.insert(name.to_string());
                }
            }
        }
    }
}

impl StructuralCheck for PathParameterCheck {
    fn check(&self, doc: &Document) -> Vec<Violation> {
        let mut violations = Vec::new();

        for (route, item) in doc.routes() {
            let variables: Vec<&str> = TEMPLATE_VARIABLE
                .captures_iter(route)
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .collect();
            if variables.is_empty() {
                continue;
            }

            let mut shared = BTreeSet::new();
            Self::declared_path_params(doc, item.get("parameters"), &mut shared);

            for (method, operation) in Document::operations(item) {
                let mut declared = shared.clone();
                Self::declared_path_params(doc, operation.get("parameters"), &mut declared);

                for variable in variables.iter().filter(|v| !declared.contains(**v)) {
                    let message = format!(
                        "Path variable '{{{}}}' in '{}' is not declared as an `in: path` parameter",
                        variable, route
                    );
                    violations.push(
                        Violation::new(
                            "structure/path-parameters",
                            "Path parameters",
                            Severity::Error,
                            message,
                        )
                        .at(operation_label(route, method), doc.line_of_operation(route, method))
                        .suggest(format!(
                            "Add a parameter with `name: {}` and `in: path`",
                            variable
                        )),
                    );
                }
            }
        }

        violations
    }
}

/// Every operation defines at least one response.
pub struct ResponsesCheck;

impl StructuralCheck for ResponsesCheck {
    fn check(&self, doc: &Document) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (route, item) in doc.routes() {
            for (method, operation) in Document::operations(item) {
                let has_responses = operation
                    .get("responses")
                    .and_then(Value::as_object)
                    .is_some_and(|r| !r.is_empty());
                if !has_responses {
                    violations.push(
                        Violation::new(
                            "structure/responses",
                            "Responses",
                            Severity::Warning,
                            "Operation defines no responses",
                        )
                        .at(operation_label(route, method), doc.line_of_operation(route, method)),
                    );
                }
            }
        }
        violations
    }
}

/// The structural checks, in the order they run.
pub fn structural_checks() -> Vec<Box<dyn StructuralCheck + Send + Sync>> {
    vec![
        Box::new(VersionCheck),
        Box::new(InfoCheck),
        Box::new(PathsCheck),
        Box::new(RouteFormatCheck),
        Box::new(PathParameterCheck),
        Box::new(ResponsesCheck),
    ]
}

pub fn check_structure(doc: &Document) -> Vec<Violation> {
    let violations: Vec<Violation> = structural_checks()
        .iter()
        .flat_map(|check| check.check(doc))
        .collect();
    tracing::debug!(count = violations.len(), "structural checks finished");
    violations
}

/// Parses `source` and runs the structural checks. Unparseable source
/// yields a single parse-failure violation.
pub fn check_source(source: &str) -> Vec<Violation> {
    match Document::parse(source) {
        Ok(doc) => check_structure(&doc),
        Err(err) => vec![parse_failure(&err)],
    }
}

pub fn parse_failure(err: &ParseError) -> Violation {
    Violation::new(
        "structure/parse",
        "Document syntax",
        Severity::Error,
        format!("Document could not be parsed: {}", err.message),
    )
    .on_line(err.line)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "openapi: 3.0.3
info:
  title: Users
  version: 1.0.0
paths:
  /users:
    get:
      responses:
        '200':
          description: ok
  /users/{userId}:
    parameters:
      - $ref: '#/components/parameters/UserId'
    get:
      responses:
        '200':
          description: ok
components:
  parameters:
    UserId:
      name: userId
      in: path
      required: true
";

    fn errors(violations: &[Violation]) -> Vec<&Violation> {
        violations.iter().filter(|v| v.severity == Severity::Error).collect()
    }

    #[test]
    fn test_valid_document_is_clean() {
        assert!(check_source(VALID).is_empty());
    }

    #[test]
    fn test_missing_version_is_an_error_mentioning_version() {
        let source = VALID.replace("openapi: 3.0.3\n", "");
        let violations = check_source(&source);
        let errs = errors(&violations);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("version"));
    }

    #[test]
    fn test_unsupported_major_version() {
        let source = VALID.replace("openapi: 3.0.3", "openapi: 2.0.0");
        let violations = check_source(&source);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule_id, "structure/openapi-version");
        assert_eq!(violations[0].line, Some(1));
    }

    #[test]
    fn test_numeric_version_is_rejected() {
        let source = VALID.replace("openapi: 3.0.3", "openapi: 3.0");
        let violations = check_source(&source);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("must be a string"));
    }

    #[test]
    fn test_info_title_error_and_version_warning() {
        let source = VALID.replace("  title: Users\n  version: 1.0.0\n", "  description: x\n");
        let violations = check_source(&source);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].rule_id, "structure/info-title");
        assert_eq!(violations[0].severity, Severity::Error);
        assert_eq!(violations[1].rule_id, "structure/info-version");
        assert_eq!(violations[1].severity, Severity::Warning);
    }

    #[test]
    fn test_minimal_document_with_empty_responses() {
        let violations = check_source(r#"{"paths": {"/users": {"get": {"responses": {}}}}}"#);
        let warnings: Vec<&Violation> = violations
            .iter()
            .filter(|v| v.severity == Severity::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].rule_id, "structure/responses");
        assert_eq!(warnings[0].path.as_deref(), Some("/users [GET]"));
        assert!(!violations.iter().any(|v| {
            v.rule_id == "structure/route-format" || v.rule_id == "structure/method-name"
        }));
    }

    #[test]
    fn test_flow_style_yaml_is_checked_like_json() {
        let violations = check_source(r#"{paths: {"/users": {get: {responses: {}}}}}"#);
        assert!(!violations.iter().any(|v| v.rule_id == "structure/parse"));
        let responses: Vec<&Violation> = violations
            .iter()
            .filter(|v| v.rule_id == "structure/responses")
            .collect();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].path.as_deref(), Some("/users [GET]"));
        assert_eq!(responses[0].line, Some(1));
        assert!(!violations.iter().any(|v| {
            v.rule_id == "structure/route-format" || v.rule_id == "structure/method-name"
        }));
    }

    #[test]
    fn test_route_without_leading_slash() {
        let source = VALID.replace("  /users:\n", "  user:\n");
        let violations = check_source(&source);
        let errs = errors(&violations);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path.as_deref(), Some("user"));
        assert_eq!(errs[0].line, Some(6));
    }

    #[test]
    fn test_unknown_method_suggests_lowercase() {
        let source = VALID.replace("  /users:\n    get:", "  /users:\n    GET:");
        let violations = check_source(&source);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule_id, "structure/method-name");
        assert_eq!(violations[0].path.as_deref(), Some("/users [GET]"));
        assert_eq!(violations[0].suggestions.len(), 1);
    }

    #[test]
    fn test_path_item_fields_and_extensions_are_not_methods() {
        let doc = Document::from_value(serde_json::json!({
            "openapi": "3.1.0",
            "info": {"title": "t", "version": "1"},
            "paths": {"/a": {"summary": "s", "x-internal": true, "get": {"responses": {"200": {}}}}}
        }));
        assert!(check_structure(&doc).is_empty());
    }

    #[test]
    fn test_undeclared_path_variable_per_operation() {
        let doc = Document::from_value(serde_json::json!({
            "openapi": "3.0.0",
            "info": {"title": "t", "version": "1"},
            "paths": {"/orgs/{orgId}/users/{userId}": {
                "get": {
                    "parameters": [
                        {"name": "orgId", "in": "path"},
                        {"name": "userId", "in": "query"}
                    ],
                    "responses": {"200": {}}
                },
                "delete": {
                    "parameters": [
                        {"name": "orgId", "in": "path"},
                        {"name": "userId", "in": "path"}
                    ],
                    "responses": {"204": {}}
                }
            }}
        }));
        let violations = check_structure(&doc);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule_id, "structure/path-parameters");
        assert_eq!(violations[0].path.as_deref(), Some("/orgs/{orgId}/users/{userId} [GET]"));
        assert!(violations[0].message.contains("{userId}"));
    }

    #[test]
    fn test_missing_sections_each_reported() {
        let violations = check_source("components: {}\n");
        let ids: Vec<&str> = violations.iter().map(|v| v.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["structure/openapi-version", "structure/info", "structure/paths"]);
    }

    #[test]
    fn test_parse_failure_short_circuits() {
        let violations = check_source("openapi: 3.0.0\npaths: [\n");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule_id, "structure/parse");
        assert_eq!(violations[0].severity, Severity::Error);
    }
}
