pub mod builtin;
pub mod compiler;
pub mod engine;
pub mod exchange;
pub mod manager;
pub mod structure;

pub use compiler::{CompiledScript, CustomRuleDraft, RuleCompiler, SandboxLimits};
pub use engine::{RuleEngine, evaluate_rules};
pub use exchange::{RuleRecord, RuleSetDocument};
pub use manager::{GroupPatch, RulePatch, RuleSetManager, SharedRuleSet};
pub use structure::{check_source, check_structure};

use crate::error::{PredicateError, RuleSetError};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(
    Serialize, Deserialize, ValueEnum, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

#[derive(Serialize, Deserialize, ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Naming,
    Structure,
    Content,
    Custom,
}

impl RuleType {
    /// The input every rule of this type receives. Custom rules declare
    /// their own.
    pub fn fixed_input(self) -> Option<InputShape> {
        match self {
            RuleType::Naming | RuleType::Structure => Some(InputShape::Route),
            RuleType::Content => Some(InputShape::Operation),
            RuleType::Custom => None,
        }
    }

    pub fn accepts(self, input: InputShape) -> bool {
        self.fixed_input().is_none_or(|fixed| fixed == input)
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RuleType::Naming => "naming",
            RuleType::Structure => "structure",
            RuleType::Content => "content",
            RuleType::Custom => "custom",
        })
    }
}

/// Which document substructure a predicate is dispatched against.
#[derive(Serialize, Deserialize, ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InputShape {
    /// The route key, e.g. `/users/{id}`.
    Route,
    /// The operation object under a route.
    Operation,
}

impl fmt::Display for InputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputShape::Route => "route",
            InputShape::Operation => "operation",
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum PredicateInput<'a> {
    Route(&'a str),
    Operation(&'a Value),
}

impl PredicateInput<'_> {
    pub fn shape(&self) -> InputShape {
        match self {
            PredicateInput::Route(_) => InputShape::Route,
            PredicateInput::Operation(_) => InputShape::Operation,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PredicateOutcome {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl PredicateOutcome {
    pub fn pass() -> Self {
        Self {
            valid: true,
            ..Self::default()
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
            suggestions: Vec::new(),
        }
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Execution strategy of a rule.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Looked up in the builtin library when invoked.
    Builtin { key: String },
    /// Author-supplied source, compiled in the sandbox.
    Custom(CompiledScript),
}

impl Predicate {
    pub fn invoke(&self, input: PredicateInput<'_>) -> Result<PredicateOutcome, PredicateError> {
        match self {
            Predicate::Builtin { key } => builtin::lookup(key)
                .ok_or_else(|| PredicateError::UnknownBuiltin(key.clone()))?
                .check
                .run(input),
            Predicate::Custom(script) => script.run(input),
        }
    }

    pub fn builtin_key(&self) -> Option<&str> {
        match self {
            Predicate::Builtin { key } => Some(key),
            Predicate::Custom(_) => None,
        }
    }

    pub fn source(&self) -> Option<&str> {
        match self {
            Predicate::Builtin { .. } => None,
            Predicate::Custom(script) => Some(script.source()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub rule_type: RuleType,
    pub severity: Severity,
    pub group: Option<String>,
    pub enabled: bool,
    pub input: InputShape,
    pub predicate: Predicate,
}

impl Rule {
    /// Builds a rule backed by the builtin predicate `key`.
    pub fn builtin(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        rule_type: RuleType,
        severity: Severity,
        key: &str,
    ) -> Result<Self, RuleSetError> {
        let id = id.into();
        let predicate =
            builtin::lookup(key).ok_or_else(|| RuleSetError::UnknownBuiltin(key.to_string()))?;
        let input = predicate.check.input();
        check_shape(&id, rule_type, input)?;

        Ok(Self {
            id,
            name: name.into(),
            description: description.into(),
            rule_type,
            severity,
            group: None,
            enabled: true,
            input,
            predicate: Predicate::Builtin {
                key: key.to_string(),
            },
        })
    }

    pub fn is_custom(&self) -> bool {
        matches!(self.predicate, Predicate::Custom(_))
    }
}

/// A rule of `rule_type` may only be dispatched against `input`.
pub fn check_shape(rule: &str, rule_type: RuleType, input: InputShape) -> Result<(), RuleSetError> {
    if rule_type.accepts(input) {
        Ok(())
    } else {
        Err(RuleSetError::ShapeMismatch {
            rule: rule.to_string(),
            rule_type,
            input,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RuleGroup {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub rules: Vec<String>,
}

impl RuleGroup {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            rules: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetMetadata {
    pub last_modified: DateTime<Utc>,
}

impl Default for RuleSetMetadata {
    fn default() -> Self {
        Self {
            last_modified: Utc::now(),
        }
    }
}

/// An ordered collection of rules plus its grouping metadata.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub metadata: RuleSetMetadata,
    pub rules: Vec<Rule>,
    pub groups: Vec<RuleGroup>,
}

impl RuleSet {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            description: None,
            metadata: RuleSetMetadata::default(),
            rules: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn rule_mut(&mut self, id: &str) -> Option<&mut Rule> {
        self.rules.iter_mut().find(|r| r.id == id)
    }

    pub fn group(&self, id: &str) -> Option<&RuleGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn group_mut(&mut self, id: &str) -> Option<&mut RuleGroup> {
        self.groups.iter_mut().find(|g| g.id == id)
    }

    /// The rule's group, or `None` when it is ungrouped or points at a
    /// group that no longer exists.
    pub fn effective_group(&self, rule: &Rule) -> Option<&str> {
        let group = rule.group.as_deref()?;
        match self.group(group) {
            Some(found) => Some(found.id.as_str()),
            None => {
                tracing::debug!(
                    rule = %rule.id,
                    group,
                    "rule references a missing group, treating as ungrouped"
                );
                None
            }
        }
    }

    /// Rules whose effective group is `group` (`None` selects ungrouped rules).
    pub fn rules_in_group(&self, group: Option<&str>) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|r| self.effective_group(r) == group)
            .collect()
    }

    pub fn enabled_rules(&self, input: InputShape) -> impl Iterator<Item = &Rule> {
        self.rules
            .iter()
            .filter(move |r| r.enabled && r.input == input)
    }

    pub(crate) fn touch(&mut self) {
        self.metadata.last_modified = Utc::now();
    }
}

/// One reported failure of a rule or structural check.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub valid: bool,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl Violation {
    pub fn new(
        rule_id: impl Into<String>,
        rule_name: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            valid: false,
            rule_id: rule_id.into(),
            rule_name: rule_name.into(),
            severity,
            group: None,
            message: message.into(),
            path: None,
            line: None,
            suggestions: Vec::new(),
        }
    }

    pub fn at(mut self, path: impl Into<String>, line: Option<usize>) -> Self {
        self.path = Some(path.into());
        self.line = line;
        self
    }

    pub fn on_line(mut self, line: Option<usize>) -> Self {
        self.line = line;
        self
    }

    pub fn in_group(mut self, group: Option<&str>) -> Self {
        self.group = group.map(str::to_string);
        self
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions.extend(suggestions);
        self
    }
}
