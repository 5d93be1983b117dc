//! Exchange format for rule sets.
//!
//! Only static metadata is serialized. Builtin rules are referenced by
//! predicate key and custom rules carry their predicate source, so loading
//! a rule set always goes back through the builtin library or the compiler.

use super::compiler::{CustomRuleDraft, RuleCompiler};
use super::{InputShape, Rule, RuleGroup, RuleSet, RuleSetMetadata, RuleType, Severity};
use crate::error::RuleSetError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

fn default_enabled() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RuleRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub severity: Severity,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputShape>,
    /// Builtin predicate key. Defaults to `id` when neither this nor
    /// `predicate_source` is present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builtin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate_source: Option<String>,
}

impl From<&Rule> for RuleRecord {
    fn from(rule: &Rule) -> Self {
        Self {
            id: rule.id.clone(),
            name: rule.name.clone(),
            description: rule.description.clone(),
            rule_type: rule.rule_type,
            severity: rule.severity,
            group: rule.group.clone(),
            enabled: rule.enabled,
            input: Some(rule.input),
            builtin: rule
                .predicate
                .builtin_key()
                .filter(|key| *key != rule.id)
                .map(str::to_string),
            predicate_source: rule.predicate.source().map(str::to_string),
        }
    }
}

impl RuleRecord {
    pub fn into_rule(self, compiler: &RuleCompiler) -> Result<Rule, RuleSetError> {
        let mut rule = match self.predicate_source {
            Some(source) => compiler.compile(CustomRuleDraft {
                id: self.id,
                name: self.name,
                description: self.description,
                rule_type: self.rule_type,
                severity: self.severity,
                input: self.input,
                source,
            })?,
            None => {
                let key = self.builtin.unwrap_or_else(|| self.id.clone());
                let rule = Rule::builtin(
                    self.id,
                    self.name,
                    self.description,
                    self.rule_type,
                    self.severity,
                    &key,
                )?;
                if let Some(declared) = self.input.filter(|input| *input != rule.input) {
                    return Err(RuleSetError::ShapeMismatch {
                        rule: rule.id,
                        rule_type: rule.rule_type,
                        input: declared,
                    });
                }
                rule
            }
        };
        rule.group = self.group;
        rule.enabled = self.enabled;
        Ok(rule)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetDocument {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: String,
    #[serde(default)]
    pub groups: Vec<RuleGroup>,
    pub rules: Vec<RuleRecord>,
    #[serde(default)]
    pub metadata: RuleSetMetadata,
}

impl RuleSetDocument {
    pub fn from_rule_set(rule_set: &RuleSet) -> Self {
        Self {
            id: rule_set.id.clone(),
            name: rule_set.name.clone(),
            description: rule_set.description.clone(),
            version: rule_set.version.clone(),
            groups: rule_set.groups.clone(),
            rules: rule_set.rules.iter().map(RuleRecord::from).collect(),
            metadata: rule_set.metadata.clone(),
        }
    }

    /// Rehydrates every rule and reconciles group membership lists with the
    /// rules' `group` fields.
    pub fn into_rule_set(self, compiler: &RuleCompiler) -> Result<RuleSet, RuleSetError> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(self.rules.len());
        for record in self.rules {
            if !seen.insert(record.id.clone()) {
                return Err(RuleSetError::DuplicateRule(record.id));
            }
            rules.push(record.into_rule(compiler)?);
        }

        let mut group_ids = HashSet::new();
        for group in &self.groups {
            if !group_ids.insert(group.id.clone()) {
                return Err(RuleSetError::DuplicateGroup(group.id.clone()));
            }
        }

        let mut groups = self.groups;
        for group in &mut groups {
            let mut listed = HashSet::new();
            group.rules.retain(|id| {
                rules
                    .iter()
                    .any(|r| &r.id == id && r.group.as_deref() == Some(group.id.as_str()))
                    && listed.insert(id.clone())
            });
        }
        for rule in &rules {
            let Some(group_id) = rule.group.as_deref() else {
                continue;
            };
            match groups.iter_mut().find(|g| g.id == group_id) {
                Some(group) if !group.rules.contains(&rule.id) => {
                    group.rules.push(rule.id.clone())
                }
                Some(_) => {}
                None => tracing::warn!(
                    rule = %rule.id,
                    group = group_id,
                    "rule references an unknown group"
                ),
            }
        }

        Ok(RuleSet {
            id: self.id,
            name: self.name,
            version: self.version,
            description: self.description,
            metadata: self.metadata,
            rules,
            groups,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Reads a rule set file; `.json` files are read as JSON, anything else
    /// as YAML.
    pub fn load(path: &Path) -> Result<Self, RuleSetError> {
        let exchange_err = |message: String| RuleSetError::Exchange {
            path: path.display().to_string(),
            message,
        };
        let content = fs::read_to_string(path).map_err(|e| exchange_err(e.to_string()))?;
        if is_json(path) {
            Self::from_json(&content).map_err(|e| exchange_err(e.to_string()))
        } else {
            Self::from_yaml(&content).map_err(|e| exchange_err(e.to_string()))
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), RuleSetError> {
        let exchange_err = |message: String| RuleSetError::Exchange {
            path: path.display().to_string(),
            message,
        };
        let content = if is_json(path) {
            serde_json::to_string_pretty(self).map_err(|e| exchange_err(e.to_string()))?
        } else {
            serde_yaml::to_string(self).map_err(|e| exchange_err(e.to_string()))?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| exchange_err(e.to_string()))?;
        }
        fs::write(path, content).map_err(|e| exchange_err(e.to_string()))
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}
