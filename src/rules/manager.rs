use super::builtin;
use super::compiler::{CustomRuleDraft, RuleCompiler};
use super::exchange::RuleSetDocument;
use super::{
    InputShape, Predicate, Rule, RuleGroup, RuleSet, RuleType, Severity, Violation, check_shape,
};
use crate::document::Document;
use crate::error::RuleSetError;
use crate::validation::{self, Report};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Partial update for a rule. `id` cannot be changed.
#[derive(Debug, Clone, Default)]
pub struct RulePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub rule_type: Option<RuleType>,
    pub severity: Option<Severity>,
    pub enabled: Option<bool>,
    /// `Some(None)` ungroups the rule.
    pub group: Option<Option<String>>,
    /// Only meaningful for custom rules, or when replacing a builtin
    /// predicate with a script.
    pub input: Option<InputShape>,
    pub predicate_source: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupPatch {
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
}

/// Owns a rule set and is its only mutation path.
#[derive(Debug, Clone)]
pub struct RuleSetManager {
    rule_set: RuleSet,
    compiler: RuleCompiler,
}

impl RuleSetManager {
    pub fn new(rule_set: RuleSet, compiler: RuleCompiler) -> Self {
        Self { rule_set, compiler }
    }

    pub fn with_defaults(compiler: RuleCompiler) -> Self {
        Self::new(builtin::default_rule_set(), compiler)
    }

    pub fn rule_set(&self) -> &RuleSet {
        &self.rule_set
    }

    pub fn compiler(&self) -> &RuleCompiler {
        &self.compiler
    }

    pub fn into_rule_set(self) -> RuleSet {
        self.rule_set
    }

    fn find(&self, rule_id: &str) -> Result<usize, RuleSetError> {
        self.rule_set
            .rules
            .iter()
            .position(|r| r.id == rule_id)
            .ok_or_else(|| RuleSetError::UnknownRule(rule_id.to_string()))
    }

    fn scrub_membership(&mut self, rule_id: &str) {
        for group in &mut self.rule_set.groups {
            group.rules.retain(|id| id != rule_id);
        }
    }

    /// Appends `rule`. A rule arriving with a group joins that group.
    pub fn add(&mut self, rule: Rule) -> Result<&Rule, RuleSetError> {
        if self.rule_set.rule(&rule.id).is_some() {
            return Err(RuleSetError::DuplicateRule(rule.id));
        }
        check_shape(&rule.id, rule.rule_type, rule.input)?;
        if let Some(group_id) = rule.group.as_deref() {
            let group = self
                .rule_set
                .group_mut(group_id)
                .ok_or_else(|| RuleSetError::UnknownGroup(group_id.to_string()))?;
            group.rules.push(rule.id.clone());
        }

        info!(rule = %rule.id, rule_type = %rule.rule_type, "rule added");
        let index = self.rule_set.rules.len();
        self.rule_set.rules.push(rule);
        self.rule_set.touch();
        Ok(&self.rule_set.rules[index])
    }

    /// Compiles an authored rule and appends it. Nothing changes when the
    /// source does not compile.
    pub fn add_custom(&mut self, draft: CustomRuleDraft) -> Result<&Rule, RuleSetError> {
        if self.rule_set.rule(&draft.id).is_some() {
            return Err(RuleSetError::DuplicateRule(draft.id));
        }
        let rule = self.compiler.compile(draft)?;
        self.add(rule)
    }

    /// Adds a rule from the template gallery, optionally under another id.
    pub fn instantiate_template(
        &mut self,
        template_id: &str,
        rule_id: Option<&str>,
    ) -> Result<&Rule, RuleSetError> {
        let template = builtin::template(template_id)
            .ok_or_else(|| RuleSetError::UnknownTemplate(template_id.to_string()))?;
        let rule = template.instantiate(rule_id)?;
        self.add(rule)
    }

    pub fn remove(&mut self, rule_id: &str) -> Result<Rule, RuleSetError> {
        let index = self.find(rule_id)?;
        let rule = self.rule_set.rules.remove(index);
        self.scrub_membership(rule_id);
        self.rule_set.touch();
        info!(rule = rule_id, "rule removed");
        Ok(rule)
    }

    pub fn update(&mut self, rule_id: &str, patch: RulePatch) -> Result<&Rule, RuleSetError> {
        let index = self.find(rule_id)?;
        let current = &self.rule_set.rules[index];
        let rule_type = patch.rule_type.unwrap_or(current.rule_type);

        let (input, predicate) = match patch.predicate_source {
            Some(source) => {
                let compiled = self.compiler.compile(CustomRuleDraft {
                    id: current.id.clone(),
                    name: current.name.clone(),
                    description: current.description.clone(),
                    rule_type,
                    severity: current.severity,
                    input: patch.input.or(Some(current.input)).filter(|i| rule_type.accepts(*i)),
                    source,
                })?;
                (compiled.input, compiled.predicate)
            }
            None => {
                let input = match (&current.predicate, patch.input) {
                    (Predicate::Custom(_), Some(input)) => input,
                    _ => current.input,
                };
                (input, current.predicate.clone())
            }
        };
        check_shape(rule_id, rule_type, input)?;

        if let Some(group) = patch.group {
            self.move_to_group(rule_id, group.as_deref())?;
        }

        let rule = &mut self.rule_set.rules[index];
        rule.rule_type = rule_type;
        rule.input = input;
        rule.predicate = predicate;
        if let Some(name) = patch.name {
            rule.name = name;
        }
        if let Some(description) = patch.description {
            rule.description = description;
        }
        if let Some(severity) = patch.severity {
            rule.severity = severity;
        }
        if let Some(enabled) = patch.enabled {
            rule.enabled = enabled;
        }
        self.rule_set.touch();
        info!(rule = rule_id, "rule updated");
        Ok(&self.rule_set.rules[index])
    }

    pub fn set_enabled(&mut self, rule_id: &str, enabled: bool) -> Result<(), RuleSetError> {
        let index = self.find(rule_id)?;
        self.rule_set.rules[index].enabled = enabled;
        self.rule_set.touch();
        Ok(())
    }

    /// Clones a rule under a fresh id with a " (Copy)" name suffix. The
    /// clone starts ungrouped.
    pub fn duplicate(&mut self, rule_id: &str) -> Result<&Rule, RuleSetError> {
        let index = self.find(rule_id)?;
        let mut copy = self.rule_set.rules[index].clone();

        let base = format!("{}-copy", rule_id);
        let mut candidate = base.clone();
        let mut n = 2;
        while self.rule_set.rule(&candidate).is_some() {
            candidate = format!("{}-{}", base, n);
            n += 1;
        }

        copy.id = candidate;
        copy.name = format!("{} (Copy)", copy.name);
        copy.group = None;
        self.add(copy)
    }

    /// Moves a rule into `group_id`, or out of every group when `None`.
    pub fn move_to_group(
        &mut self,
        rule_id: &str,
        group_id: Option<&str>,
    ) -> Result<(), RuleSetError> {
        let index = self.find(rule_id)?;
        if let Some(group_id) = group_id {
            if self.rule_set.group(group_id).is_none() {
                return Err(RuleSetError::UnknownGroup(group_id.to_string()));
            }
        }

        self.scrub_membership(rule_id);
        if let Some(group) = group_id.and_then(|id| self.rule_set.group_mut(id)) {
            group.rules.push(rule_id.to_string());
        }
        self.rule_set.rules[index].group = group_id.map(str::to_string);
        self.rule_set.touch();
        Ok(())
    }

    /// Registers a group. Rule ids listed in it are moved into it; unknown
    /// ids are dropped.
    pub fn add_group(&mut self, group: RuleGroup) -> Result<&RuleGroup, RuleSetError> {
        if self.rule_set.group(&group.id).is_some() {
            return Err(RuleSetError::DuplicateGroup(group.id));
        }
        let members: Vec<String> = group
            .rules
            .iter()
            .filter(|id| self.rule_set.rule(id).is_some())
            .cloned()
            .collect();
        let group_id = group.id.clone();
        self.rule_set.groups.push(RuleGroup {
            rules: Vec::new(),
            ..group
        });
        for member in members {
            self.move_to_group(&member, Some(&group_id))?;
        }
        self.rule_set.touch();
        info!(group = %group_id, "group added");
        self.rule_set
            .group(&group_id)
            .ok_or(RuleSetError::UnknownGroup(group_id))
    }

    /// Removes a group and ungroups its member rules.
    pub fn remove_group(&mut self, group_id: &str) -> Result<RuleGroup, RuleSetError> {
        let index = self
            .rule_set
            .groups
            .iter()
            .position(|g| g.id == group_id)
            .ok_or_else(|| RuleSetError::UnknownGroup(group_id.to_string()))?;
        let group = self.rule_set.groups.remove(index);
        for rule in &mut self.rule_set.rules {
            if rule.group.as_deref() == Some(group_id) {
                rule.group = None;
            }
        }
        self.rule_set.touch();
        info!(group = group_id, "group removed");
        Ok(group)
    }

    pub fn update_group(
        &mut self,
        group_id: &str,
        patch: GroupPatch,
    ) -> Result<&RuleGroup, RuleSetError> {
        let group = self
            .rule_set
            .group_mut(group_id)
            .ok_or_else(|| RuleSetError::UnknownGroup(group_id.to_string()))?;
        if let Some(name) = patch.name {
            group.name = name;
        }
        if let Some(description) = patch.description {
            group.description = description;
        }
        self.rule_set.touch();
        self.rule_set
            .group(group_id)
            .ok_or_else(|| RuleSetError::UnknownGroup(group_id.to_string()))
    }

    /// Replaces the whole rule set, returning the previous one.
    pub fn import_rule_set(&mut self, rule_set: RuleSet) -> RuleSet {
        info!(rule_set = %rule_set.id, rules = rule_set.rules.len(), "rule set imported");
        std::mem::replace(&mut self.rule_set, rule_set)
    }

    /// Rehydrates an exchange document and replaces the rule set with it.
    /// The current set is kept when any rule fails to load.
    pub fn import_document(&mut self, document: RuleSetDocument) -> Result<RuleSet, RuleSetError> {
        let rule_set = document.into_rule_set(&self.compiler)?;
        Ok(self.import_rule_set(rule_set))
    }

    /// Snapshot for exchange with `last_modified` set to now.
    pub fn export_rule_set(&self) -> RuleSetDocument {
        let mut document = RuleSetDocument::from_rule_set(&self.rule_set);
        document.metadata.last_modified = Utc::now();
        document
    }

    pub fn evaluate(&self, doc: &Document) -> Vec<Violation> {
        super::evaluate_rules(doc, &self.rule_set)
    }
}

/// A manager shared between threads. Every manager operation and every
/// validation pass runs under the same lock, so a pass never observes a
/// half-applied mutation.
#[derive(Debug, Clone)]
pub struct SharedRuleSet {
    inner: Arc<Mutex<RuleSetManager>>,
}

impl SharedRuleSet {
    pub fn new(manager: RuleSetManager) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manager)),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut RuleSetManager) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub fn validate(&self, source: &str) -> Report {
        self.with(|manager| validation::validate(source, manager.rule_set()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::SandboxLimits;

    fn manager() -> RuleSetManager {
        RuleSetManager::with_defaults(RuleCompiler::new(SandboxLimits::default()))
    }

    fn route_draft(id: &str, source: &str) -> CustomRuleDraft {
        CustomRuleDraft {
            id: id.to_string(),
            name: "No admin".to_string(),
            description: "Admin routes are private".to_string(),
            rule_type: RuleType::Custom,
            severity: Severity::Warning,
            input: Some(InputShape::Route),
            source: source.to_string(),
        }
    }

    #[test]
    fn test_add_rejects_duplicate_ids() {
        let mut m = manager();
        let rule = m.rule_set().rules[0].clone();
        assert!(matches!(m.add(rule), Err(RuleSetError::DuplicateRule(_))));
    }

    #[test]
    fn test_add_custom_compile_failure_leaves_set_unchanged() {
        let mut m = manager();
        let before = m.rule_set().rules.len();
        let err = m.add_custom(route_draft("broken", "if input == { ")).unwrap_err();
        assert!(matches!(err, RuleSetError::Compile(_)));
        assert_eq!(m.rule_set().rules.len(), before);
    }

    #[test]
    fn test_add_custom_then_evaluate() {
        let mut m = manager();
        m.add_custom(route_draft("no-admin", r#"!input.starts_with("/admin")"#)).unwrap();
        let doc = Document::parse("paths:\n  /admin/users: {}\n").unwrap();
        let violations = m.evaluate(&doc);
        assert!(violations.iter().any(|v| v.rule_id == "no-admin"
            && v.message == "Admin routes are private"
            && v.path.as_deref() == Some("/admin/users")));
    }

    #[test]
    fn test_remove_scrubs_group_membership() {
        let mut m = manager();
        m.add_group(RuleGroup {
            rules: vec!["operation-id".to_string(), "unknown".to_string()],
            ..RuleGroup::new("ops", "Operations")
        })
        .unwrap();
        assert_eq!(m.rule_set().group("ops").unwrap().rules, vec!["operation-id"]);
        assert_eq!(m.rule_set().rule("operation-id").unwrap().group.as_deref(), Some("ops"));

        m.remove("operation-id").unwrap();
        assert!(m.rule_set().group("ops").unwrap().rules.is_empty());
        assert!(matches!(m.remove("operation-id"), Err(RuleSetError::UnknownRule(_))));
    }

    #[test]
    fn test_duplicate_then_remove_original() {
        let mut m = manager();
        m.add_group(RuleGroup::new("paths", "Paths")).unwrap();
        m.move_to_group("no-trailing-slash", Some("paths")).unwrap();
        let before = m.rule_set().rules.len();
        let original = m.rule_set().rule("no-trailing-slash").unwrap().clone();

        let copy_id = m.duplicate("no-trailing-slash").unwrap().id.clone();
        assert_eq!(copy_id, "no-trailing-slash-copy");
        m.remove("no-trailing-slash").unwrap();

        assert_eq!(m.rule_set().rules.len(), before);
        let copy = m.rule_set().rule(&copy_id).unwrap();
        assert_eq!(copy.name, "No trailing slash (Copy)");
        assert_eq!(copy.description, original.description);
        assert_eq!(copy.rule_type, original.rule_type);
        assert_eq!(copy.severity, original.severity);
        assert_eq!(copy.enabled, original.enabled);
        assert_eq!(copy.predicate.builtin_key(), original.predicate.builtin_key());
        assert_eq!(copy.group, None);
    }

    #[test]
    fn test_duplicate_ids_stay_unique() {
        let mut m = manager();
        m.duplicate("operation-tags").unwrap();
        let second = m.duplicate("operation-tags").unwrap().id.clone();
        assert_eq!(second, "operation-tags-copy-2");
    }

    #[test]
    fn test_move_to_group_keeps_single_membership() {
        let mut m = manager();
        m.add_group(RuleGroup::new("a", "A")).unwrap();
        m.add_group(RuleGroup::new("b", "B")).unwrap();
        m.move_to_group("operation-id", Some("a")).unwrap();
        m.move_to_group("operation-id", Some("b")).unwrap();
        assert!(m.rule_set().group("a").unwrap().rules.is_empty());
        assert_eq!(m.rule_set().group("b").unwrap().rules, vec!["operation-id"]);

        m.move_to_group("operation-id", None).unwrap();
        assert!(m.rule_set().group("b").unwrap().rules.is_empty());
        assert!(m.move_to_group("operation-id", Some("zzz")).is_err());
    }

    #[test]
    fn test_remove_group_ungroups_members() {
        let mut m = manager();
        m.add_group(RuleGroup::new("ops", "Ops")).unwrap();
        m.move_to_group("operation-tags", Some("ops")).unwrap();
        let removed = m.remove_group("ops").unwrap();
        assert_eq!(removed.rules, vec!["operation-tags"]);
        assert_eq!(m.rule_set().rule("operation-tags").unwrap().group, None);
    }

    #[test]
    fn test_update_group_fields() {
        let mut m = manager();
        m.add_group(RuleGroup::new("ops", "Ops")).unwrap();
        let group = m
            .update_group(
                "ops",
                GroupPatch {
                    name: Some("Operations".to_string()),
                    description: Some(Some("Operation rules".to_string())),
                },
            )
            .unwrap();
        assert_eq!(group.name, "Operations");
        assert_eq!(group.description.as_deref(), Some("Operation rules"));
    }

    #[test]
    fn test_update_merges_fields_and_checks_shape() {
        let mut m = manager();
        let rule = m
            .update(
                "operation-tags",
                RulePatch {
                    severity: Some(Severity::Error),
                    enabled: Some(false),
                    ..RulePatch::default()
                },
            )
            .unwrap();
        assert_eq!(rule.severity, Severity::Error);
        assert!(!rule.enabled);

        let err = m
            .update(
                "operation-tags",
                RulePatch {
                    rule_type: Some(RuleType::Naming),
                    ..RulePatch::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, RuleSetError::ShapeMismatch { .. }));
        assert_eq!(m.rule_set().rule("operation-tags").unwrap().rule_type, RuleType::Content);
    }

    #[test]
    fn test_update_recompiles_source() {
        let mut m = manager();
        m.add_custom(route_draft("no-admin", "true")).unwrap();
        let rule = m
            .update(
                "no-admin",
                RulePatch {
                    predicate_source: Some(r#"input != "/admin""#.to_string()),
                    ..RulePatch::default()
                },
            )
            .unwrap();
        assert_eq!(rule.predicate.source(), Some(r#"input != "/admin""#));

        let err = m
            .update(
                "no-admin",
                RulePatch {
                    predicate_source: Some("{{".to_string()),
                    ..RulePatch::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, RuleSetError::Compile(_)));
        assert_eq!(
            m.rule_set().rule("no-admin").unwrap().predicate.source(),
            Some(r#"input != "/admin""#)
        );
    }

    #[test]
    fn test_template_instantiation() {
        let mut m = manager();
        m.instantiate_template("lowercase-segments", None).unwrap();
        m.instantiate_template("lowercase-segments", Some("lowercase-2")).unwrap();
        assert!(matches!(
            m.instantiate_template("lowercase-segments", None),
            Err(RuleSetError::DuplicateRule(_))
        ));
        assert!(matches!(
            m.instantiate_template("nope", None),
            Err(RuleSetError::UnknownTemplate(_))
        ));
    }

    #[test]
    fn test_import_replaces_and_export_refreshes_timestamp() {
        let mut m = manager();
        let mut replacement = RuleSet::new("empty", "Empty", "0.1.0");
        replacement.metadata.last_modified = Utc::now() - chrono::Duration::days(30);
        let stale = replacement.metadata.last_modified;

        let previous = m.import_rule_set(replacement);
        assert_eq!(previous.id, "default");
        assert!(m.rule_set().rules.is_empty());

        let exported = m.export_rule_set();
        assert_eq!(exported.id, "empty");
        assert!(exported.metadata.last_modified > stale);
    }

    #[test]
    fn test_failed_document_import_keeps_current_set() {
        let mut m = manager();
        let mut document = m.export_rule_set();
        document.rules[0].builtin = Some("does-not-exist".to_string());
        assert!(m.import_document(document).is_err());
        assert_eq!(m.rule_set().id, "default");
    }

    #[test]
    fn test_shared_rule_set_sees_mutations() {
        let shared = SharedRuleSet::new(manager());
        let source = "openapi: 3.0.0
info: {title: t, version: '1'}
paths:
  /Users:
    get:
      summary: s
      operationId: list
      tags: [a]
      responses: {'200': {}}
";
        let before = shared.validate(source);
        assert!(before.violations.iter().any(|v| v.rule_id == "kebab-case-paths"));

        let handle = {
            let shared = shared.clone();
            std::thread::spawn(move || shared.with(|m| m.set_enabled("kebab-case-paths", false)))
        };
        handle.join().unwrap().unwrap();

        let after = shared.validate(source);
        assert!(after.violations.is_empty());
    }
}
