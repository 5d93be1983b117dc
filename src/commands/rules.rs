use super::RulesCommands;
use crate::config::{DEFAULT_RULES_FILE, SentinelConfig};
use crate::rules::builtin::{DEFAULT_RULES, TEMPLATES};
use crate::rules::{
    CustomRuleDraft, Rule, RuleGroup, RulePatch, RuleSet, RuleSetDocument, RuleSetManager,
};
use anyhow::Context;
use colored::*;
use std::path::{Path, PathBuf};

/// Manager over the rule set file that rule commands edit. Falls back to the
/// builtin defaults when the file does not exist yet. `disabled_rules` from
/// the config is not applied here so it never leaks into the saved file.
pub fn load_editable(
    project_root: &Path,
    config: &SentinelConfig,
) -> anyhow::Result<RuleSetManager> {
    let target = config.rule_set_target(project_root);
    let compiler = config.compiler();
    if target.exists() {
        let document = RuleSetDocument::load(&target)?;
        let rule_set = document.into_rule_set(&compiler)?;
        Ok(RuleSetManager::new(rule_set, compiler))
    } else {
        Ok(RuleSetManager::with_defaults(compiler))
    }
}

/// Saves the rule set and points the config at it if it did not name a
/// rule set file yet.
pub fn persist(
    project_root: &Path,
    config: &mut SentinelConfig,
    manager: &RuleSetManager,
) -> anyhow::Result<PathBuf> {
    let target = config.rule_set_target(project_root);
    manager.export_rule_set().save(&target)?;
    if config.rule_set.is_none() {
        config.rule_set = Some(DEFAULT_RULES_FILE.to_string());
        config.save(project_root)?;
    }
    Ok(target)
}

fn print_rule(rule: &Rule) {
    let status = if rule.enabled { "[ON] ".green() } else { "[OFF]".red() };
    let kind = if rule.is_custom() { "custom script" } else { "builtin" };
    println!(
        "  {} {:<26} {:<10} {:<10} {}  {}",
        status,
        rule.id.yellow(),
        format!("[{}]", rule.severity),
        rule.rule_type.to_string(),
        rule.description,
        kind.dimmed()
    );
}

fn print_rule_set(rule_set: &RuleSet, group: Option<&str>) -> anyhow::Result<()> {
    let version = format!("({} v{})", rule_set.id, rule_set.version);
    println!("\n{} {}", rule_set.name.bold(), version.dimmed());

    if let Some(group_id) = group {
        let group = rule_set
            .group(group_id)
            .with_context(|| format!("unknown group '{}'", group_id))?;
        println!("\n{}", group.name.bold());
        for rule in rule_set.rules_in_group(Some(group_id)) {
            print_rule(rule);
        }
        return Ok(());
    }

    for group in &rule_set.groups {
        println!("\n{}", group.name.bold());
        for rule in rule_set.rules_in_group(Some(group.id.as_str())) {
            print_rule(rule);
        }
    }
    let ungrouped = rule_set.rules_in_group(None);
    if !ungrouped.is_empty() {
        if !rule_set.groups.is_empty() {
            println!("\n{}", "Ungrouped".bold());
        }
        for rule in ungrouped {
            print_rule(rule);
        }
    }
    println!();
    Ok(())
}

fn print_templates() {
    println!("\n{}", "Rule templates:".bold());
    for template in TEMPLATES.iter().chain(DEFAULT_RULES.iter()) {
        println!(
            "  {:<26} {:<10} {:<10} {}",
            template.id.yellow(),
            format!("[{}]", template.severity),
            template.rule_type.to_string(),
            template.description
        );
    }
    println!("\n   Add one with: contract-sentinel rules use <template> [--id <id>]\n");
}

fn read_script(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read script {}", path.display()))
}

/// Runs a `rules` subcommand. Read-only commands print; mutations are
/// saved to the project's rule set file.
pub fn handle_rules_command(project_root: &Path, command: RulesCommands) -> anyhow::Result<()> {
    let mut config = SentinelConfig::load_or_default(project_root)?;

    let command = match command {
        RulesCommands::List { group } => {
            let active = config.build_manager(project_root, None)?;
            return print_rule_set(active.rule_set(), group.as_deref());
        }
        RulesCommands::Templates => {
            print_templates();
            return Ok(());
        }
        RulesCommands::Export { out } => {
            let document = load_editable(project_root, &config)?.export_rule_set();
            match out {
                Some(path) => {
                    document.save(&path)?;
                    println!("   Rule set exported to {}", path.display().to_string().cyan());
                }
                None => print!("{}", serde_yaml::to_string(&document)?),
            }
            return Ok(());
        }
        mutation => mutation,
    };

    let mut manager = load_editable(project_root, &config)?;
    let summary = match command {
        // Read-only commands returned above.
        RulesCommands::List { .. } | RulesCommands::Templates | RulesCommands::Export { .. } => {
            return Ok(());
        }
        RulesCommands::Use { template, id } => {
            let rule = manager.instantiate_template(&template, id.as_deref())?;
            format!("Added rule '{}' from template '{}'", rule.id, template)
        }
        RulesCommands::Add {
            id,
            name,
            rule_type,
            severity,
            input,
            description,
            script,
            group,
        } => {
            let source = read_script(&script)?;
            manager.add_custom(CustomRuleDraft {
                id: id.clone(),
                name,
                description: description.unwrap_or_default(),
                rule_type,
                severity,
                input,
                source,
            })?;
            if let Some(group) = group {
                manager.move_to_group(&id, Some(&group))?;
            }
            format!("Added custom rule '{}'", id)
        }
        RulesCommands::Update {
            id,
            name,
            description,
            severity,
            script,
        } => {
            let predicate_source = script.as_deref().map(read_script).transpose()?;
            manager.update(
                &id,
                RulePatch {
                    name,
                    description,
                    severity,
                    predicate_source,
                    ..RulePatch::default()
                },
            )?;
            format!("Updated rule '{}'", id)
        }
        RulesCommands::Remove { id } => {
            manager.remove(&id)?;
            format!("Removed rule '{}'", id)
        }
        RulesCommands::Enable { id } => {
            manager.set_enabled(&id, true)?;
            format!("Enabled rule '{}'", id)
        }
        RulesCommands::Disable { id } => {
            manager.set_enabled(&id, false)?;
            format!("Disabled rule '{}'", id)
        }
        RulesCommands::Duplicate { id } => {
            let copy = manager.duplicate(&id)?;
            format!("Duplicated '{}' as '{}'", id, copy.id)
        }
        RulesCommands::Move { id, group } => {
            manager.move_to_group(&id, group.as_deref())?;
            match group {
                Some(group) => format!("Moved '{}' to group '{}'", id, group),
                None => format!("Moved '{}' out of its group", id),
            }
        }
        RulesCommands::GroupAdd { id, name, description } => {
            let mut group = RuleGroup::new(id.clone(), name);
            group.description = description;
            manager.add_group(group)?;
            format!("Added group '{}'", id)
        }
        RulesCommands::GroupRemove { id } => {
            manager.remove_group(&id)?;
            format!("Removed group '{}'", id)
        }
        RulesCommands::Import { file } => {
            let document = RuleSetDocument::load(&file)?;
            let previous = manager.import_document(document)?;
            format!(
                "Replaced rule set '{}' with '{}'",
                previous.id,
                manager.rule_set().id
            )
        }
    };

    let target = persist(project_root, &mut config, &manager)?;
    println!("   {} {}", "✔".green(), summary);
    println!("   Saved to {}", target.display().to_string().cyan());
    Ok(())
}
