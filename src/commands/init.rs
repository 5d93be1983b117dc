use crate::config::{CONFIG_FILE, DEFAULT_RULES_FILE, SentinelConfig};
use crate::rules::RuleSetDocument;
use crate::rules::builtin::default_rule_set;
use colored::*;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Writes the default config and rule set file into `project_root`.
/// Returns Err if either already exists and `force` is false.
pub fn run_init(project_root: &Path, force: bool) -> anyhow::Result<(PathBuf, PathBuf)> {
    let config_path = project_root.join(CONFIG_FILE);
    let rules_path = project_root.join(DEFAULT_RULES_FILE);

    if !force {
        if let Some(existing) = [&config_path, &rules_path].into_iter().find(|p| p.exists()) {
            anyhow::bail!(
                "{} already exists. Use --force to overwrite it.",
                existing.display()
            );
        }
    }

    let mut rule_set = default_rule_set();
    rule_set.id = Uuid::new_v4().to_string();
    rule_set.name = "Project style guide".to_string();
    RuleSetDocument::from_rule_set(&rule_set).save(&rules_path)?;

    let config = SentinelConfig {
        rule_set: Some(DEFAULT_RULES_FILE.to_string()),
        ..SentinelConfig::default()
    };
    config.save(project_root)?;

    Ok((config_path, rules_path))
}

pub fn handle_init_command(project_root: &Path, force: bool) -> anyhow::Result<()> {
    println!("\n{}", "contract-sentinel init".bold().green());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let (config_path, rules_path) = run_init(project_root, force)?;
    println!("   Config:   {}", config_path.display().to_string().cyan());
    println!("   Rule set: {}", rules_path.display().to_string().cyan());
    println!("\n   {} Next steps:", "💡".yellow());
    println!("      contract-sentinel check openapi.yaml");
    println!("      contract-sentinel rules templates");
    Ok(())
}
