use crate::rules::builtin::default_rule_set;
use crate::rules::{RuleCompiler, RuleSetDocument, RuleSetManager, SandboxLimits, Severity};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current crate version, stamped into saved configs.
pub const SENTINEL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const CONFIG_FILE: &str = ".contract-sentinel.toml";

/// Rule set file written by `init` and by rule commands when the config
/// does not name one.
pub const DEFAULT_RULES_FILE: &str = "contract-rules.yaml";

fn default_fail_on() -> Severity {
    Severity::Error
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SentinelConfig {
    #[serde(default)]
    pub version: String,
    /// Exchange file holding the project's rule set, relative to the
    /// project root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_set: Option<String>,
    /// Lowest severity that makes `check` fail.
    #[serde(default = "default_fail_on")]
    pub fail_on: Severity,
    #[serde(default)]
    pub disabled_rules: Vec<String>,
    #[serde(default)]
    pub sandbox: SandboxLimits,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            version: SENTINEL_VERSION.to_string(),
            rule_set: None,
            fail_on: default_fail_on(),
            disabled_rules: Vec::new(),
            sandbox: SandboxLimits::default(),
        }
    }
}

impl SentinelConfig {
    /// Walks up from the current directory looking for a config file.
    pub fn find_project_root() -> Option<PathBuf> {
        let cwd = std::env::current_dir().ok()?;
        Self::find_project_root_from(&cwd)
    }

    pub fn find_project_root_from(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .find(|dir| dir.join(CONFIG_FILE).is_file())
            .map(Path::to_path_buf)
    }

    /// Loads the config from `project_root`. A missing file is `Ok(None)`;
    /// configs written by another version are migrated and saved back.
    pub fn load(project_root: &Path) -> anyhow::Result<Option<Self>> {
        let path = project_root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: SentinelConfig = toml::from_str(&content)
            .with_context(|| format!("invalid config in {}", path.display()))?;

        if config.version != SENTINEL_VERSION {
            tracing::info!(from = %config.version, to = SENTINEL_VERSION, "migrating config");
            config.version = SENTINEL_VERSION.to_string();
            config.save(project_root)?;
        }
        Ok(Some(config))
    }

    pub fn load_or_default(project_root: &Path) -> anyhow::Result<Self> {
        Ok(Self::load(project_root)?.unwrap_or_default())
    }

    pub fn save(&self, project_root: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(project_root.join(CONFIG_FILE), content)?;
        Ok(())
    }

    /// Path of the configured rule set file, if any.
    pub fn rule_set_path(&self, project_root: &Path) -> Option<PathBuf> {
        self.rule_set.as_ref().map(|file| project_root.join(file))
    }

    /// Path rule commands persist to: the configured file or the default one.
    pub fn rule_set_target(&self, project_root: &Path) -> PathBuf {
        self.rule_set_path(project_root)
            .unwrap_or_else(|| project_root.join(DEFAULT_RULES_FILE))
    }

    pub fn compiler(&self) -> RuleCompiler {
        RuleCompiler::new(self.sandbox.clone())
    }

    /// Builds the active rule set: the configured file (or `override_path`)
    /// when present, the builtin defaults otherwise, then applies
    /// `disabled_rules`.
    pub fn build_manager(
        &self,
        project_root: &Path,
        override_path: Option<&Path>,
    ) -> anyhow::Result<RuleSetManager> {
        let compiler = self.compiler();
        let source = override_path
            .map(Path::to_path_buf)
            .or_else(|| self.rule_set_path(project_root));

        let mut manager = match source {
            Some(path) => {
                let document = RuleSetDocument::load(&path)?;
                let rule_set = document.into_rule_set(&compiler)?;
                RuleSetManager::new(rule_set, compiler)
            }
            None => RuleSetManager::new(default_rule_set(), compiler),
        };

        for rule_id in &self.disabled_rules {
            if let Err(err) = manager.set_enabled(rule_id, false) {
                tracing::warn!(rule = %rule_id, error = %err, "cannot disable rule from config");
            }
        }
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(SentinelConfig::load(tmp.path()).unwrap().is_none());
        assert_eq!(SentinelConfig::load_or_default(tmp.path()).unwrap(), SentinelConfig::default());
    }

    #[test]
    fn test_partial_config_uses_defaults_and_migrates() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILE),
            "version = \"0.1.0\"\nfail_on = \"warning\"\n\n[sandbox]\nmax_operations = 500\n",
        )
        .unwrap();

        let config = SentinelConfig::load(tmp.path()).unwrap().unwrap();
        assert_eq!(config.fail_on, Severity::Warning);
        assert_eq!(config.sandbox.max_operations, 500);
        assert_eq!(config.sandbox.max_call_levels, SandboxLimits::default().max_call_levels);
        assert_eq!(config.version, SENTINEL_VERSION);

        let saved = fs::read_to_string(tmp.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.contains(SENTINEL_VERSION));
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE), "fail_on = \"fatal\"\n").unwrap();
        assert!(SentinelConfig::load(tmp.path()).is_err());
    }

    #[test]
    fn test_find_project_root_walks_up() {
        let tmp = tempfile::TempDir::new().unwrap();
        SentinelConfig::default().save(tmp.path()).unwrap();
        let nested = tmp.path().join("specs/v1");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(
            SentinelConfig::find_project_root_from(&nested).as_deref(),
            Some(tmp.path())
        );
    }

    #[test]
    fn test_build_manager_applies_disabled_rules() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = SentinelConfig {
            disabled_rules: vec!["operation-tags".to_string(), "not-a-rule".to_string()],
            ..SentinelConfig::default()
        };
        let manager = config.build_manager(tmp.path(), None).unwrap();
        assert!(!manager.rule_set().rule("operation-tags").unwrap().enabled);
        assert!(manager.rule_set().rule("operation-id").unwrap().enabled);
    }

    #[test]
    fn test_build_manager_reads_rule_set_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut set = default_rule_set();
        set.id = "team".to_string();
        set.rules.truncate(2);
        RuleSetDocument::from_rule_set(&set)
            .save(&tmp.path().join("team.yaml"))
            .unwrap();

        let config = SentinelConfig {
            rule_set: Some("team.yaml".to_string()),
            ..SentinelConfig::default()
        };
        let manager = config.build_manager(tmp.path(), None).unwrap();
        assert_eq!(manager.rule_set().id, "team");
        assert_eq!(manager.rule_set().rules.len(), 2);
    }
}
