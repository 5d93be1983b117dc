pub mod check;
pub mod init;
pub mod render;
pub mod rules;

use crate::rules::{InputShape, RuleType, Severity};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "contract-sentinel")]
#[command(
    version,
    about = "Style and structure checks for HTTP API contract documents",
    long_about = None
)]
pub struct Cli {
    /// Log rule evaluation details to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a contract document against the project rule set
    Check {
        /// Document to validate (YAML or JSON)
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Rule set file to use instead of the configured one
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// Manage the project rule set
    Rules {
        #[command(subcommand)]
        subcommand: RulesCommands,
    },
    /// Write a default config and rule set file
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum RulesCommands {
    /// List rules, optionally only those of one group
    List {
        #[arg(long)]
        group: Option<String>,
    },
    /// List the template gallery
    Templates,
    /// Add a rule from a template
    Use {
        template: String,
        /// Id for the new rule (defaults to the template id)
        #[arg(long)]
        id: Option<String>,
    },
    /// Add a custom rule from a script file
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long = "type", value_enum, default_value_t = RuleType::Custom)]
        rule_type: RuleType,
        #[arg(long, value_enum, default_value_t = Severity::Warning)]
        severity: Severity,
        #[arg(long, value_enum)]
        input: Option<InputShape>,
        #[arg(long)]
        description: Option<String>,
        /// File holding the predicate script
        #[arg(long)]
        script: PathBuf,
        #[arg(long)]
        group: Option<String>,
    },
    /// Change fields of an existing rule
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_enum)]
        severity: Option<Severity>,
        /// Replace the predicate with the script in this file
        #[arg(long)]
        script: Option<PathBuf>,
    },
    Remove {
        id: String,
    },
    Enable {
        id: String,
    },
    Disable {
        id: String,
    },
    /// Copy a rule under a fresh id
    Duplicate {
        id: String,
    },
    /// Move a rule into a group, or out of any group when --group is omitted
    Move {
        id: String,
        #[arg(long)]
        group: Option<String>,
    },
    GroupAdd {
        id: String,
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete a group; its rules become ungrouped
    GroupRemove {
        id: String,
    },
    /// Write the rule set in exchange format (stdout when --out is omitted)
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Replace the rule set with an exchange file
    Import {
        file: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Sarif,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_check_with_format() {
        let cli =
            Cli::try_parse_from(["contract-sentinel", "check", "api.yaml", "--format", "sarif"])
                .unwrap();
        match cli.command {
            Commands::Check { file, format, rules } => {
                assert_eq!(file, PathBuf::from("api.yaml"));
                assert_eq!(format, OutputFormat::Sarif);
                assert!(rules.is_none());
            }
            _ => panic!("expected check"),
        }
    }

    #[test]
    fn test_cli_parses_rules_add() {
        let cli = Cli::try_parse_from([
            "contract-sentinel",
            "-v",
            "rules",
            "add",
            "--id",
            "no-admin",
            "--name",
            "No admin",
            "--input",
            "route",
            "--severity",
            "error",
            "--script",
            "no-admin.rhai",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Rules {
                subcommand: RulesCommands::Add { rule_type, severity, input, .. },
            } => {
                assert_eq!(rule_type, RuleType::Custom);
                assert_eq!(severity, Severity::Error);
                assert_eq!(input, Some(InputShape::Route));
            }
            _ => panic!("expected rules add"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_severity() {
        let args = ["contract-sentinel", "rules", "update", "x", "--severity", "fatal"];
        assert!(Cli::try_parse_from(args).is_err());
    }
}
