use clap::Parser;
use colored::Colorize;
use contract_sentinel::commands::{self, Cli, Commands};
use contract_sentinel::config::SentinelConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "contract_sentinel=debug"
    } else {
        "contract_sentinel=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_root = SentinelConfig::find_project_root()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let result = match cli.command {
        Commands::Check { file, format, rules } => {
            commands::check::handle_check(&project_root, &file, format, rules.as_deref())
        }
        Commands::Rules { subcommand } => {
            commands::rules::handle_rules_command(&project_root, subcommand).map(|()| 0)
        }
        Commands::Init { force } => {
            let cwd = std::env::current_dir().unwrap_or(project_root);
            commands::init::handle_init_command(&cwd, force).map(|()| 0)
        }
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            std::process::exit(2);
        }
    }
}
