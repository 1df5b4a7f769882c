use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "azbackup",
    about = "Deploy the backup Terraform module into scratch resource groups and verify what Azure reports",
    version
)]
pub struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, env = "AZBACKUP_LOG_JSON", global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run scenarios: setup, validate, teardown.
    Run {
        /// Scenario table (YAML). The built-in scenarios are used when omitted.
        #[arg(long, env = "AZBACKUP_SCENARIOS")]
        file: Option<PathBuf>,

        /// Only run the named scenarios. May be repeated.
        #[arg(long)]
        only: Vec<String>,

        /// How many scenarios run at once.
        #[arg(long, default_value_t = 1, env = "AZBACKUP_PARALLEL")]
        parallel: usize,

        /// Report format.
        #[arg(long, default_value = "text")]
        output: ReportOutput,
    },

    /// List the scenarios a run would execute.
    List {
        /// Scenario table (YAML). The built-in scenarios are used when omitted.
        #[arg(long, env = "AZBACKUP_SCENARIOS")]
        file: Option<PathBuf>,
    },

    /// Resolve the environment and acquire a management token.
    CheckEnv,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ReportOutput {
    Text,
    Json,
}
