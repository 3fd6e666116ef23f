use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Command line arguments for the atrium agent runtime CLI.
#[derive(Parser, Debug)]
#[clap(name = "atrium", about = "Interactive CLI for the atrium agent runtime", allow_hyphen_values = true)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// The message to send. If not provided, enters interactive mode.
    #[arg()]
    pub prompt: Option<String>,

    /// Agent id to lease. Generated fresh on first run if omitted.
    #[arg(long)]
    pub agent_id: Option<String>,

    /// Model name recorded on the agent and passed to the provider.
    #[arg(long, default_value = "atrium-demo-model")]
    pub model: String,

    /// System prompt. Can be specified multiple times for multi-part prompts.
    #[arg(short, long, action = clap::ArgAction::Append)]
    pub system: Vec<String>,

    /// Root directory agent state is persisted under.
    #[arg(long)]
    pub store_root: Option<PathBuf>,

    /// Path to a TOML config file overriding the built-in defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Maximum turns per `Chat()` call.
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Baseline tool permission gate.
    #[arg(long, value_enum)]
    pub permission_mode: Option<PermissionModeArg>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum PermissionModeArg {
    Auto,
    Approval,
    Readonly,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate shell completions
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}
