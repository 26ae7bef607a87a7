//! CLI command definitions and dispatch.

pub mod generate;

use clap::{Parser, Subcommand};

/// stackgraph: dependency-aware Atlantis config generation for terragrunt.
#[derive(Parser, Debug)]
#[command(name = "stackgraph", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "STACKGRAPH_LOG_JSON")]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve a terragrunt tree and write the project list.
    Generate(generate::GenerateArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Generate(args) => generate::execute(args),
    }
}
