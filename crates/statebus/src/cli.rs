//! Clap derive structures for the `statebus` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// statebus -- stream device state onto a message bus
#[derive(Debug, Parser)]
#[command(
    name = "statebus",
    version,
    about = "Collect device state and publish it onto a message bus",
    long_about = "Runs the state collector daemon and talks to a running one.\n\n\
        Targets are configured with state entries (xpaths to subscribe to).\n\
        Every notification is published under a subject derived from its path.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "STATEBUS_CONFIG_FILE", global = true)]
    pub config: Option<PathBuf>,

    /// State server to talk to
    #[arg(
        long,
        env = "STATEBUS_RPC_URL",
        default_value = "ws://127.0.0.1:9999",
        global = true
    )]
    pub server: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "json", global = true)]
    pub output: OutputFormat,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the collector daemon and state server
    Serve,

    /// Print the bus subject for a filter expression
    Subject(SubjectArgs),

    /// Read a target's running configuration
    Get(GetArgs),

    /// Create or replace a state entry
    Set(SetArgs),

    /// Remove a state entry
    #[command(alias = "rm")]
    Delete(DeleteArgs),

    /// Stream a target's running configuration as it changes
    Watch(TargetArgs),

    /// Inspect configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct SubjectArgs {
    /// Filter expression, e.g. `/interface[name=*]/oper-state`
    pub expression: String,
}

#[derive(Debug, Args)]
pub struct TargetArgs {
    /// Target identifier (`namespace/name`)
    #[arg(long, short = 't')]
    pub target: String,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Paths to read (defaults to the whole tree)
    #[arg(long = "path", short = 'p')]
    pub paths: Vec<String>,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// State entry name
    #[arg(long, short = 'n')]
    pub name: String,

    /// Xpath to subscribe to (repeatable)
    #[arg(long = "path", short = 'p', required = true)]
    pub paths: Vec<String>,

    /// Xpath prepended to every path
    #[arg(long)]
    pub prefix: Option<String>,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// State entry name
    #[arg(long, short = 'n')]
    pub name: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
    /// Print the default config file path
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }
}
