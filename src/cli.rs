//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

/// Attack-graph driven mitigation engine.
#[derive(Parser, Debug)]
#[command(name = "mitigator", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine: bus and HTTP ingress, attack graphs, planner,
    /// dispatcher.
    Serve(ConfigArgs),

    /// Load the configuration and catalogs, report problems, and exit.
    Validate(ConfigArgs),

    /// Display version information.
    Version,
}

/// Arguments shared by commands that read the configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Configuration file.
    #[arg(short, long, env = "MITIGATOR_CONFIG")]
    pub config: PathBuf,
}
