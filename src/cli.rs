// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `agentflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "agentflow",
    version,
    about = "Run a project's tasks in dependency order and report lifecycle events.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the project file (TOML).
    #[arg(long, value_name = "PATH", default_value = "agentflow.toml")]
    pub project: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `AGENTFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the execution order and feature board, but
    /// don't execute any commands.
    #[arg(long)]
    pub dry_run: bool,

    /// Number of recent events to print after the run.
    #[arg(long, value_name = "N", default_value_t = 20)]
    pub history: usize,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
