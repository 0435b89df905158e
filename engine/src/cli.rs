//! Command-line surface of the `weave` binary

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use weave_sdk::types::Priority;

/// Weave autonomous task loop
///
/// Perceives context, reasons over candidate plans, executes the best one
/// with retries and fallbacks, reflects on the result and remembers it.
#[derive(Parser, Debug)]
#[command(name = "weave")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Print results as JSON and log as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Override the configured log level
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Load this config file instead of ~/.weave/config.toml
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a task through the full loop
    Run {
        /// What the loop should accomplish
        description: String,

        /// Domain used for memory retrieval and lesson tagging
        #[arg(short, long, default_value = "general")]
        domain: String,

        #[arg(short, long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,

        /// Force tree-structured plan exploration
        #[arg(long)]
        deep: bool,
    },

    /// Show recently stored experiences
    History {
        /// Number of experiences to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Analyze recurring lessons across stored experiences
    Patterns {
        /// Number of recent experiences to analyze (default: 100)
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// Delete experiences past their retention period
    Evict,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Print the configuration file path
    Path,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityArg {
    Low,
    Normal,
    High,
    Critical,
}

impl From<PriorityArg> for Priority {
    fn from(p: PriorityArg) -> Self {
        match p {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::High => Priority::High,
            PriorityArg::Critical => Priority::Critical,
        }
    }
}
