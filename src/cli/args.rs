//! CLI argument structures

use crate::app::OutputFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Inspect splitter/combiner state spaces of pipeline nodes
#[derive(Parser)]
#[command(name = "statespace")]
#[command(
    about = "statespace - Enumerate the states implied by node splitters and combiners",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a plan file and enumerate the states of its nodes
    #[command(name = "plan")]
    Plan {
        /// Plan file (YAML, or JSON with a .json extension)
        file: PathBuf,

        /// Only report this node (its upstreams are still materialized)
        #[arg(short, long)]
        node: Option<String>,
    },

    /// Show the postfix program of a single splitter
    #[command(name = "rpn")]
    Rpn {
        /// Splitter in bracket notation, e.g. "[a, (b, c)]"
        splitter: String,

        /// Qualify fields with this node name
        #[arg(short, long)]
        node: Option<String>,
    },
}
