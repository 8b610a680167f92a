//! CLI definitions for visu-scheme.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "visu-scheme",
    version,
    about = "Live SVG telemetry scheme client",
    infer_subcommands = true,
    after_help = "Examples:\n  visu-scheme check --config ./conf\n  visu-scheme run --config ./conf --scheme boiler --duration 30\n  visu-scheme write --config ./conf --scheme boiler --element sp --value 42\n  visu-scheme history --config ./conf --scheme boiler --element t_out --range -12h"
)]
pub struct Cli {
    /// Show debug logs.
    #[arg(long, short, global = true)]
    pub verbose: bool,
    /// Configuration file or directory of *.toml files.
    #[arg(long, short, global = true, default_value = "conf")]
    pub config: PathBuf,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate the configuration and print each scheme's subscriptions.
    Check {
        /// Only check this scheme.
        #[arg(long)]
        scheme: Option<String>,
    },
    /// Connect to the data modules and print target updates.
    Run {
        /// Scheme id (defaults to the first configured scheme).
        #[arg(long)]
        scheme: Option<String>,
        /// SVG document overriding the scheme's svg_path.
        #[arg(long)]
        svg: Option<PathBuf>,
        /// Stop after this many seconds.
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Validate and send one write.
    Write {
        #[arg(long)]
        scheme: Option<String>,
        /// svg id of the element to write.
        #[arg(long)]
        element: String,
        #[arg(long)]
        value: String,
    },
    /// Fetch the history of one element.
    History {
        #[arg(long)]
        scheme: Option<String>,
        /// svg id of the element.
        #[arg(long)]
        element: String,
        /// One of -5m, -30m, -1h, -12h, -1d, -7d, -30d.
        #[arg(long, default_value = "-1h")]
        range: String,
    },
}
