//! CLI entrypoint for visu-scheme.

#[path = "visu-scheme/cli.rs"]
mod cli;
#[path = "visu-scheme/commands.rs"]
mod commands;
#[path = "visu-scheme/style.rs"]
mod style;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use visu_scheme::VisuConfig;

use cli::{Cli, Command};

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("{}", style::error(format!("Error: {err:#}")));
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins over `--verbose`, which wins over `client.log_level`.
fn init_tracing(verbose: bool, log_level: &str) {
    let fallback = if verbose { "debug" } else { log_level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = VisuConfig::load(&cli.config)?;
    init_tracing(cli.verbose, &config.client.log_level);
    match cli.command {
        Command::Check { scheme } => commands::check(&config, scheme.as_deref()),
        Command::Run {
            scheme,
            svg,
            duration,
        } => commands::run(&config, scheme.as_deref(), svg.as_deref(), duration),
        Command::Write {
            scheme,
            element,
            value,
        } => commands::write(&config, scheme.as_deref(), &element, &value),
        Command::History {
            scheme,
            element,
            range,
        } => commands::history(&config, scheme.as_deref(), &element, &range),
    }
}
