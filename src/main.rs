//! `pgoprof`: merge, convert and inspect `.ap` profiles.

mod cli_logger;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::process::ExitCode;

use pgoprof::{
    Config, ConvertArgs, DumpArgs, MergeArgs, Reporter, convert_command, dump_command,
    merge_command,
};

use crate::cli_logger::CliLogger;

#[derive(Debug, Parser)]
#[command(name = "pgoprof", version, about = "Profile-guided feedback tooling for .ap files")]
struct Cli {
    /// Config file; missing files fall back to defaults.
    #[arg(long, global = true, default_value = "pgoprof.toml")]
    config: PathBuf,
    /// Emit one JSON document instead of the pretty tree.
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true)]
    no_color: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Merge several profiles into one.
    Merge(MergeArgs),
    /// Convert a profile between the binary and text formats.
    Convert(ConvertArgs),
    /// Print the contents of a profile.
    Dump(DumpArgs),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Merge(_) => "merge",
            Self::Convert(_) => "convert",
            Self::Dump(_) => "dump",
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load_optional(&cli.config);
    let json = cli.json || config.reporter == Reporter::Json;
    let logger = CliLogger::new(json, cli.no_color);
    match run(&cli, &config, &logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logger.print_error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, config: &Config, logger: &CliLogger) -> Result<()> {
    let value = match &cli.command {
        Command::Merge(args) => merge_command(config, args)?,
        Command::Convert(args) => convert_command(config, args)?,
        Command::Dump(args) => dump_command(config, args)?,
    };
    logger.print_result(cli.command.name(), &value)
}
