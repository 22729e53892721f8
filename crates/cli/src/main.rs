//! Traffic manager 命令行入口

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Commands, LogFormat};

fn main() -> Result<()> {
    let args = Cli::parse();

    init_observability(&args)?;

    match args.command {
        Commands::Run(run_args) => commands::run::execute(run_args),
        Commands::Validate(validate_args) => commands::validate::execute(validate_args),
        Commands::Info(info_args) => commands::info::execute(info_args),
    }
}

fn init_observability(args: &Cli) -> Result<()> {
    let level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let log_format = match args.log_format {
        LogFormat::Json => observability::LogFormat::Json,
        LogFormat::Pretty => observability::LogFormat::Pretty,
        LogFormat::Compact => observability::LogFormat::Compact,
    };

    observability::init_with_config(observability::ObservabilityConfig {
        log_format,
        // The run command installs the exporter itself, with its own port.
        metrics_port: None,
        default_log_level: level.to_string(),
    })
}
