mod config;
mod logging;
mod metrics;

use clap::{Parser, Subcommand};
use config::Config;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "bugdesk", version, about = "Crash report intake service")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, short, default_value = "bugdesk.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the intake API
    Intake,
    /// Load and validate the configuration, then exit
    CheckConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        CliCommand::CheckConfig => match config.intake.validate() {
            Ok(()) => {
                println!("{}: ok", cli.config.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {e}", cli.config.display());
                ExitCode::FAILURE
            }
        },
        CliCommand::Intake => run_intake(config),
    }
}

fn run_intake(config: Config) -> ExitCode {
    let _sentry = match logging::init(&config.common.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to set up logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(metrics_config) = &config.common.metrics {
        if let Err(e) = metrics::init(metrics_config) {
            tracing::error!(error = %e, "failed to set up metrics");
            return ExitCode::FAILURE;
        }
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(listener = %config.intake.listener.addr(), "starting intake");
    match runtime.block_on(intake::run(config.intake)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "intake stopped");
            ExitCode::FAILURE
        }
    }
}
