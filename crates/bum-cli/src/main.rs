//! bum CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::{Instrument, info_span};

use bum_cli::cli::{Cli, Command, ConfigAction};
use bum_cli::commands;
use bum_cli::config::BumConfig;
use bum_cli::error::{CliError, CliResult};
use bum_cli::launcher::FrontLaunch;
use bum_core::{TracingConfig, TracingOutputFormat, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<ExitCode> {
    let config_path = cli.config.clone().unwrap_or_else(BumConfig::default_path);
    let config = if cli.config.is_some() {
        BumConfig::load_from(&config_path)?
    } else {
        BumConfig::load()?
    };

    match cli.command {
        Command::Serve(ref args) => {
            init_logging(&cli, &config)?;
            let settings = config.serve_settings(args)?;
            let mut launch = FrontLaunch::new(settings.listen.clone(), settings.coordinator.transcode_format);
            launch.verbose = cli.verbose;
            launch.log_format = cli.log_format.clone();
            commands::serve::run(settings, launch)
                .instrument(info_span!("process", role = "coordinator"))
                .await
        }
        Command::Front { ref listen, ref format } => {
            init_logging(&cli, &config)?;
            let format = format.parse().map_err(CliError::Config)?;
            commands::front::run(listen, format)
                .instrument(info_span!("process", role = "front"))
                .await
        }
        Command::Config { ref action } => {
            match action {
                ConfigAction::Dump => commands::config::dump(&config, &config_path)?,
                ConfigAction::Validate => commands::config::validate(&config)?,
                ConfigAction::Path => commands::config::path(&config_path)?,
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(cli: &Cli, config: &BumConfig) -> CliResult<()> {
    let format = match cli.log_format {
        Some(ref format) => format.parse::<TracingOutputFormat>().map_err(CliError::Config)?,
        None => config.logging.format,
    };
    let tracing = match (cli.verbose, format) {
        (true, _) => TracingConfig::verbose().with_format(format),
        // JSON logs go to a supervisor, which also wants spans and locations.
        (false, TracingOutputFormat::Json) => TracingConfig::service().with_level(config.log_level()?),
        (false, _) => TracingConfig::default()
            .with_level(config.log_level()?)
            .with_format(format),
    };
    init_tracing(tracing)?;
    Ok(())
}
