//! ttybridge - serial device terminal

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ttybridge::app::{list_serial_devices, Cli, Config, ConfigFile};
use ttybridge::SessionError;

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        return match list_serial_devices() {
            Ok(devices) => {
                for device in devices {
                    println!("{}", device.display());
                }
                ExitCode::SUCCESS
            },
            Err(e) => {
                eprintln!("Error: Could not list devices: {}", e);
                ExitCode::FAILURE
            },
        };
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!("Exiting after error: {:?}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        },
    }
}

fn run(cli: &Cli) -> Result<(), SessionError> {
    let file = match &cli.config {
        Some(path) => Some(ConfigFile::load(path)?),
        None => ConfigFile::load_default()?,
    };

    let target = cli.device.as_deref().unwrap_or_default();
    let config = Config::resolve(target, file.as_ref(), &cli.overrides())?;
    tracing::info!("Starting on {}", config.device);

    ttybridge::session::run(config)
}
