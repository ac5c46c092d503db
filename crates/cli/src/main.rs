use std::process::ExitCode;

use clap::Parser;
use mess_core::ErrorKind;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;
mod commands;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match commands::run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<mess_core::Error>().map(|e| e.kind()) {
        Some(ErrorKind::Validation) => 2,
        Some(ErrorKind::Conflict) => 3,
        Some(ErrorKind::State) => 4,
        Some(ErrorKind::NotFound) => 5,
        Some(ErrorKind::Internal) | None => 1,
    }
}
