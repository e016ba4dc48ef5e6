// src/main.rs

mod cli;
mod commands;

use ampkg::PackagerConfig;
use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        report_error(&e);
        std::process::exit(1);
    }
}

/// Print a failed command, tagged with the library error kind when there is one
fn report_error(e: &anyhow::Error) {
    match e.chain().find_map(|cause| cause.downcast_ref::<ampkg::Error>()) {
        Some(err) if err.is_canceled() => eprintln!("Canceled: {:#}", e),
        Some(err) => eprintln!("Error [{}]: {:#}", err.kind(), e),
        None => eprintln!("Error: {:#}", e),
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => PackagerConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => PackagerConfig::default(),
    };

    match cli.command {
        Commands::CreatePackage {
            destination,
            source_dir,
            extra,
            extra_signed,
        } => commands::cmd_create_package(&destination, &source_dir, &extra, &extra_signed),

        Commands::DevSignPackage {
            source,
            destination,
            certificate,
            password,
        } => commands::cmd_dev_sign_package(&source, &destination, &certificate, &password),

        Commands::DevVerifyPackage {
            source,
            certificates,
        } => commands::cmd_dev_verify_package(&source, &certificates),

        Commands::StoreSignPackage {
            source,
            destination,
            certificate,
            password,
            hardware_id,
        } => commands::cmd_store_sign_package(
            &source,
            &destination,
            &certificate,
            &password,
            &hardware_id,
        ),

        Commands::StoreVerifyPackage {
            source,
            certificates_and_hardware_id,
        } => commands::cmd_store_verify_package(&source, &certificates_and_hardware_id),

        Commands::ExtractPackage {
            source,
            destination,
            report,
        } => commands::cmd_extract_package(&source, &destination, report.as_deref(), &config),
    }
}
