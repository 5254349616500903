//! loopshare CLI entry point.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cli;

/// loopshare - loop-device-backed virtual disks for file shares
#[derive(Parser, Debug)]
#[command(name = "loopshare")]
#[command(about = "Loop-device-backed virtual disks for file shares")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision every share disk from the configuration file.
    Provision(cli::provision::ProvisionCmd),

    /// Show the state of one disk image.
    Status(cli::status::StatusCmd),

    /// Grow a disk image to a new size.
    Resize(cli::resize::ResizeCmd),

    /// Unmount a disk image and delete its backing file.
    #[command(alias = "rm")]
    Delete(cli::delete::DeleteCmd),

    /// Watch the share service and report connection/session/file events.
    Monitor(cli::monitor::MonitorCmd),
}

fn main() {
    let cli = Cli::parse();

    init_logging();

    tracing::debug!(version = loopshare::VERSION, "starting loopshare");

    let result = match cli.command {
        Commands::Provision(cmd) => cmd.run(),
        Commands::Status(cmd) => cmd.run(),
        Commands::Resize(cmd) => cmd.run(),
        Commands::Delete(cmd) => cmd.run(),
        Commands::Monitor(cmd) => cmd.run(),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber.
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("loopshare=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
