//! Tilestream CLI - Command-line interface
//!
//! This binary provides a command-line interface to the tilestream library.

use clap::{Parser, Subcommand};

mod commands;
mod error;

use error::CliError;

#[derive(Parser)]
#[command(name = "tilestream")]
#[command(version = tilestream::VERSION)]
#[command(about = "Fetch and cache map tiles", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a single tile and write it to a file
    Fetch(commands::fetch::FetchArgs),
    /// Purge a tile source's disk cache down to its size limit
    Purge(commands::purge::PurgeArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let _guard = match tilestream::logging::init_logging(
        tilestream::logging::default_log_dir(),
        tilestream::logging::default_log_file(),
    ) {
        Ok(guard) => guard,
        Err(e) => CliError::LoggingInit(e.to_string()).exit(),
    };

    let result = match cli.command {
        Command::Fetch(args) => commands::fetch::run(args).await,
        Command::Purge(args) => commands::purge::run(args).await,
    };

    if let Err(e) = result {
        e.exit();
    }
}
