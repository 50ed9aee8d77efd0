//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;
use tilestream::cache::CacheError;
use tilestream::source::{DataSourceError, FetchError};

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Tile coordinates outside the slippy-map grid
    InvalidTile(String),
    /// Failed to initialize logging
    LoggingInit(String),
    /// Failed to create the HTTP client
    Client(FetchError),
    /// Failed to download a tile
    Download(DataSourceError),
    /// Failed to write the output file
    FileWrite { path: String, error: std::io::Error },
    /// Cache operation failed
    Cache(CacheError),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        // Print additional help for specific errors
        if let CliError::Download(DataSourceError::BadResponse { status, .. }) = self {
            if *status == 403 || *status == 429 {
                eprintln!();
                eprintln!("The tile server rejected the request. Check that:");
                eprintln!("  1. The URL template points at a server allowing direct tile access");
                eprintln!("  2. You are within the server's rate limits");
            }
        }

        let code = match self {
            CliError::LoggingInit(_) => 2,
            CliError::Client(_) => 3,
            CliError::Download(_) => 4,
            CliError::FileWrite { .. } => 5,
            CliError::Cache(_) => 6,
            CliError::InvalidTile(_) => 7,
        };
        process::exit(code);
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidTile(msg) => write!(f, "invalid tile coordinates: {}", msg),
            CliError::LoggingInit(msg) => write!(f, "failed to initialize logging: {}", msg),
            CliError::Client(e) => write!(f, "failed to create HTTP client: {}", e),
            CliError::Download(e) => write!(f, "failed to download tile: {}", e),
            CliError::FileWrite { path, error } => {
                write!(f, "failed to write {}: {}", path, error)
            }
            CliError::Cache(e) => write!(f, "cache operation failed: {}", e),
        }
    }
}

impl std::error::Error for CliError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = CliError::Download(DataSourceError::Network("refused".into()));
        assert_eq!(
            err.to_string(),
            "failed to download tile: network error: refused"
        );

        let err = CliError::LoggingInit("disk full".into());
        assert!(err.to_string().contains("disk full"));
    }
}
