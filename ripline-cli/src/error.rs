//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use ripline::drive::DriveError;
use ripline::process::ProcessError;
use ripline::review::ReviewError;
use ripline::storage::StorageError;
use std::fmt;
use std::process;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Plan or metadata access failed
    Storage(StorageError),
    /// Recording a review verdict failed
    Review(ReviewError),
    /// Drive hardware access failed
    Drive(DriveError),
    /// Disc processing failed
    Process(ProcessError),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        // Print additional help for specific errors
        match self {
            CliError::Config(_) => {
                eprintln!();
                eprintln!("Copy stage configuration comes from the environment:");
                eprintln!("  SMB_TARGET   smb://host/share[/path]");
                eprintln!("  SMB_USER     share username");
                eprintln!("  SMB_PASSWORD share password");
            }
            CliError::Drive(_) => {
                eprintln!();
                eprintln!("Common issues:");
                eprintln!("  1. No optical drive attached (expected /dev/sr*)");
                eprintln!("  2. Insufficient permissions: add your user to the 'cdrom' group");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Storage(e) => write!(f, "Storage error: {}", e),
            CliError::Review(e) => write!(f, "Review failed: {}", e),
            CliError::Drive(e) => write!(f, "Drive access failed: {}", e),
            CliError::Process(e) => write!(f, "Disc processing failed: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Storage(e) => Some(e),
            CliError::Review(e) => Some(e),
            CliError::Drive(e) => Some(e),
            CliError::Process(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        CliError::Storage(e)
    }
}

impl From<ReviewError> for CliError {
    fn from(e: ReviewError) -> Self {
        CliError::Review(e)
    }
}

impl From<DriveError> for CliError {
    fn from(e: DriveError) -> Self {
        CliError::Drive(e)
    }
}

impl From<ProcessError> for CliError {
    fn from(e: ProcessError) -> Self {
        CliError::Process(e)
    }
}
