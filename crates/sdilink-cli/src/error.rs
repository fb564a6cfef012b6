// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::process::ExitCode;

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments or configuration files
    InvalidArgs(String),
    /// Device, channel or sub-unit not found
    NotFound(String),
    /// Channel busy or format not supported by the hardware
    Unavailable(String),
    /// Operation timed out
    Timeout(String),
    /// General error from the sdilink library
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::NotFound(msg) => write!(f, "Not found: {}", msg),
            CliError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            CliError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            CliError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::InvalidArgs(_) => ExitCode::from(2),
            CliError::NotFound(_) => ExitCode::from(3),
            CliError::Unavailable(_) => ExitCode::from(4),
            CliError::Timeout(_) => ExitCode::from(6),
            CliError::General(_) => ExitCode::from(1),
        }
    }
}

/// Map sdilink::Error to CliError with appropriate exit codes
impl From<sdilink::Error> for CliError {
    fn from(err: sdilink::Error) -> Self {
        use sdilink::Error;

        if err.is_not_found() {
            return CliError::NotFound(err.to_string());
        }
        match err {
            Error::ChannelBusy { .. } | Error::UnsupportedFormat(_) => {
                CliError::Unavailable(err.to_string())
            }
            Error::Timeout(_) => CliError::Timeout(err.to_string()),
            Error::InvalidSettings(_) | Error::Json(_) => CliError::InvalidArgs(err.to_string()),
            Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
                CliError::InvalidArgs(err.to_string())
            }
            _ => CliError::General(err.to_string()),
        }
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, CliError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}
