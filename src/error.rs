/*!
 * Error types for orbit-adls
 */

use crate::auth::AuthError;
use crate::event::EventError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AdlsError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
/// Startup failure: configuration, first credential, local I/O
pub const EXIT_FATAL: i32 = 2;
/// A write exhausted its retries with `exit_if_retries_exceeded` set
pub const EXIT_RETRIES_EXCEEDED: i32 = 3;

#[derive(Debug, Error)]
pub enum AdlsError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential acquisition failed
    #[error("Credential error: {0}")]
    Auth(#[from] AuthError),

    /// Input record could not be parsed
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AdlsError {
    /// Get the process exit code for this error
    ///
    /// Write failures never surface here; exhausted retries exit through
    /// `core::retry::ProcessExit` with [`EXIT_RETRIES_EXCEEDED`].
    pub fn exit_code(&self) -> i32 {
        match self {
            AdlsError::Config(_) | AdlsError::Auth(_) | AdlsError::Event(_) | AdlsError::Io(_) => {
                EXIT_FATAL
            }
        }
    }
}

impl From<toml::de::Error> for AdlsError {
    fn from(err: toml::de::Error) -> Self {
        AdlsError::Config(format!("Invalid TOML: {}", err))
    }
}
