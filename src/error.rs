//! Error types for the probe station.
//!
//! `ProbeError` is the single error type returned by drivers, parameters and
//! the sweep orchestrator. Built with `thiserror`, it separates the failure
//! classes a caller has to tell apart:
//!
//! - **`InvalidArgument`**: caller input failed validation. Raised before any
//!   command reaches the instrument.
//! - **`InvalidOperation`**: the request is well formed but not allowed in the
//!   current state (4-wire mode without a voltmeter, reading a write-only
//!   parameter, ...).
//! - **`Communication`**: the transport failed. Adapters report errors with
//!   `anyhow` context and the chain is carried through unchanged.
//! - **`Parse`**: the instrument answered, but not in the expected format.
//! - **`CommandFormat`**: a SCPI command template could not be rendered.
//! - **`Config`**: loading or validating the station configuration failed.
//!
//! Nothing in the crate retries or swallows these errors.

use thiserror::Error;

use crate::config::ConfigError;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, ProbeError>;

/// Errors raised by the drivers and the probe station.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Caller input out of range or malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not permitted in the current state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Transport failure reported by the adapter.
    #[error("Communication error: {0:#}")]
    Communication(#[from] anyhow::Error),

    /// Instrument response did not match the expected format.
    #[error("Failed to parse response '{response}' to '{command}': {reason}")]
    Parse {
        /// Command whose response failed to parse.
        command: String,
        /// Raw response as returned by the adapter.
        response: String,
        /// What was wrong with it.
        reason: String,
    },

    /// SCPI command template could not be rendered.
    #[error("Command format error: {0}")]
    CommandFormat(String),

    /// Configuration load or validation failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ProbeError {
    pub(crate) fn parse(
        command: impl Into<String>,
        response: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ProbeError::Parse {
            command: command.into(),
            response: response.into(),
            reason: reason.into(),
        }
    }
}
