//! Hardware adapter implementations
//!
//! This module defines the [`ScpiAdapter`] trait, the low-level I/O seam every
//! driver talks through, and its implementations for the supported transports:
//!
//! - [`VisaAdapter`]: GPIB/USB/LAN instruments through a VISA library
//!   (`instrument_visa` feature)
//! - [`SerialAdapter`]: RS-232 instruments (`instrument_serial` feature)
//! - [`MockAdapter`]: in-memory test double with scripted responses

pub mod mock;
pub mod serial_adapter;
pub mod visa_adapter;

pub use mock::MockAdapter;
pub use serial_adapter::{SerialAdapter, SerialAdapterBuilder};
pub use visa_adapter::{VisaAdapter, VisaAdapterBuilder};

use anyhow::Result;
use async_trait::async_trait;

/// Line-oriented SCPI transport.
///
/// Implementations own connection setup and framing (terminators, timeouts).
/// Callers see one command in, at most one trimmed response line out.
///
/// ## Command Queuing
/// - Adapters serialise access internally with `tokio::sync::Mutex`
/// - Commands execute in call order, one at a time
///
/// ## Error Recovery
/// - Failures are reported with `anyhow` context and never retried
#[async_trait]
pub trait ScpiAdapter: Send + Sync {
    /// Send a command without reading a response (e.g. `"*CLS"`, `"INIT"`).
    async fn write(&self, command: &str) -> Result<()>;

    /// Send a command and read one response line (e.g. `"FETC?"`).
    ///
    /// The returned string has its terminator and surrounding whitespace removed.
    async fn ask(&self, command: &str) -> Result<String>;

    /// Human-readable description of the connection, for logs.
    fn info(&self) -> String;
}
