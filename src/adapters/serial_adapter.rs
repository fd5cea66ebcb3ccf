//! Serial adapter for RS-232 SCPI instruments
//!
//! Both the 2182A and the 2400 expose SCPI over their RS-232 port. This
//! adapter wraps the `serialport` crate and runs its blocking I/O on Tokio's
//! blocking task executor.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use anyhow::{anyhow, Context};
#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;
#[cfg(feature = "instrument_serial")]
use tracing::debug;

use super::ScpiAdapter;

/// Builder for [`SerialAdapter`]
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use probe_station::adapters::SerialAdapterBuilder;
///
/// # async fn example() -> anyhow::Result<()> {
/// let adapter = SerialAdapterBuilder::new("/dev/ttyUSB0", 9600)
///     .with_timeout(Duration::from_millis(500))
///     .open()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct SerialAdapterBuilder {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    line_terminator: String,
    response_delimiter: char,
}

impl SerialAdapterBuilder {
    /// Create a new builder with required parameters
    ///
    /// Default configuration:
    /// * timeout: 1 second
    /// * line_terminator: "\n"
    /// * response_delimiter: '\n'
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_secs(1),
            line_terminator: "\n".to_string(),
            response_delimiter: '\n',
        }
    }

    /// Set the read timeout duration
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the line terminator string for commands
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    /// Set the response delimiter character
    pub fn with_response_delimiter(mut self, delimiter: char) -> Self {
        self.response_delimiter = delimiter;
        self
    }

    /// Open the serial port
    #[cfg(feature = "instrument_serial")]
    pub async fn open(self) -> Result<SerialAdapter> {
        let port_name = self.port_name.clone();
        let baud_rate = self.baud_rate;

        let port = tokio::task::spawn_blocking(move || -> Result<Box<dyn SerialPort>> {
            serialport::new(&port_name, baud_rate)
                // Internal read timeout; the overall timeout is enforced per query
                .timeout(Duration::from_millis(100))
                .open()
                .with_context(|| {
                    format!(
                        "Failed to open serial port '{}' at {} baud",
                        port_name, baud_rate
                    )
                })
        })
        .await
        .context("Serial open task panicked")??;

        debug!(
            "Serial port '{}' opened at {} baud",
            self.port_name, self.baud_rate
        );

        Ok(SerialAdapter {
            port: Arc::new(Mutex::new(port)),
            port_name: self.port_name,
            baud_rate: self.baud_rate,
            timeout: self.timeout,
            line_terminator: self.line_terminator,
            response_delimiter: self.response_delimiter,
        })
    }

    /// Open the serial port (fails: serial support not compiled in)
    #[cfg(not(feature = "instrument_serial"))]
    pub async fn open(self) -> Result<SerialAdapter> {
        bail!(
            "Serial support not enabled for '{}' ({} baud, {}ms timeout, {}/{:?} framing). \
             Rebuild with --features instrument_serial",
            self.port_name,
            self.baud_rate,
            self.timeout.as_millis(),
            self.line_terminator.escape_debug(),
            self.response_delimiter
        )
    }
}

/// Serial adapter for RS-232 communication
pub struct SerialAdapter {
    #[cfg(feature = "instrument_serial")]
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    line_terminator: String,
    response_delimiter: char,
}

impl SerialAdapter {
    /// Port name this adapter was opened with
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Configured baud rate
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

#[cfg(feature = "instrument_serial")]
#[async_trait]
impl ScpiAdapter for SerialAdapter {
    async fn write(&self, command: &str) -> Result<()> {
        let port = Arc::clone(&self.port);
        let request = format!("{}{}", command, self.line_terminator);
        let command_for_log = command.to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            use std::io::Write;

            let mut port_guard = port.blocking_lock();
            port_guard
                .write_all(request.as_bytes())
                .with_context(|| format!("Failed to write '{}' to serial port", command_for_log))?;
            port_guard.flush().context("Failed to flush serial port")?;

            debug!("Sent serial command: {}", command_for_log);
            Ok(())
        })
        .await
        .context("Serial I/O task panicked")?
    }

    async fn ask(&self, command: &str) -> Result<String> {
        let port = Arc::clone(&self.port);
        let request = format!("{}{}", command, self.line_terminator);
        let command_for_log = command.to_string();
        let delimiter = self.response_delimiter;
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || -> Result<String> {
            use std::io::{Read, Write};

            let mut port_guard = port.blocking_lock();
            port_guard
                .write_all(request.as_bytes())
                .with_context(|| format!("Failed to write '{}' to serial port", command_for_log))?;
            port_guard.flush().context("Failed to flush serial port")?;

            debug!("Sent serial command: {}", command_for_log);

            // Read byte-by-byte until the delimiter
            let mut response = String::new();
            let mut buffer = [0u8; 1];
            let start = std::time::Instant::now();

            loop {
                if start.elapsed() > timeout {
                    return Err(anyhow!(
                        "Serial read timeout after {:?} waiting for response to '{}'",
                        timeout,
                        command_for_log
                    ));
                }

                match port_guard.read(&mut buffer) {
                    Ok(0) => bail!("Unexpected EOF from serial port"),
                    Ok(_) => {
                        let ch = buffer[0] as char;
                        if ch == delimiter {
                            break;
                        }
                        response.push(ch);
                    }
                    // Port timeout is shorter than our overall timeout
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => return Err(anyhow!("Serial read error: {}", e)),
                }
            }

            let response = response.trim().to_string();
            debug!("Received serial response: {}", response);
            Ok(response)
        })
        .await
        .context("Serial I/O task panicked")?
    }

    fn info(&self) -> String {
        format!(
            "SerialAdapter({} @ {} baud, {}ms timeout)",
            self.port_name,
            self.baud_rate,
            self.timeout.as_millis()
        )
    }
}

#[cfg(not(feature = "instrument_serial"))]
#[async_trait]
impl ScpiAdapter for SerialAdapter {
    async fn write(&self, _command: &str) -> Result<()> {
        bail!("Serial support not enabled. Rebuild with --features instrument_serial")
    }

    async fn ask(&self, _command: &str) -> Result<String> {
        bail!("Serial support not enabled. Rebuild with --features instrument_serial")
    }

    fn info(&self) -> String {
        format!(
            "SerialAdapter({} @ {} baud, {}ms timeout, {}/{:?} framing, disabled)",
            self.port_name,
            self.baud_rate,
            self.timeout.as_millis(),
            self.line_terminator.escape_debug(),
            self.response_delimiter
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = SerialAdapterBuilder::new("/dev/ttyUSB0", 9600);
        assert_eq!(builder.port_name, "/dev/ttyUSB0");
        assert_eq!(builder.baud_rate, 9600);
        assert_eq!(builder.timeout, Duration::from_secs(1));
        assert_eq!(builder.line_terminator, "\n");
        assert_eq!(builder.response_delimiter, '\n');
    }

    #[test]
    fn test_builder_fluent_api() {
        let builder = SerialAdapterBuilder::new("COM3", 19200)
            .with_timeout(Duration::from_millis(2000))
            .with_line_terminator("\r\n")
            .with_response_delimiter('\r');
        assert_eq!(builder.timeout, Duration::from_millis(2000));
        assert_eq!(builder.line_terminator, "\r\n");
        assert_eq!(builder.response_delimiter, '\r');
    }

    #[cfg(not(feature = "instrument_serial"))]
    #[tokio::test]
    async fn test_open_without_feature_fails() {
        let result = SerialAdapterBuilder::new("/dev/ttyUSB0", 19200)
            .with_line_terminator("\r")
            .with_response_delimiter('\r')
            .open()
            .await;
        let message = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("instrument_serial"));
        assert!(message.contains("'/dev/ttyUSB0' (19200 baud, 1000ms timeout"));
        assert!(message.contains("\\r/'\\r' framing"));
    }
}
