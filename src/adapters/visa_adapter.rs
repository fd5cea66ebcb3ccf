//! VISA Hardware Adapter for GPIB/USB/Ethernet instruments
//!
//! Provides an [`ScpiAdapter`] for instruments reached through a VISA library,
//! such as the Keithley 2182A and 2400 on a GPIB bus.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_visa")]
use anyhow::{anyhow, Context};
#[cfg(feature = "instrument_visa")]
use std::sync::Arc;
#[cfg(feature = "instrument_visa")]
use tokio::sync::Mutex;
#[cfg(feature = "instrument_visa")]
use tracing::debug;
#[cfg(feature = "instrument_visa")]
use visa_rs::{
    enums::attribute::{AttrTmoValue, HasAttribute},
    flags::AccessMode,
    AsResourceManager, DefaultRM, Instrument,
};

use super::ScpiAdapter;

/// Builder for [`VisaAdapter`]
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use probe_station::adapters::VisaAdapterBuilder;
///
/// # async fn example() -> anyhow::Result<()> {
/// let adapter = VisaAdapterBuilder::new("GPIB0::24::INSTR")
///     .with_timeout(Duration::from_millis(2000))
///     .with_read_terminator("\n")
///     .connect()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct VisaAdapterBuilder {
    resource_name: String,
    timeout: Duration,
    read_terminator: String,
    write_terminator: String,
}

impl VisaAdapterBuilder {
    /// Create a new builder
    ///
    /// # Arguments
    /// * `resource_name` - VISA resource string (e.g., "GPIB0::7::INSTR")
    pub fn new(resource_name: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
            timeout: Duration::from_secs(5),
            read_terminator: "\n".to_string(),
            write_terminator: "\n".to_string(),
        }
    }

    /// Set the timeout for opening the resource and for each read or write
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the response terminator
    pub fn with_read_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.read_terminator = terminator.into();
        self
    }

    /// Set the command terminator
    pub fn with_write_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.write_terminator = terminator.into();
        self
    }

    /// Open the VISA resource
    ///
    /// # Errors
    /// Returns error if the resource manager or the resource cannot be opened
    #[cfg(feature = "instrument_visa")]
    pub async fn connect(self) -> Result<VisaAdapter> {
        let resource = self.resource_name.clone();
        let timeout = self.timeout;

        let instrument = tokio::task::spawn_blocking(move || -> Result<Instrument> {
            let rm = DefaultRM::new()
                .map_err(|e| anyhow!("Failed to create VISA resource manager: {}", e))?;
            let name = std::ffi::CString::new(resource.as_str())
                .with_context(|| format!("Invalid VISA resource string: {}", resource))?;
            let instr = rm
                .open(&name.into(), AccessMode::NO_LOCK, timeout)
                .map_err(|e| anyhow!("Failed to open VISA resource '{}': {}", resource, e))?;

            let tmo = AttrTmoValue::new_checked(io_timeout_millis(timeout))
                .ok_or_else(|| anyhow!("Invalid VISA I/O timeout: {:?}", timeout))?;
            instr
                .set_attr(tmo)
                .map_err(|e| anyhow!("Failed to set I/O timeout on '{}': {}", resource, e))?;
            Ok(instr)
        })
        .await
        .context("VISA open task panicked")??;

        debug!(
            "VISA resource '{}' opened with {}ms timeout",
            self.resource_name,
            self.timeout.as_millis()
        );

        Ok(VisaAdapter {
            instrument: Arc::new(Mutex::new(instrument)),
            resource_name: self.resource_name,
            timeout: self.timeout,
            read_terminator: self.read_terminator,
            write_terminator: self.write_terminator,
        })
    }

    /// Open the VISA resource (fails: VISA support not compiled in)
    #[cfg(not(feature = "instrument_visa"))]
    pub async fn connect(self) -> Result<VisaAdapter> {
        bail!(
            "VISA support not enabled for '{}'. Rebuild with --features instrument_visa",
            self.resource_name
        )
    }
}

/// `VI_ATTR_TMO_VALUE` in milliseconds. `u32::MAX` means no timeout in VISA,
/// so longer durations saturate just below it.
#[cfg_attr(not(feature = "instrument_visa"), allow(dead_code))]
fn io_timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).map_or(u32::MAX - 1, |ms| ms.min(u32::MAX - 1))
}

/// VISA adapter for SCPI instruments
///
/// Blocking VISA I/O runs on Tokio's blocking executor; the session sits
/// behind an async mutex so commands are never interleaved.
pub struct VisaAdapter {
    #[cfg(feature = "instrument_visa")]
    instrument: Arc<Mutex<Instrument>>,
    resource_name: String,
    timeout: Duration,
    read_terminator: String,
    write_terminator: String,
}

impl VisaAdapter {
    /// VISA resource string this adapter was opened with
    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    /// Open and I/O timeout of the session
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(feature = "instrument_visa")]
#[async_trait]
impl ScpiAdapter for VisaAdapter {
    async fn write(&self, command: &str) -> Result<()> {
        use std::io::Write;

        let instrument = Arc::clone(&self.instrument);
        let request = format!("{}{}", command, self.write_terminator);
        let command_for_log = command.to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut instr = instrument.blocking_lock();
            instr
                .write_all(request.as_bytes())
                .with_context(|| format!("VISA write failed for: {}", command_for_log))?;
            debug!("VISA write sent: {}", command_for_log);
            Ok(())
        })
        .await
        .context("VISA write task panicked")?
    }

    async fn ask(&self, command: &str) -> Result<String> {
        use std::io::{BufRead, BufReader, Write};

        let instrument = Arc::clone(&self.instrument);
        let request = format!("{}{}", command, self.write_terminator);
        let read_terminator = self.read_terminator.clone();
        let delimiter = read_terminator.bytes().last().unwrap_or(b'\n');
        let command_for_log = command.to_string();

        tokio::task::spawn_blocking(move || -> Result<String> {
            let mut instr = instrument.blocking_lock();
            instr
                .write_all(request.as_bytes())
                .with_context(|| format!("VISA write failed for: {}", command_for_log))?;

            let mut raw = Vec::new();
            let read = BufReader::new(&*instr)
                .read_until(delimiter, &mut raw)
                .with_context(|| format!("VISA read failed for: {}", command_for_log))?;
            if read == 0 {
                bail!("VISA read returned no data for: {}", command_for_log);
            }

            let response = String::from_utf8_lossy(&raw)
                .trim_end_matches(read_terminator.as_str())
                .trim()
                .to_string();
            debug!("VISA query '{}' -> '{}'", command_for_log, response);
            Ok(response)
        })
        .await
        .context("VISA I/O task panicked")?
    }

    fn info(&self) -> String {
        format!(
            "VisaAdapter({} @ {}ms timeout)",
            self.resource_name,
            self.timeout.as_millis()
        )
    }
}

#[cfg(not(feature = "instrument_visa"))]
#[async_trait]
impl ScpiAdapter for VisaAdapter {
    async fn write(&self, _command: &str) -> Result<()> {
        bail!("VISA support not enabled. Rebuild with --features instrument_visa")
    }

    async fn ask(&self, _command: &str) -> Result<String> {
        bail!("VISA support not enabled. Rebuild with --features instrument_visa")
    }

    fn info(&self) -> String {
        format!(
            "VisaAdapter({} @ {}ms timeout, {}/{} terminators, disabled)",
            self.resource_name,
            self.timeout.as_millis(),
            self.read_terminator.escape_debug(),
            self.write_terminator.escape_debug()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = VisaAdapterBuilder::new("GPIB0::24::INSTR");
        assert_eq!(builder.resource_name, "GPIB0::24::INSTR");
        assert_eq!(builder.timeout, Duration::from_secs(5));
        assert_eq!(builder.read_terminator, "\n");
        assert_eq!(builder.write_terminator, "\n");
    }

    #[test]
    fn test_builder_overrides() {
        let builder = VisaAdapterBuilder::new("TCPIP0::192.168.1.100::INSTR")
            .with_timeout(Duration::from_millis(2000))
            .with_read_terminator("\r\n")
            .with_write_terminator("\r");
        assert_eq!(builder.timeout, Duration::from_millis(2000));
        assert_eq!(builder.read_terminator, "\r\n");
        assert_eq!(builder.write_terminator, "\r");
    }

    #[test]
    fn test_io_timeout_millis() {
        assert_eq!(io_timeout_millis(Duration::from_millis(2000)), 2000);
        assert_eq!(io_timeout_millis(Duration::ZERO), 0);
        assert_eq!(io_timeout_millis(Duration::from_secs(u64::MAX)), u32::MAX - 1);
    }

    #[cfg(feature = "instrument_visa")]
    #[tokio::test]
    async fn test_connect_unknown_resource_fails() {
        let result = VisaAdapterBuilder::new("GPIB0::99::INSTR")
            .with_timeout(Duration::from_millis(100))
            .connect()
            .await;
        assert!(result.is_err());
    }

    #[cfg(not(feature = "instrument_visa"))]
    #[tokio::test]
    async fn test_connect_without_feature_fails() {
        let result = VisaAdapterBuilder::new("GPIB0::7::INSTR").connect().await;
        let message = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("instrument_visa"));
    }
}
