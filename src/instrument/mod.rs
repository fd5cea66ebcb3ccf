//! Keithley instrument drivers
//!
//! Each driver owns an `Arc<dyn ScpiAdapter>` and exposes its settings as
//! typed [`Parameter`](crate::parameter::Parameter) fields:
//!
//! - [`Keithley2182A`]: nanovoltmeter, with a [`FilterModule`] submodule
//! - [`Keithley2400`]: source-meter, with a [`Beeper`] submodule

pub mod keithley_2182a;
pub mod keithley_2400;

pub use keithley_2182a::{FilterModule, FilterType, Keithley2182A};
pub use keithley_2400::{Beeper, Keithley2400, SourceFunction, Terminals};

use std::fmt;

use crate::adapters::ScpiAdapter;
use crate::error::{AppResult, ProbeError};

/// Parsed `*IDN?` response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentIdentity {
    /// e.g. `KEITHLEY INSTRUMENTS INC.`
    pub manufacturer: String,
    /// e.g. `MODEL 2400`
    pub model: String,
    /// Serial number, empty if not reported
    pub serial: String,
    /// Firmware revision, empty if not reported
    pub firmware: String,
}

impl InstrumentIdentity {
    /// Parse `"manufacturer,model,serial,firmware"`.
    ///
    /// Manufacturer and model are required; missing trailing fields are left empty.
    pub fn parse(response: &str) -> Result<Self, String> {
        let mut fields = response.trim().splitn(4, ',').map(|f| f.trim().to_string());
        let manufacturer = fields.next().unwrap_or_default();
        let model = fields.next().unwrap_or_default();
        if manufacturer.is_empty() || model.is_empty() {
            return Err("expected 'manufacturer,model[,serial,firmware]'".to_string());
        }
        Ok(Self {
            manufacturer,
            model,
            serial: fields.next().unwrap_or_default(),
            firmware: fields.next().unwrap_or_default(),
        })
    }
}

impl fmt::Display for InstrumentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.manufacturer, self.model)?;
        if !self.serial.is_empty() {
            write!(f, " (s/n {})", self.serial)?;
        }
        Ok(())
    }
}

pub(crate) async fn query_identity(adapter: &dyn ScpiAdapter) -> AppResult<InstrumentIdentity> {
    const IDN: &str = "*IDN?";
    let response = adapter.ask(IDN).await?;
    InstrumentIdentity::parse(&response).map_err(|reason| ProbeError::parse(IDN, response, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_parse() {
        let id = InstrumentIdentity::parse(
            "KEITHLEY INSTRUMENTS INC.,MODEL 2400,1234567,C30   Mar 17 2006 09:29:29/A02  /K/J",
        )
        .unwrap();
        assert_eq!(id.manufacturer, "KEITHLEY INSTRUMENTS INC.");
        assert_eq!(id.model, "MODEL 2400");
        assert_eq!(id.serial, "1234567");
        assert!(id.firmware.starts_with("C30"));
        assert_eq!(
            id.to_string(),
            "KEITHLEY INSTRUMENTS INC. MODEL 2400 (s/n 1234567)"
        );
    }

    #[test]
    fn test_identity_requires_model() {
        assert!(InstrumentIdentity::parse("KEITHLEY").is_err());
        assert!(InstrumentIdentity::parse("").is_err());
    }
}
