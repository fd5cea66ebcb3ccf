//! Keithley 2182A nanovoltmeter driver
//!
//! Single-channel DC voltage measurement with range, autorange, integration
//! time and a filter subsystem (digital averaging filter plus analog low-pass).
//!
//! ## Initialization Sequence
//!
//! ```text
//! *CLS
//! CONF:VOLT
//! SENS:CHAN 1
//! SENS:VOLT:DFIL:STAT ON     (filter defaults)
//! SENS:VOLT:DFIL:COUN 1
//! ```
//!
//! ## Measurement
//!
//! `read` triggers and returns one reading; the probe station instead writes
//! `INIT` via [`Keithley2182A::init`] and collects the reading with `fetch`.

use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use super::{query_identity, InstrumentIdentity};
use crate::adapters::ScpiAdapter;
use crate::error::{AppResult, ProbeError};
use crate::parameter::{Parameter, ScpiEnum, ScpiValue};

/// Digital filter averaging mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
pub enum FilterType {
    /// Moving average over the last `count` readings
    Moving,
    /// Average of `count` fresh readings, then restart
    Repeat,
}

impl ScpiEnum for FilterType {
    const VARIANTS: &'static [Self] = &[FilterType::Moving, FilterType::Repeat];

    fn mnemonic(&self) -> &'static str {
        match self {
            FilterType::Moving => "MOV",
            FilterType::Repeat => "REP",
        }
    }

    fn long_form(&self) -> &'static str {
        match self {
            FilterType::Moving => "MOVing",
            FilterType::Repeat => "REPeat",
        }
    }
}

impl ScpiValue for FilterType {
    fn to_scpi(&self) -> String {
        self.to_scpi_enum()
    }

    fn from_scpi(response: &str) -> Result<Self, String> {
        Self::parse_scpi_enum(response)
    }
}

impl FromStr for FilterType {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "moving" | "mov" => Ok(FilterType::Moving),
            "repeat" | "rep" => Ok(FilterType::Repeat),
            other => Err(ProbeError::InvalidArgument(format!(
                "filter type must be 'moving' or 'repeat', got '{}'",
                other
            ))),
        }
    }
}

/// Filter subsystem of the 2182A
pub struct FilterModule {
    /// Digital filter enable
    pub state: Parameter<bool>,
    /// Digital filter type
    pub filter_type: Parameter<FilterType>,
    /// Number of readings averaged by the digital filter (1..=100)
    pub count: Parameter<u32>,
    /// Filter window in percent of range, `None` disables the window
    pub window: Parameter<Option<f64>>,
    /// Analog low-pass filter enable
    pub analog: Parameter<bool>,
}

impl FilterModule {
    fn new(adapter: &Arc<dyn ScpiAdapter>) -> Self {
        Self {
            state: Parameter::builder("filter_state", adapter.clone())
                .label("Digital Filter Enable")
                .get_cmd("SENS:VOLT:DFIL:STAT?")
                .set_cmd("SENS:VOLT:DFIL:STAT {value}")
                .docstring("Enable or disable the digital filter.")
                .build(),
            filter_type: Parameter::builder("filter_type", adapter.clone())
                .label("Digital Filter Type")
                .get_cmd("SENS:VOLT:DFIL:TCON?")
                .set_cmd("SENS:VOLT:DFIL:TCON {value}")
                .docstring("Select digital filter type: moving or repeat.")
                .build(),
            count: Parameter::builder("filter_count", adapter.clone())
                .label("Digital Filter Sample Count")
                .get_cmd("SENS:VOLT:DFIL:COUN?")
                .set_cmd("SENS:VOLT:DFIL:COUN {value}")
                .range(1, 100)
                .docstring("Number of samples for digital averaging filter.")
                .build(),
            window: Parameter::builder("filter_window", adapter.clone())
                .label("Digital Filter Window")
                .unit("%")
                .get_cmd("SENS:VOLT:DFIL:WIND?")
                .set_cmd("SENS:VOLT:DFIL:WIND {value}")
                .validator(|window: &Option<f64>| match window {
                    None => Ok(()),
                    Some(w) if (0.01..=10.0).contains(w) => Ok(()),
                    Some(w) => Err(format!("window {} is outside [0.01, 10] %", w)),
                })
                .docstring("Digital filter window as percent of range, or None to disable.")
                .build(),
            analog: Parameter::builder("filter_analog", adapter.clone())
                .label("Analog Low-pass Filter")
                .get_cmd("SENS:VOLT:LPAS?")
                .set_cmd("SENS:VOLT:LPAS {value}")
                .docstring("Enable or disable the analog low-pass filter.")
                .build(),
        }
    }

    async fn apply_defaults(&self) -> AppResult<()> {
        self.state.set(true).await?;
        self.count.set(1).await
    }
}

/// Keithley 2182A nanovoltmeter
pub struct Keithley2182A {
    name: String,
    adapter: Arc<dyn ScpiAdapter>,

    /// Trigger and return one voltage reading (V)
    pub read: Parameter<f64>,
    /// Latest reading after `init()` (V)
    pub fetch: Parameter<f64>,
    /// Fixed measurement range (V)
    pub range: Parameter<f64>,
    /// Autorange enable
    pub autorange: Parameter<bool>,
    /// Integration time in power line cycles
    pub nplc: Parameter<f64>,
    /// Filter subsystem
    pub filter: FilterModule,
}

impl Keithley2182A {
    /// Configure the instrument for DC voltage on channel 1 and build its parameters
    ///
    /// # Errors
    /// Fails if any initialization command cannot be written.
    pub async fn new(name: impl Into<String>, adapter: Arc<dyn ScpiAdapter>) -> AppResult<Self> {
        let name = name.into();

        for command in ["*CLS", "CONF:VOLT", "SENS:CHAN 1"] {
            adapter.write(command).await?;
        }

        let driver = Self {
            read: Parameter::builder("read", adapter.clone())
                .label("Voltage")
                .unit("V")
                .get_cmd("READ?")
                .docstring("Perform a single voltage measurement.")
                .build(),
            fetch: Parameter::builder("fetch", adapter.clone())
                .label("Voltage")
                .unit("V")
                .get_cmd("FETC?")
                .docstring("Fetch a single voltage measurement result.")
                .build(),
            range: Parameter::builder("range", adapter.clone())
                .label("Range")
                .unit("V")
                .get_cmd("SENS:VOLT:RANG?")
                .set_cmd("SENS:VOLT:RANG {value}")
                .range(0.0, 1e6)
                .docstring("Set or query the measurement range.")
                .build(),
            autorange: Parameter::builder("autorange", adapter.clone())
                .label("Autorange")
                .get_cmd("SENS:VOLT:RANG:AUTO?")
                .set_cmd("SENS:VOLT:RANG:AUTO {value}")
                .docstring("Enable or disable autoranging.")
                .build(),
            nplc: Parameter::builder("nplc", adapter.clone())
                .label("Integration Time (NPLC)")
                .get_cmd("SENS:VOLT:NPLC?")
                .set_cmd("SENS:VOLT:NPLC {value}")
                .range(0.01, 50.0)
                .docstring("Number of power line cycles for integration time.")
                .build(),
            filter: FilterModule::new(&adapter),
            name,
            adapter,
        };

        driver.filter.apply_defaults().await?;

        info!(
            "Keithley 2182A '{}' configured on {}",
            driver.name,
            driver.adapter.info()
        );
        Ok(driver)
    }

    /// Arm the trigger model (`INIT`)
    pub async fn init(&self) -> AppResult<()> {
        self.adapter.write("INIT").await?;
        Ok(())
    }

    /// Query `*IDN?`
    pub async fn identify(&self) -> AppResult<InstrumentIdentity> {
        query_identity(self.adapter.as_ref()).await
    }

    /// Instrument name
    pub fn name(&self) -> &str {
        &self.name
    }
}
