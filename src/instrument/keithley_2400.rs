//! Keithley 2400 SourceMeter driver
//!
//! Sources voltage or current and measures both. The output format is fixed
//! at construction to `VOLT,CURR`, so every `READ?`/`FETC?` response is a
//! `"voltage,current"` pair.
//!
//! ## Source/Sense Pairing
//!
//! [`Keithley2400::set_mode`] keeps source and sense functions complementary:
//!
//! ```text
//! set_mode(Voltage) -> :SENS:FUNC "CURR" ; :SOUR:FUNC VOLT
//! set_mode(Current) -> :SENS:FUNC "VOLT" ; :SOUR:FUNC CURR
//! ```

use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info};

use super::{query_identity, InstrumentIdentity};
use crate::adapters::ScpiAdapter;
use crate::error::{AppResult, ProbeError};
use crate::parameter::{format_command, Parameter, ScpiEnum, ScpiValue};

const VOLTAGE_LIMIT: f64 = 210.0;
const CURRENT_LIMIT: f64 = 1.05;

/// Parse a `"voltage,current[,...]"` response. Extra fields are ignored.
pub(crate) fn parse_voltage_current(response: &str) -> Result<(f64, f64), String> {
    let mut fields = response.trim().split(',');
    match (fields.next(), fields.next()) {
        (Some(voltage), Some(current)) => {
            let voltage = f64::from_scpi(voltage).map_err(|e| format!("voltage field: {}", e))?;
            let current = f64::from_scpi(current).map_err(|e| format!("current field: {}", e))?;
            Ok((voltage, current))
        }
        _ => Err("expected 'voltage,current'".to_string()),
    }
}

fn format_level(value: &f64) -> String {
    format!("{:.8}", value)
}

/// Source (or sense) function
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
pub enum SourceFunction {
    /// Voltage
    Voltage,
    /// Current
    Current,
}

impl SourceFunction {
    /// The function measured while sourcing this one
    pub fn complement(self) -> Self {
        match self {
            SourceFunction::Voltage => SourceFunction::Current,
            SourceFunction::Current => SourceFunction::Voltage,
        }
    }
}

impl ScpiEnum for SourceFunction {
    const VARIANTS: &'static [Self] = &[SourceFunction::Voltage, SourceFunction::Current];

    fn mnemonic(&self) -> &'static str {
        match self {
            SourceFunction::Voltage => "VOLT",
            SourceFunction::Current => "CURR",
        }
    }

    fn long_form(&self) -> &'static str {
        match self {
            SourceFunction::Voltage => "VOLTage",
            SourceFunction::Current => "CURRent",
        }
    }
}

impl ScpiValue for SourceFunction {
    fn to_scpi(&self) -> String {
        self.to_scpi_enum()
    }

    fn from_scpi(response: &str) -> Result<Self, String> {
        Self::parse_scpi_enum(response)
    }
}

impl FromStr for SourceFunction {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "volt" | "voltage" => Ok(SourceFunction::Voltage),
            "curr" | "current" => Ok(SourceFunction::Current),
            other => Err(ProbeError::InvalidArgument(format!(
                "source function must be 'volt' or 'curr', got '{}'",
                other
            ))),
        }
    }
}

/// Front or rear panel input/output jacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
pub enum Terminals {
    /// Front panel
    Front,
    /// Rear panel
    Rear,
}

impl ScpiEnum for Terminals {
    const VARIANTS: &'static [Self] = &[Terminals::Front, Terminals::Rear];

    fn mnemonic(&self) -> &'static str {
        match self {
            Terminals::Front => "FRON",
            Terminals::Rear => "REAR",
        }
    }

    fn long_form(&self) -> &'static str {
        match self {
            Terminals::Front => "FRONt",
            Terminals::Rear => "REAR",
        }
    }
}

impl ScpiValue for Terminals {
    fn to_scpi(&self) -> String {
        self.to_scpi_enum()
    }

    fn from_scpi(response: &str) -> Result<Self, String> {
        Self::parse_scpi_enum(response)
    }
}

impl FromStr for Terminals {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(Terminals::Front),
            "rear" => Ok(Terminals::Rear),
            other => Err(ProbeError::InvalidArgument(format!(
                "terminals must be 'front' or 'rear', got '{}'",
                other
            ))),
        }
    }
}

/// Audible feedback through the front panel beeper
pub struct Beeper {
    adapter: Arc<dyn ScpiAdapter>,
}

impl Beeper {
    /// Frequency limits in Hz
    pub const FREQUENCY_RANGE: (f64, f64) = (65.0, 2e6);
    /// Duration limits in seconds
    pub const DURATION_RANGE: (f64, f64) = (0.0, 7.9);

    /// Emit a beep
    ///
    /// Both arguments are required. Frequency must lie in [65 Hz, 2 MHz] and
    /// duration in [0 s, 7.9 s].
    ///
    /// # Errors
    /// `InvalidArgument` for a missing or out-of-range argument; nothing is
    /// written in that case.
    pub async fn beep(&self, frequency: Option<f64>, duration: Option<f64>) -> AppResult<()> {
        let (Some(frequency), Some(duration)) = (frequency, duration) else {
            return Err(ProbeError::InvalidArgument(
                "both frequency and duration must be provided".to_string(),
            ));
        };

        let (f_min, f_max) = Self::FREQUENCY_RANGE;
        if !(f_min..=f_max).contains(&frequency) {
            return Err(ProbeError::InvalidArgument(format!(
                "frequency {} Hz is outside [65 Hz, 2 MHz]",
                frequency
            )));
        }
        let (d_min, d_max) = Self::DURATION_RANGE;
        if !(d_min..=d_max).contains(&duration) {
            return Err(ProbeError::InvalidArgument(format!(
                "duration {} s is outside [0 s, 7.9 s]",
                duration
            )));
        }

        let command = format_command(
            ":SYST:BEEP {freq},{duration}",
            &[
                ("freq", frequency.to_scpi()),
                ("duration", duration.to_scpi()),
            ],
        )?;
        self.adapter.write(&command).await?;
        Ok(())
    }

    /// Short "done" beep: 800 Hz for 1 s
    pub async fn success(&self) -> AppResult<()> {
        self.beep(Some(800.0), Some(1.0)).await
    }
}

/// Keithley 2400 SourceMeter
pub struct Keithley2400 {
    name: String,
    adapter: Arc<dyn ScpiAdapter>,

    /// Voltage measurement range (V)
    pub rangev: Parameter<f64>,
    /// Current measurement range (A)
    pub rangei: Parameter<f64>,
    /// Voltage compliance (V)
    pub compliancev: Parameter<f64>,
    /// Current compliance (A)
    pub compliancei: Parameter<f64>,
    /// Source voltage level; reading triggers a measurement (V)
    pub volt: Parameter<f64>,
    /// Source current level; reading triggers a measurement (A)
    pub curr: Parameter<f64>,
    /// Source function
    pub mode: Parameter<SourceFunction>,
    /// Sense function
    pub sense: Parameter<SourceFunction>,
    /// Output enable
    pub output: Parameter<bool>,
    /// Voltage integration time (NPLC)
    pub nplcv: Parameter<f64>,
    /// Current integration time (NPLC)
    pub nplci: Parameter<f64>,
    /// Front or rear terminals
    pub terminals: Parameter<Terminals>,
    /// Beeper submodule
    pub beeper: Beeper,
}

impl Keithley2400 {
    /// Fix the trigger count and output format, then build the parameters
    ///
    /// # Errors
    /// Fails if the initialization command cannot be written.
    pub async fn new(name: impl Into<String>, adapter: Arc<dyn ScpiAdapter>) -> AppResult<Self> {
        let name = name.into();

        adapter.write(":TRIG:COUN 1;:FORM:ELEM VOLT,CURR").await?;

        let driver = Self {
            rangev: Parameter::builder("rangev", adapter.clone())
                .label("Voltage range")
                .unit("V")
                .get_cmd(":SENS:VOLT:RANG?")
                .set_cmd(":SENS:VOLT:RANG {value}")
                .range(-VOLTAGE_LIMIT, VOLTAGE_LIMIT)
                .build(),
            rangei: Parameter::builder("rangei", adapter.clone())
                .label("Current range")
                .unit("A")
                .get_cmd(":SENS:CURR:RANG?")
                .set_cmd(":SENS:CURR:RANG {value}")
                .range(-CURRENT_LIMIT, CURRENT_LIMIT)
                .build(),
            compliancev: Parameter::builder("compliancev", adapter.clone())
                .label("Voltage Compliance")
                .unit("V")
                .get_cmd(":SENS:VOLT:PROT?")
                .set_cmd(":SENS:VOLT:PROT {value}")
                .range(-VOLTAGE_LIMIT, VOLTAGE_LIMIT)
                .build(),
            compliancei: Parameter::builder("compliancei", adapter.clone())
                .label("Current Compliance")
                .unit("A")
                .get_cmd(":SENS:CURR:PROT?")
                .set_cmd(":SENS:CURR:PROT {value}")
                .range(-CURRENT_LIMIT, CURRENT_LIMIT)
                .build(),
            volt: Parameter::builder("volt", adapter.clone())
                .label("Voltage")
                .unit("V")
                .get_cmd(":READ?")
                .set_cmd(":SOUR:VOLT:LEV {value}")
                .range(-VOLTAGE_LIMIT, VOLTAGE_LIMIT)
                .get_parser(|response| parse_voltage_current(response).map(|(v, _)| v))
                .set_formatter(format_level)
                .build(),
            curr: Parameter::builder("curr", adapter.clone())
                .label("Current")
                .unit("A")
                .get_cmd(":READ?")
                .set_cmd(":SOUR:CURR:LEV {value}")
                .range(-CURRENT_LIMIT, CURRENT_LIMIT)
                .get_parser(|response| parse_voltage_current(response).map(|(_, i)| i))
                .set_formatter(format_level)
                .build(),
            mode: Parameter::builder("mode", adapter.clone())
                .label("Mode")
                .get_cmd(":SOUR:FUNC?")
                .set_cmd(":SOUR:FUNC {value}")
                .build(),
            sense: Parameter::builder("sense", adapter.clone())
                .label("Sense mode")
                .get_cmd(":SENS:FUNC?")
                .set_cmd(":SENS:FUNC \"{value}\"")
                .build(),
            output: Parameter::builder("output", adapter.clone())
                .label("Output")
                .get_cmd(":OUTP:STAT?")
                .set_cmd(":OUTP:STAT {value}")
                .build(),
            nplcv: Parameter::builder("nplcv", adapter.clone())
                .label("Voltage integration time")
                .get_cmd(":SENS:VOLT:NPLC?")
                .set_cmd(":SENS:VOLT:NPLC {value}")
                .range(0.01, 10.0)
                .build(),
            nplci: Parameter::builder("nplci", adapter.clone())
                .label("Current integration time")
                .get_cmd(":SENS:CURR:NPLC?")
                .set_cmd(":SENS:CURR:NPLC {value}")
                .range(0.01, 10.0)
                .build(),
            terminals: Parameter::builder("terminals", adapter.clone())
                .label("Input/Output Terminals")
                .get_cmd(":ROUT:TERM?")
                .set_cmd(":ROUT:TERM {value}")
                .docstring("Select front or rear panel input/output jacks.")
                .build(),
            beeper: Beeper {
                adapter: adapter.clone(),
            },
            name,
            adapter,
        };

        info!(
            "Keithley 2400 '{}' configured on {}",
            driver.name,
            driver.adapter.info()
        );
        Ok(driver)
    }

    /// Select the source function and sense the complementary quantity
    pub async fn set_mode(&self, function: SourceFunction) -> AppResult<()> {
        debug!("{}: sourcing {:?}", self.name, function);
        self.sense.set(function.complement()).await?;
        self.mode.set(function).await
    }

    /// Arm the trigger model (`INIT`)
    pub async fn init(&self) -> AppResult<()> {
        self.adapter.write("INIT").await?;
        Ok(())
    }

    /// Read the last `(voltage, current)` pair without triggering
    pub async fn fetch(&self) -> AppResult<(f64, f64)> {
        self.query_pair("FETC?").await
    }

    /// Trigger a reading and return V/I in ohms
    ///
    /// Zero current yields an infinite (or NaN) resistance.
    pub async fn resistance(&self) -> AppResult<f64> {
        let (voltage, current) = self.query_pair(":READ?").await?;
        Ok(voltage / current)
    }

    /// Restore factory defaults (`*RST`)
    pub async fn reset(&self) -> AppResult<()> {
        self.adapter.write("*RST").await?;
        Ok(())
    }

    /// Query `*IDN?`
    pub async fn identify(&self) -> AppResult<InstrumentIdentity> {
        query_identity(self.adapter.as_ref()).await
    }

    /// Send a raw SCPI command
    pub async fn write(&self, command: &str) -> AppResult<()> {
        self.adapter.write(command).await?;
        Ok(())
    }

    /// Instrument name
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn query_pair(&self, command: &str) -> AppResult<(f64, f64)> {
        let response = self.adapter.ask(command).await?;
        parse_voltage_current(&response).map_err(|reason| ProbeError::parse(command, response, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;

    async fn source_meter(mock: &MockAdapter) -> Keithley2400 {
        Keithley2400::new("smu", Arc::new(mock.clone())).await.unwrap()
    }

    #[test]
    fn test_parse_voltage_current() {
        assert_eq!(
            parse_voltage_current("0.0301,0.000142").unwrap(),
            (0.0301, 0.000142)
        );
        assert_eq!(
            parse_voltage_current("+1.0E-01,+2.0E-06,+9.91E+37,+1.2E+03").unwrap(),
            (0.1, 2e-6)
        );
        assert!(parse_voltage_current("0.0301").is_err());
        assert!(parse_voltage_current("0.03,abc").is_err());
    }

    #[tokio::test]
    async fn test_initialization_sequence() {
        let mock = MockAdapter::new();
        let _smu = source_meter(&mock).await;
        assert_eq!(mock.call_log(), vec![":TRIG:COUN 1;:FORM:ELEM VOLT,CURR"]);
    }

    #[tokio::test]
    async fn test_source_level_formatting() {
        let mock = MockAdapter::new();
        let smu = source_meter(&mock).await;
        mock.clear_log();

        smu.volt.set(0.03).await.unwrap();
        smu.curr.set(-1e-3).await.unwrap();
        assert_eq!(
            mock.writes(),
            vec![":SOUR:VOLT:LEV 0.03000000", ":SOUR:CURR:LEV -0.00100000"]
        );
        assert!(smu.volt.set(210.5).await.is_err());
        assert!(smu.curr.set(1.1).await.is_err());
    }

    #[tokio::test]
    async fn test_volt_and_curr_read_fields() {
        let mock = MockAdapter::new();
        let smu = source_meter(&mock).await;
        mock.set_response(":READ?", "0.0301,0.000142");

        assert_eq!(smu.volt.get().await.unwrap(), 0.0301);
        assert_eq!(smu.curr.get().await.unwrap(), 0.000142);
    }

    #[tokio::test]
    async fn test_set_mode_sets_complementary_sense_first() {
        let mock = MockAdapter::new();
        let smu = source_meter(&mock).await;
        mock.clear_log();

        smu.set_mode(SourceFunction::Voltage).await.unwrap();
        smu.set_mode(SourceFunction::Current).await.unwrap();
        assert_eq!(
            mock.writes(),
            vec![
                ":SENS:FUNC \"CURR\"",
                ":SOUR:FUNC VOLT",
                ":SENS:FUNC \"VOLT\"",
                ":SOUR:FUNC CURR",
            ]
        );

        mock.push_response(":SENS:FUNC?", "\"VOLT:DC\"");
        assert_eq!(smu.sense.get().await.unwrap(), SourceFunction::Voltage);
    }

    #[tokio::test]
    async fn test_terminals_and_output() {
        let mock = MockAdapter::new();
        let smu = source_meter(&mock).await;
        mock.clear_log();

        smu.terminals.set(Terminals::Rear).await.unwrap();
        smu.output.set(true).await.unwrap();
        assert_eq!(mock.writes(), vec![":ROUT:TERM REAR", ":OUTP:STAT ON"]);

        mock.push_response(":ROUT:TERM?", "FRON");
        assert_eq!(smu.terminals.get().await.unwrap(), Terminals::Front);
        mock.push_response(":OUTP:STAT?", "1");
        assert!(smu.output.get().await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_and_resistance() {
        let mock = MockAdapter::new();
        let smu = source_meter(&mock).await;
        mock.push_response("FETC?", "0.0301,0.000142");
        mock.push_response(":READ?", "1.0,0.001");

        assert_eq!(smu.fetch().await.unwrap(), (0.0301, 0.000142));
        assert!((smu.resistance().await.unwrap() - 1000.0).abs() < 1e-9);

        mock.push_response("FETC?", "0.0301");
        assert!(matches!(
            smu.fetch().await,
            Err(ProbeError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_beeper() {
        let mock = MockAdapter::new();
        let smu = source_meter(&mock).await;
        mock.clear_log();

        smu.beeper.success().await.unwrap();
        smu.beeper.beep(Some(65.0), Some(0.0)).await.unwrap();
        assert_eq!(mock.writes(), vec![":SYST:BEEP 800,1", ":SYST:BEEP 65,0"]);
    }

    #[tokio::test]
    async fn test_reset_and_identify() {
        let mock = MockAdapter::new();
        let smu = source_meter(&mock).await;
        mock.set_response("*IDN?", "KEITHLEY INSTRUMENTS INC.,MODEL 2400,4086418,C32");
        mock.clear_log();

        smu.reset().await.unwrap();
        let identity = smu.identify().await.unwrap();
        assert_eq!(identity.model, "MODEL 2400");
        assert_eq!(mock.call_log(), vec!["*RST", "*IDN?"]);
    }

    #[test]
    fn test_enum_from_str() {
        assert_eq!("rear".parse::<Terminals>().unwrap(), Terminals::Rear);
        assert_eq!(
            "VOLT".parse::<SourceFunction>().unwrap(),
            SourceFunction::Voltage
        );
        assert!("side".parse::<Terminals>().is_err());
    }
}
