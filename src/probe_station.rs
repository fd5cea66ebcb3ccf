//! I-V sweep orchestration
//!
//! `ProbeStation` drives a Keithley 2400 source-meter, optionally paired with
//! a Keithley 2182A nanovoltmeter, through a list of voltage setpoints.
//!
//! ## Wiring Modes
//!
//! - **2-wire**: the source-meter sources and measures both V and I.
//! - **4-wire**: the source-meter sources and measures I; the nanovoltmeter
//!   measures V across the sample. The source-meter's own voltage reading is
//!   returned alongside.
//!
//! ## Per-point Sequence (4-wire)
//!
//! ```text
//! source:    :SOUR:VOLT:LEV v   INIT
//!            (settling delay)
//! voltmeter: INIT   FETC?
//! source:    FETC?
//! ```
//!
//! Each step is awaited before the next one is issued. The first failure
//! aborts the sweep and nothing measured so far is returned.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{AppResult, ProbeError};
use crate::instrument::{Keithley2182A, Keithley2400, SourceFunction, Terminals};

/// Measurement wiring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WiringMode {
    /// Source-meter measures V and I
    TwoWire,
    /// Voltmeter measures V, source-meter measures I
    FourWire,
}

impl fmt::Display for WiringMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WiringMode::TwoWire => write!(f, "2wire"),
            WiringMode::FourWire => write!(f, "4wire"),
        }
    }
}

impl FromStr for WiringMode {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "2wire" => Ok(WiringMode::TwoWire),
            "4wire" => Ok(WiringMode::FourWire),
            other => Err(ProbeError::InvalidArgument(format!(
                "Mode must be '2wire' or '4wire', got '{}'",
                other
            ))),
        }
    }
}

/// Result of one I-V sweep
///
/// `voltages` and `currents` have one entry per setpoint. `source_voltages`
/// holds the source-meter's own voltage readings and is only present for
/// 4-wire sweeps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sweep {
    /// Measured voltages (voltmeter in 4-wire mode)
    pub voltages: Vec<f64>,
    /// Measured currents
    pub currents: Vec<f64>,
    /// Source-meter voltages, 4-wire only
    pub source_voltages: Option<Vec<f64>>,
}

impl Sweep {
    fn with_capacity(mode: WiringMode, points: usize) -> Self {
        Self {
            voltages: Vec::with_capacity(points),
            currents: Vec::with_capacity(points),
            source_voltages: match mode {
                WiringMode::TwoWire => None,
                WiringMode::FourWire => Some(Vec::with_capacity(points)),
            },
        }
    }

    /// Number of measured points
    pub fn len(&self) -> usize {
        self.voltages.len()
    }

    /// True when no points were measured
    pub fn is_empty(&self) -> bool {
        self.voltages.is_empty()
    }

    /// V/I per point
    pub fn resistances(&self) -> Vec<f64> {
        self.voltages
            .iter()
            .zip(&self.currents)
            .map(|(v, i)| v / i)
            .collect()
    }
}

/// `points` evenly spaced values from `start` to `stop` inclusive
pub fn linspace(start: f64, stop: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![start],
        n => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|k| if k == n - 1 { stop } else { start + step * k as f64 })
                .collect()
        }
    }
}

/// I-V sweep controller for a source-meter and an optional voltmeter
pub struct ProbeStation {
    source: Arc<Keithley2400>,
    voltmeter: Option<Arc<Keithley2182A>>,
    mode: WiringMode,
    settling_delay: Duration,
}

impl ProbeStation {
    /// Wait between triggering the source-meter and the voltmeter
    pub const DEFAULT_SETTLING_DELAY: Duration = Duration::from_millis(10);

    /// Take ownership of the instruments and apply the baseline configuration
    ///
    /// The mode is 4-wire when a voltmeter is given, 2-wire otherwise. The
    /// source-meter is left sourcing 30 mV on the 210 mV range through the
    /// rear terminals with its output on.
    ///
    /// # Errors
    /// Any failure while configuring the instruments.
    pub async fn new(
        source: Arc<Keithley2400>,
        voltmeter: Option<Arc<Keithley2182A>>,
    ) -> AppResult<Self> {
        let mode = if voltmeter.is_some() {
            WiringMode::FourWire
        } else {
            WiringMode::TwoWire
        };
        let station = Self {
            source,
            voltmeter,
            mode,
            settling_delay: Self::DEFAULT_SETTLING_DELAY,
        };

        station.nplc(1.0).await?;
        station.source.terminals.set(Terminals::Rear).await?;
        station.source.write(":SENS:RES:MODE MAN").await?;
        station.source.set_mode(SourceFunction::Voltage).await?;
        station.source.rangev.set(210e-3).await?;
        station.source.volt.set(0.03).await?;
        station.source.output.set(true).await?;

        info!("Probe station ready in {} mode", station.mode);
        Ok(station)
    }

    /// Override the settling delay used in 4-wire mode
    pub fn with_settling_delay(mut self, delay: Duration) -> Self {
        self.settling_delay = delay;
        self
    }

    /// Switch wiring mode
    ///
    /// # Errors
    /// `InvalidOperation` when selecting 4-wire without a voltmeter.
    pub fn set_mode(&mut self, mode: WiringMode) -> AppResult<()> {
        if mode == WiringMode::FourWire && self.voltmeter.is_none() {
            return Err(ProbeError::InvalidOperation(
                "Cannot enable 4-wire mode without a voltmeter instrument".to_string(),
            ));
        }
        if mode != self.mode {
            info!("Wiring mode {} -> {}", self.mode, mode);
        }
        self.mode = mode;
        Ok(())
    }

    /// Set the integration time on the source-meter and, if present, the voltmeter
    pub async fn nplc(&self, value: f64) -> AppResult<()> {
        self.source.nplcv.set(value).await?;
        if let Some(voltmeter) = &self.voltmeter {
            voltmeter.nplc.set(value).await?;
        }
        Ok(())
    }

    /// Sweep the source voltage through `setpoints`, measuring once per point
    ///
    /// # Errors
    /// The first driver error, unchanged. Partial results are discarded.
    pub async fn measure_cvc(&self, setpoints: &[f64]) -> AppResult<Sweep> {
        info!(
            "Starting {} sweep over {} setpoints",
            self.mode,
            setpoints.len()
        );

        let mut sweep = Sweep::with_capacity(self.mode, setpoints.len());
        for (index, &setpoint) in setpoints.iter().enumerate() {
            if let Err(e) = self.measure_point(setpoint, &mut sweep).await {
                warn!(
                    "Sweep aborted at point {} ({} V): {}",
                    index, setpoint, e
                );
                return Err(e);
            }
        }

        info!("Sweep finished: {} points", sweep.len());
        Ok(sweep)
    }

    async fn measure_point(&self, setpoint: f64, sweep: &mut Sweep) -> AppResult<()> {
        self.source.volt.set(setpoint).await?;

        match (self.mode, self.voltmeter.as_deref()) {
            (WiringMode::FourWire, Some(voltmeter)) => {
                self.source.init().await?;
                tokio::time::sleep(self.settling_delay).await;
                voltmeter.init().await?;
                let voltage = voltmeter.fetch.get().await?;
                let (source_voltage, current) = self.source.fetch().await?;
                debug!(setpoint, voltage, current, source_voltage, "4-wire point");

                sweep.voltages.push(voltage);
                sweep.currents.push(current);
                if let Some(source_voltages) = sweep.source_voltages.as_mut() {
                    source_voltages.push(source_voltage);
                }
            }
            (WiringMode::FourWire, None) => {
                return Err(ProbeError::InvalidOperation(
                    "4-wire measurement requires a voltmeter".to_string(),
                ));
            }
            (WiringMode::TwoWire, _) => {
                self.source.init().await?;
                let (voltage, current) = self.source.fetch().await?;
                debug!(setpoint, voltage, current, "2-wire point");

                sweep.voltages.push(voltage);
                sweep.currents.push(current);
            }
        }
        Ok(())
    }

    /// Active wiring mode
    pub fn mode(&self) -> WiringMode {
        self.mode
    }

    /// Source-meter handle
    pub fn source(&self) -> &Arc<Keithley2400> {
        &self.source
    }

    /// Voltmeter handle, if any
    pub fn voltmeter(&self) -> Option<&Arc<Keithley2182A>> {
        self.voltmeter.as_ref()
    }

    /// Settling delay between source and voltmeter triggers
    pub fn settling_delay(&self) -> Duration {
        self.settling_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use tracing_test::traced_test;

    async fn two_wire(mock: &MockAdapter) -> ProbeStation {
        let source = Keithley2400::new("smu", Arc::new(mock.clone()))
            .await
            .unwrap();
        ProbeStation::new(Arc::new(source), None).await.unwrap()
    }

    #[test]
    fn test_wiring_mode_parse() {
        assert_eq!("2wire".parse::<WiringMode>().unwrap(), WiringMode::TwoWire);
        assert_eq!("4wire".parse::<WiringMode>().unwrap(), WiringMode::FourWire);
        assert!(matches!(
            "bogus".parse::<WiringMode>(),
            Err(ProbeError::InvalidArgument(_))
        ));
        assert_eq!(WiringMode::FourWire.to_string(), "4wire");
    }

    #[test]
    fn test_linspace() {
        assert!(linspace(0.0, 1.0, 0).is_empty());
        assert_eq!(linspace(0.5, 1.0, 1), vec![0.5]);
        assert_eq!(linspace(-0.1, 0.1, 3), vec![-0.1, 0.0, 0.1]);
        let points = linspace(0.0, 0.3, 7);
        assert_eq!(points.len(), 7);
        assert_eq!(points[6], 0.3);
    }

    #[test]
    fn test_sweep_resistances() {
        let sweep = Sweep {
            voltages: vec![1.0, 2.0],
            currents: vec![0.5, 0.001],
            source_voltages: None,
        };
        assert_eq!(sweep.len(), 2);
        assert_eq!(sweep.resistances(), vec![2.0, 2000.0]);
        assert!(Sweep::default().is_empty());
    }

    #[tokio::test]
    async fn test_set_mode_without_voltmeter() {
        let mock = MockAdapter::new();
        let mut station = two_wire(&mock).await;

        assert_eq!(station.mode(), WiringMode::TwoWire);
        assert!(matches!(
            station.set_mode(WiringMode::FourWire),
            Err(ProbeError::InvalidOperation(_))
        ));
        assert!(station.set_mode(WiringMode::TwoWire).is_ok());
        assert_eq!(station.mode(), WiringMode::TwoWire);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_aborted_sweep_is_logged() {
        let mock = MockAdapter::new();
        let station = two_wire(&mock).await;
        mock.push_response("FETC?", "0.01,0.001");
        mock.push_response("FETC?", "not-a-reading");

        let result = station.measure_cvc(&[0.01, 0.02, 0.03]).await;
        assert!(matches!(result, Err(ProbeError::Parse { .. })));
        assert!(logs_contain("Sweep aborted at point 1"));
    }
}
