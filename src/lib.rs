//! SCPI drivers for the Keithley 2182A nanovoltmeter and 2400 SourceMeter,
//! and a probe station controller that runs 2-wire and 4-wire I-V sweeps.
//!
//! ```text
//! ProbeStation
//!   ├─ Keithley2400   (source, required)
//!   └─ Keithley2182A  (voltmeter, optional: enables 4-wire)
//!        └─ Parameter<T> ── Arc<dyn ScpiAdapter> ── VISA | serial | mock
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use probe_station::adapters::VisaAdapterBuilder;
//! use probe_station::instrument::{Keithley2182A, Keithley2400};
//! use probe_station::probe_station::{linspace, ProbeStation};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let smu = VisaAdapterBuilder::new("GPIB0::24::INSTR").connect().await?;
//! let dmm = VisaAdapterBuilder::new("GPIB0::7::INSTR").connect().await?;
//!
//! let source = Keithley2400::new("smu", Arc::new(smu)).await?;
//! let voltmeter = Keithley2182A::new("dmm", Arc::new(dmm)).await?;
//! let station = ProbeStation::new(Arc::new(source), Some(Arc::new(voltmeter))).await?;
//!
//! let sweep = station.measure_cvc(&linspace(-0.1, 0.1, 21)).await?;
//! for (v, i) in sweep.voltages.iter().zip(&sweep.currents) {
//!     println!("{v} {i}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod config;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod parameter;
pub mod probe_station;

pub use error::{AppResult, ProbeError};
pub use probe_station::{linspace, ProbeStation, Sweep, WiringMode};
