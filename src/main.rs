//! `probe-station`: run one I-V sweep from a configuration file
//!
//! ```text
//! probe-station --config config/probe_station.toml --mode 2wire --points 11
//! ```
//!
//! Prints one line per setpoint: `v_set v_meas i [v_src]`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use probe_station::config::{StationConfig, DEFAULT_CONFIG_PATH};
use probe_station::instrument::{Keithley2182A, Keithley2400};
use probe_station::{linspace, logging, ProbeStation, WiringMode};

#[derive(Parser, Debug)]
#[command(name = "probe-station", version, about = "Keithley 2-wire/4-wire I-V sweeps")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Wiring mode (2wire or 4wire); defaults to 4wire when a voltmeter is configured
    #[arg(short, long)]
    mode: Option<WiringMode>,

    /// Integration time in power line cycles
    #[arg(long)]
    nplc: Option<f64>,

    /// First setpoint (V)
    #[arg(long, allow_hyphen_values = true)]
    start: Option<f64>,

    /// Last setpoint (V)
    #[arg(long, allow_hyphen_values = true)]
    stop: Option<f64>,

    /// Number of setpoints
    #[arg(long)]
    points: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = StationConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    logging::init(&config.application.log_level)?;
    info!("{} starting", config.application.name);

    let source_adapter = config
        .source
        .connect()
        .await
        .context("Failed to connect to source-meter")?;
    let source = Arc::new(Keithley2400::new("source", source_adapter).await?);

    let voltmeter = match &config.voltmeter {
        Some(section) => {
            let adapter = section
                .connect()
                .await
                .context("Failed to connect to voltmeter")?;
            Some(Arc::new(Keithley2182A::new("voltmeter", adapter).await?))
        }
        None => None,
    };

    let mut station = ProbeStation::new(source, voltmeter)
        .await?
        .with_settling_delay(config.sweep.settling_delay());
    if let Some(mode) = cli.mode {
        station.set_mode(mode)?;
    }
    station.nplc(cli.nplc.unwrap_or(config.sweep.nplc)).await?;

    let setpoints = linspace(
        cli.start.unwrap_or(config.sweep.start),
        cli.stop.unwrap_or(config.sweep.stop),
        cli.points.unwrap_or(config.sweep.points),
    );
    let sweep = station.measure_cvc(&setpoints).await?;

    let rows = setpoints.iter().zip(&sweep.voltages).zip(&sweep.currents);
    for (k, ((setpoint, voltage), current)) in rows.enumerate() {
        match sweep.source_voltages.as_ref().and_then(|v| v.get(k)) {
            Some(source_voltage) => println!(
                "{:.6e} {:.6e} {:.6e} {:.6e}",
                setpoint, voltage, current, source_voltage
            ),
            None => println!("{:.6e} {:.6e} {:.6e}", setpoint, voltage, current),
        }
    }
    info!("{} sweep complete: {} points", station.mode(), sweep.len());

    station.source().beeper.success().await?;
    Ok(())
}
