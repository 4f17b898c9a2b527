//! vialctl — Main Entry Point
//!
//! Replays a device session (JSON lines on `--input`) through the
//! controller and writes every command it sends (JSON lines on
//! `--output`).
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  JsonLinesTransport   LogEventSink   SystemClock   env_logger  │
//! │  (Transport)          (EventSink)    (Clock)       (log::Log)  │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  DeviceLink (inbound/outbound channels)                        │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              AppService (pure logic)                   │    │
//! │  │  Controls · lock protocol · Chemostat reactors         │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info, warn};
use serde::Deserialize;

use vialctl::adapters::json_lines::JsonLinesTransport;
use vialctl::adapters::log_sink::LogEventSink;
use vialctl::adapters::time::SystemClock;
use vialctl::app::commands::AppCommand;
use vialctl::app::controls::Controls;
use vialctl::app::ports::InboundSource;
use vialctl::app::service::AppService;
use vialctl::calibration::set::{CalibrationRecord, CalibrationSet};
use vialctl::config::ControlConfig;
use vialctl::reactors::chemostat::{Chemostat, ChemostatSettings};
use vialctl::rpc::link::DeviceLink;

// ── CLI ───────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "vialctl", about = "Multi-vial continuous-culture controller")]
struct Cli {
    /// Experiment file (JSON): control config, reactors, optional calibrations.
    #[arg(long)]
    experiment: PathBuf,

    /// Recorded device messages, one JSON object per line (default: stdin).
    #[arg(long)]
    input: Option<PathBuf>,

    /// Where to write outgoing commands (default: stdout).
    #[arg(long)]
    output: Option<PathBuf>,

    /// off, error, warn, info, debug, trace
    #[arg(long = "log-level", default_value = "info")]
    log_level: LevelFilter,

    /// Stop every reactor's pumps once the input is exhausted.
    #[arg(long = "end")]
    end_experiment: bool,
}

// ── Experiment file ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ExperimentFile {
    #[serde(default)]
    control: ControlConfig,
    #[serde(default)]
    chemostats: BTreeMap<String, ChemostatSettings>,
    /// Used instead of asking the device for its active calibrations.
    #[serde(default)]
    calibrations: Option<CalibrationRecords>,
}

#[derive(Debug, Deserialize)]
struct CalibrationRecords {
    od: CalibrationRecord,
    temp: CalibrationRecord,
    pump: CalibrationRecord,
}

impl ExperimentFile {
    fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read experiment file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse experiment file {}", path.display()))
    }
}

// ── Entry point ───────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.log_level)
        .target(env_logger::Target::Stderr)
        .format_timestamp_millis()
        .parse_default_env()
        .try_init()
        .context("Failed to install logger")?;

    let experiment = ExperimentFile::load(&cli.experiment)?;
    if experiment.chemostats.is_empty() {
        warn!("experiment defines no reactors; only calibrations will be fetched");
    }

    let input: Box<dyn Read> = match &cli.input {
        Some(p) => Box::new(File::open(p).with_context(|| format!("Failed to open {}", p.display()))?),
        None => Box::new(io::stdin()),
    };
    let output: Box<dyn Write> = match &cli.output {
        Some(p) => Box::new(File::create(p).with_context(|| format!("Failed to create {}", p.display()))?),
        None => Box::new(io::stdout()),
    };

    let controls = Controls::new(experiment.control.clone()).context("Invalid control configuration")?;
    let transport = JsonLinesTransport::new(BufReader::new(input), BufWriter::new(output));
    let mut link = DeviceLink::new(transport, experiment.control.float_resolution);
    let mut clock = SystemClock::new();
    let mut events = LogEventSink::new();
    let mut app = AppService::new(controls);

    // ── Calibrations ──────────────────────────────────────────
    let calibrations = match &experiment.calibrations {
        Some(c) => CalibrationSet::from_records(&c.od, &c.temp, &c.pump, experiment.control.num_vials)
            .context("Invalid calibrations in experiment file")?,
        None => app
            .fetch_calibrations(&mut link, &mut clock)
            .context("Failed to fetch active calibrations from the device")?,
    };
    info!(
        "calibrations loaded: OD from '{}', temperature from '{}'",
        calibrations.od_sensor(),
        calibrations.temp_sensor()
    );

    // ── Reactors ──────────────────────────────────────────────
    for (name, settings) in experiment.chemostats {
        let chemostat = Chemostat::new(&name, settings, &calibrations, app.controls())
            .with_context(|| format!("Invalid settings for chemostat '{name}'"))?;
        app.register(Box::new(chemostat))
            .with_context(|| format!("Cannot register chemostat '{name}'"))?;
    }
    app.start(&mut link, &mut events).context("Failed to send initial setpoints")?;

    // ── Event loop ────────────────────────────────────────────
    while let Some(msg) = link.poll().context("Device link failed")? {
        app.handle_inbound(msg, &mut link, &mut events)
            .context("Failed to handle device message")?;
    }

    if cli.end_experiment {
        app.handle_command(AppCommand::EndExperiment, &mut link, &mut events)
            .context("Failed to end experiment")?;
    }
    link.flush_outbound().context("Failed to flush commands")?;

    info!(
        "replay finished: {} broadcasts, {} commands sent, {} messages rejected",
        app.broadcasts(),
        link.sent(),
        link.rejected()
    );
    Ok(())
}
