// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Relay Agent
//!
//! Reads environmental sensors through sysfs once per period and ships the
//! cleaned readings to InfluxDB, spooling whatever cannot be delivered.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults, everything from the environment
//! INFLUXDB_HOST=influx.lan relay-agent
//!
//! # One reading every 30 seconds, tighter humidity gate
//! relay-agent --interval-sec 30 --sanitize-bounds "humidity=0,100,2"
//! ```

mod settings;
mod sysfs;

use clap::Parser;
use enviro_relay::{
    ConfigError, CycleScheduler, Metric, Pipeline, RelayError, SensorAdapter, ShutdownFlag,
};
use relay_influx::InfluxConnector;
use settings::Args;
use std::fs::OpenOptions;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Mutex;
use std::thread;
use sysfs::{SysfsSensors, ThermalZone};
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

/// Errors that stop the agent before the cycle loop starts
#[derive(Error, Debug)]
enum AgentError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("No sensor responded under {0}")]
    NoSensors(String),

    #[error("Cannot install interrupt handler: {0}")]
    Signal(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    info!("Relay Agent v{}", env!("CARGO_PKG_VERSION"));

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), AgentError> {
    let config = args.relay_config()?;
    let influx = args.influx_config();

    info!(
        "Configuration: device={} period={}s margin={}s retries={}x{}s spool={} (max {}) influx={} db={}",
        config.device_tag,
        config.period.as_secs(),
        config.send_margin.as_secs(),
        config.max_retries,
        config.retry_delay.as_secs(),
        config.spool_path.display(),
        config.max_spool_entries,
        influx.endpoint(),
        influx.database
    );

    let mut sensors = SysfsSensors::new(&args.iio_device);
    let available = check_sensors(&mut sensors);
    if available.is_empty() {
        return Err(AgentError::NoSensors(sensors.device().display().to_string()));
    }
    info!(
        "Sensors available: {}",
        available.iter().map(Metric::name).collect::<Vec<_>>().join(", ")
    );

    let mut pipeline = Pipeline::new(
        &config,
        sensors,
        ThermalZone::new(&args.thermal_zone),
        InfluxConnector::new(influx),
    )?;

    let scheduler = CycleScheduler::new(config.period);
    watch_interrupts(scheduler.shutdown_handle())?;

    scheduler.run_forever(&mut pipeline);

    info!("Stopped: {}", pipeline.metrics());
    if !pipeline.spool().is_empty() {
        info!("{} batches left in the spool for the next run", pipeline.spool().len());
    }
    Ok(())
}

/// Read every metric once; returns the ones that answered
fn check_sensors<S: SensorAdapter>(sensors: &mut S) -> Vec<Metric> {
    Metric::ALL
        .into_iter()
        .filter(|&metric| match sensors.read_raw(metric) {
            Ok(value) => {
                info!("Startup check: {} = {}", metric, value);
                true
            }
            Err(e) => {
                warn!("Startup check: {}", e);
                false
            }
        })
        .collect()
}

/// Trigger `flag` on Ctrl-C or SIGTERM
fn watch_interrupts(flag: ShutdownFlag) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match wait_for_signal().await {
                    Ok(()) => info!("Interrupt received, finishing current cycle"),
                    Err(e) => {
                        warn!("Signal handling failed: {}", e);
                        return;
                    }
                }
                flag.trigger();
            })
        })?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Log to stderr, and to the log file when it can be opened
fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.to_lowercase()));

    let (writer, file_error) = match args.log_path() {
        Some(path) => match open_log_file(&path) {
            Ok(file) => (BoxMakeWriter::new(std::io::stderr.and(Mutex::new(file))), None),
            Err(e) => (
                BoxMakeWriter::new(std::io::stderr),
                Some(format!("{}: {}", path.display(), e)),
            ),
        },
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    if let Some(e) = file_error {
        warn!("Logging to stderr only, cannot open log file {}", e);
    }
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use enviro_relay::ReadError;

    struct OnlyHumidity;

    impl SensorAdapter for OnlyHumidity {
        fn read_raw(&mut self, metric: Metric) -> Result<f64, ReadError> {
            match metric {
                Metric::Humidity => Ok(40.0),
                other => Err(ReadError::Unsupported(other)),
            }
        }
    }

    #[test]
    fn test_check_sensors_lists_responders() {
        assert_eq!(check_sensors(&mut OnlyHumidity), vec![Metric::Humidity]);
    }

    #[test]
    fn test_check_sensors_empty_device() {
        let dir = tempfile::tempdir().unwrap();
        let mut sensors = SysfsSensors::new(dir.path());
        assert!(check_sensors(&mut sensors).is_empty());
    }

    #[test]
    fn test_open_log_file_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("agent.log");
        assert!(open_log_file(&path).is_ok());
        assert!(path.exists());
    }
}
