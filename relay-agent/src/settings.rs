// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Command line and environment settings

use clap::Parser;
use enviro_relay::{BoundsOverride, ConfigError, RelayConfig};
use relay_influx::InfluxConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Environmental telemetry agent
///
/// Every option can also be set through the environment variable shown.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// InfluxDB host
    #[arg(long, env = "INFLUXDB_HOST", default_value = "localhost")]
    pub influx_host: String,

    /// InfluxDB HTTP port
    #[arg(long, env = "INFLUXDB_PORT", default_value = "8086")]
    pub influx_port: u16,

    /// InfluxDB user
    #[arg(long, env = "INFLUXDB_USERNAME", default_value = "")]
    pub influx_username: String,

    /// InfluxDB password
    #[arg(long, env = "INFLUXDB_PASSWORD", default_value = "", hide_env_values = true)]
    pub influx_password: String,

    /// InfluxDB database
    #[arg(long, env = "INFLUXDB_DATABASE", default_value = "sensors")]
    pub influx_database: String,

    /// Value of the `device` tag
    #[arg(long, env = "HOST_TAG", default_value = "raspberry-pi")]
    pub host_tag: String,

    /// Cycle period in seconds
    #[arg(long, env = "LOG_INTERVAL_SEC", default_value = "60")]
    pub interval_sec: u64,

    /// Delivery attempts per batch
    #[arg(long, env = "MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,

    /// Pause between delivery attempts in seconds
    #[arg(long, env = "RETRY_DELAY_SEC", default_value = "2")]
    pub retry_delay_sec: u64,

    /// Handshake and write timeout in seconds
    #[arg(long, env = "CONNECTION_TIMEOUT_SEC", default_value = "5")]
    pub connection_timeout_sec: u64,

    /// Reachability probe timeout in seconds
    #[arg(long, env = "NETWORK_CHECK_TIMEOUT_SEC", default_value = "2")]
    pub network_check_timeout_sec: u64,

    /// Part of each period never spent on delivery, in seconds
    #[arg(long, env = "SEND_MARGIN_SEC", default_value = "5")]
    pub send_margin_sec: u64,

    /// Spool file for undelivered batches
    #[arg(long, env = "FAILED_DATA_FILE", default_value = "/var/log/sensor_failed_data.json")]
    pub failed_data_file: PathBuf,

    /// Spool entry cap
    #[arg(long, env = "MAX_FAILED_ENTRIES", default_value = "1000")]
    pub max_failed_entries: usize,

    /// Log file, empty to log to stderr only
    #[arg(long, env = "LOG_FILE", default_value = "/var/log/sensor_logger.log")]
    pub log_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    /// Temperature compensation damping factor
    #[arg(long, env = "TEMP_COMPENSATION_FACTOR", default_value = "5.0")]
    pub temp_compensation_factor: f64,

    /// Heat source history length
    #[arg(long, env = "TEMP_COMPENSATION_WINDOW", default_value = "60")]
    pub temp_compensation_window: usize,

    /// Multiplier for gas readings
    #[arg(long, env = "GAS_SCALE", default_value = "1.0")]
    pub gas_scale: f64,

    /// Sanitizer overrides, `metric=min,max,step` separated by `;`
    #[arg(long, env = "SANITIZE_BOUNDS")]
    pub sanitize_bounds: Option<String>,

    /// IIO device directory
    #[arg(long, env = "IIO_DEVICE", default_value = "/sys/bus/iio/devices/iio:device0")]
    pub iio_device: PathBuf,

    /// Thermal zone used as heat source
    #[arg(long, env = "THERMAL_ZONE", default_value = "/sys/class/thermal/thermal_zone0/temp")]
    pub thermal_zone: PathBuf,
}

impl Args {
    /// Build and validate the pipeline configuration
    pub fn relay_config(&self) -> Result<RelayConfig, ConfigError> {
        let overrides = parse_bounds(self.sanitize_bounds.as_deref().unwrap_or(""))?;
        let config = RelayConfig {
            device_tag: self.host_tag.clone(),
            period: Duration::from_secs(self.interval_sec),
            send_margin: Duration::from_secs(self.send_margin_sec),
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_sec),
            spool_path: self.failed_data_file.clone(),
            max_spool_entries: self.max_failed_entries,
            compensation_window: self.temp_compensation_window,
            damping_factor: self.temp_compensation_factor,
            gas_scale: self.gas_scale,
            ..Default::default()
        }
        .with_bounds(overrides);

        config.validate()?;
        Ok(config)
    }

    /// Database connection settings
    pub fn influx_config(&self) -> InfluxConfig {
        InfluxConfig {
            connection_timeout: Duration::from_secs(self.connection_timeout_sec),
            probe_timeout: Duration::from_secs(self.network_check_timeout_sec),
            ..InfluxConfig::with_endpoint(self.influx_host.clone(), self.influx_port)
                .with_database(self.influx_database.clone())
                .with_credentials(self.influx_username.clone(), self.influx_password.clone())
        }
    }

    /// Log file path, if file logging is enabled
    pub fn log_path(&self) -> Option<PathBuf> {
        let trimmed = self.log_file.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

/// Parse `;`-separated bounds overrides; blank entries are skipped
pub fn parse_bounds(raw: &str) -> Result<Vec<BoundsOverride>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use enviro_relay::{Bounds, Metric};

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["relay-agent"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_bounds() {
        let parsed = parse_bounds("humidity=10,90,5; lux=0,,;").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].metric, Metric::Humidity);
        assert_eq!(parsed[1].bounds.max, None);

        assert!(parse_bounds("").unwrap().is_empty());
        assert!(parse_bounds("sound=1,2,3").is_err());
    }

    #[test]
    fn test_flags_map_to_config() {
        let args = args(&[
            "--interval-sec",
            "30",
            "--host-tag",
            "attic",
            "--sanitize-bounds",
            "temperature=-10,40,1",
        ]);
        let config = args.relay_config().unwrap();
        assert_eq!(config.period, Duration::from_secs(30));
        assert_eq!(config.device_tag, "attic");
        assert_eq!(config.bounds.get(Metric::Temperature), Bounds::new(-10.0, 40.0, 1.0));
    }

    #[test]
    fn test_margin_longer_than_period_rejected() {
        let args = args(&["--interval-sec", "5", "--send-margin-sec", "5"]);
        assert!(args.relay_config().is_err());
    }

    #[test]
    fn test_influx_config() {
        let args = args(&["--influx-host", "db.lan", "--influx-port", "9086"]);
        let influx = args.influx_config();
        assert_eq!(influx.endpoint(), "db.lan:9086");
        assert_eq!(influx.probe_timeout, Duration::from_secs(2));
        assert_eq!(influx.database, "sensors");
    }

    #[test]
    fn test_empty_log_file_disables_file_logging() {
        assert!(args(&["--log-file", ""]).log_path().is_none());
    }
}
