//! Daemon configuration
//!
//! Loaded from a YAML file. Secrets never live in the file: the Pushover
//! token and user key and the ThingsBoard device tokens are read from the
//! environment (optionally populated from an env file by `dotenvy`).
//!
//! ```yaml
//! cycle_interval_secs: 600
//! battery:
//!   shutdown_percent: 10
//!   warning_percent: 20
//! log:
//!   path: /home/pi/ras/ras_log.csv
//!   backup_path: /media/usb/ras_log.csv
//! sensors:
//!   - id: temperature
//!     label: Temperature
//!     unit: "°C"
//!     source: { kind: w1, device: 28-0316a2795aff }
//!     low: 18
//!     high: 28
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use rasguard_core::convert::Calibration;
use rasguard_core::scheduler::{SchedulerConfig, Timeouts, DEFAULT_BATTERY_SHUTDOWN_PERCENT};
use rasguard_core::sensor::{SensorSpec, DEFAULT_DISCARD_COUNT, DEFAULT_SAMPLE_COUNT};
use rasguard_core::threshold::ThresholdRule;
use rasguard_core::ReNotify;
use serde::Deserialize;

pub const PUSHOVER_TOKEN_ENV: &str = "PUSHOVER_TOKEN";
pub const PUSHOVER_USER_ENV: &str = "PUSHOVER_USER";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// ThingsBoard; readings are only logged locally when absent
    pub telemetry: Option<TelemetryConfig>,
    pub log: LogConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    pub sensors: Vec<SensorConfig>,
}

fn default_cycle_interval_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatteryConfig {
    #[serde(default = "default_shutdown_percent")]
    pub shutdown_percent: f64,
    pub warning_percent: Option<f64>,
    /// sysfs `capacity` files; without any the host is treated as mains powered
    #[serde(default)]
    pub capacity_paths: Vec<PathBuf>,
    /// Command run after a battery shutdown, e.g. `["sudo", "shutdown", "-h", "now"]`
    pub halt_command: Option<Vec<String>>,
    /// Env var holding the ThingsBoard device token for the battery level
    pub token_env: Option<String>,
}

/// Device token variable for the battery level unless configured
pub const BATTERY_TOKEN_ENV: &str = "THINGSBOARD_TOKEN_UPS_BATTERY";

fn default_shutdown_percent() -> f64 {
    DEFAULT_BATTERY_SHUTDOWN_PERCENT
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            shutdown_percent: DEFAULT_BATTERY_SHUTDOWN_PERCENT,
            warning_percent: None,
            capacity_paths: Vec::new(),
            halt_command: None,
            token_env: None,
        }
    }
}

impl BatteryConfig {
    /// Whether a battery level is read at all
    pub fn is_monitored(&self) -> bool {
        !self.capacity_paths.is_empty()
    }

    pub fn token_env(&self) -> &str {
        self.token_env.as_deref().unwrap_or(BATTERY_TOKEN_ENV)
    }
}

/// Per-operation timeouts; unset values keep the built-in defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    pub read_ms: Option<u64>,
    pub publish_secs: Option<u64>,
    pub log_secs: Option<u64>,
    pub notify_secs: Option<u64>,
    pub power_secs: Option<u64>,
}

impl TimeoutConfig {
    pub fn resolve(&self) -> Timeouts {
        let defaults = Timeouts::default();
        Timeouts {
            read: self.read_ms.map_or(defaults.read, Duration::from_millis),
            publish: self.publish_secs.map_or(defaults.publish, Duration::from_secs),
            log: self.log_secs.map_or(defaults.log, Duration::from_secs),
            notify: self.notify_secs.map_or(defaults.notify, Duration::from_secs),
            power: self.power_secs.map_or(defaults.power, Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    pub url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    pub path: PathBuf,
    pub backup_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertConfig {
    pub title: Option<String>,
    /// Remind about a standing violation at all
    #[serde(default = "default_true")]
    pub repeat: bool,
    pub renotify_after_cycles: Option<u64>,
    pub renotify_after_secs: Option<u64>,
    /// Persist suppression across restarts
    pub state_file: Option<PathBuf>,
    /// Pushover API base, for self-hosted relays
    pub pushover_url: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            title: None,
            repeat: true,
            renotify_after_cycles: None,
            renotify_after_secs: None,
            state_file: None,
            pushover_url: None,
        }
    }
}

impl AlertConfig {
    pub fn renotify(&self) -> anyhow::Result<ReNotify> {
        let policy = match (self.repeat, self.renotify_after_cycles, self.renotify_after_secs) {
            (false, _, _) => ReNotify::Never,
            (true, Some(_), Some(_)) => {
                bail!("alerts: set either renotify_after_cycles or renotify_after_secs, not both")
            }
            (true, Some(cycles), None) => ReNotify::AfterCycles(cycles),
            (true, None, Some(secs)) => ReNotify::AfterElapsed(Duration::from_secs(secs)),
            (true, None, None) => ReNotify::default(),
        };
        policy.validate().context("alerts")?;
        Ok(policy)
    }
}

/// Where raw samples come from
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// 1-Wire probe by device id
    W1 { device: String },
    /// 1-Wire probe by explicit `w1_slave` path
    W1File { path: PathBuf },
    /// IIO ADC channel, volts
    Iio { device_dir: PathBuf, channel: u8 },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    pub id: String,
    pub label: Option<String>,
    #[serde(default)]
    pub unit: String,
    pub source: SourceConfig,
    #[serde(default = "default_samples")]
    pub samples: usize,
    #[serde(default = "default_discard")]
    pub discard: usize,
    pub spacing_ms: Option<u64>,
    #[serde(default)]
    pub calibration: Calibration,
    pub decimals: Option<u32>,
    pub low: Option<f64>,
    pub high: Option<f64>,
    /// ThingsBoard telemetry key, defaults to the id
    pub telemetry_key: Option<String>,
    /// Environment variable holding the ThingsBoard device token
    pub token_env: Option<String>,
}

fn default_samples() -> usize {
    DEFAULT_SAMPLE_COUNT
}

fn default_discard() -> usize {
    DEFAULT_DISCARD_COUNT
}

impl SensorConfig {
    pub fn spec(&self) -> anyhow::Result<SensorSpec> {
        let mut builder = SensorSpec::builder(self.id.as_str())
            .unit(self.unit.clone())
            .samples(self.samples, self.discard)
            .calibration(self.calibration.clone())
            .thresholds(ThresholdRule {
                low: self.low,
                high: self.high,
            });
        if let Some(label) = &self.label {
            builder = builder.label(label.clone());
        }
        if let Some(spacing) = self.spacing_ms {
            builder = builder.sample_spacing(Duration::from_millis(spacing));
        }
        if let Some(decimals) = self.decimals {
            builder = builder.decimals(decimals);
        }
        builder.build().with_context(|| format!("sensor {}", self.id))
    }

    pub fn telemetry_key(&self) -> &str {
        self.telemetry_key.as_deref().unwrap_or(&self.id)
    }

    /// `THINGSBOARD_TOKEN_<ID>` unless configured
    pub fn token_env(&self) -> String {
        self.token_env.clone().unwrap_or_else(|| {
            let id: String = self
                .id
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect();
            format!("THINGSBOARD_TOKEN_{id}")
        })
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn scheduler(&self) -> anyhow::Result<SchedulerConfig> {
        let config = SchedulerConfig {
            cycle_interval: Duration::from_secs(self.cycle_interval_secs),
            battery_shutdown_percent: self.battery.shutdown_percent,
            battery_warning_percent: self.battery.warning_percent,
            timeouts: self.timeouts.resolve(),
        };
        config.validate()?;
        Ok(config)
    }
}
