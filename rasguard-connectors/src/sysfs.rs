//! Sensor and battery readers backed by Linux sysfs
//!
//! ## 1-Wire thermometers (DS18B20)
//!
//! The `w1_therm` driver exposes one file per probe:
//!
//! ```text
//! /sys/bus/w1/devices/28-0316a2795aff/w1_slave
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! The first line must end in `YES` (CRC ok), the second carries the
//! temperature in milli-degrees Celsius.
//!
//! ## IIO ADC channels (ADS1115 and friends)
//!
//! `in_voltageN_raw` holds the raw count, `in_voltage_scale` (or the
//! per-channel `in_voltageN_scale`) the millivolts per count. Readings are
//! returned in volts; sensor-specific calibration maps them to pH, mg/L or
//! amperes.
//!
//! ## Power supply capacity
//!
//! UPS HATs with a kernel driver expose `capacity` in percent under
//! `/sys/class/power_supply/<name>/`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use rasguard_core::errors::SensorError;
use rasguard_core::traits::{PowerSource, RawReader};

use crate::ConnectorError;

pub const W1_DEVICES_DIR: &str = "/sys/bus/w1/devices";

/// Capacity files tried when none are configured
pub const DEFAULT_CAPACITY_PATHS: &[&str] = &[
    "/sys/class/power_supply/BAT0/capacity",
    "/sys/class/power_supply/battery/capacity",
];

async fn read_file(path: &Path) -> Result<String, ConnectorError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConnectorError::io(path, e))
}

fn parse_number(path: &Path, contents: &str) -> Result<f64, ConnectorError> {
    contents
        .trim()
        .parse::<f64>()
        .map_err(|e| ConnectorError::Parse(format!("{}: {}", path.display(), e)))
}

/// Parse the contents of a `w1_slave` file into degrees Celsius
pub fn parse_w1_slave(contents: &str) -> Result<f64, ConnectorError> {
    let mut lines = contents.lines();
    let status = lines.next().unwrap_or_default();
    if !status.trim_end().ends_with("YES") {
        return Err(ConnectorError::Device("1-Wire CRC check failed".into()));
    }

    let data = lines.next().unwrap_or_default();
    let millis = data
        .split_once("t=")
        .map(|(_, value)| value.trim())
        .ok_or_else(|| ConnectorError::Parse("1-Wire reading has no t= field".into()))?;
    let millis: i64 = millis
        .parse()
        .map_err(|e| ConnectorError::Parse(format!("1-Wire temperature {millis:?}: {e}")))?;

    Ok(millis as f64 / 1000.0)
}

/// DS18B20 probe on the 1-Wire bus
#[derive(Debug, Clone)]
pub struct W1Thermometer {
    path: PathBuf,
}

impl W1Thermometer {
    /// Probe `device_id` (e.g. `28-0316a2795aff`) under the standard sysfs path
    pub fn new(device_id: &str) -> Self {
        Self::at(Path::new(W1_DEVICES_DIR).join(device_id).join("w1_slave"))
    }

    /// Probe whose `w1_slave` file lives at `path`
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RawReader for W1Thermometer {
    async fn read(&mut self) -> Result<f64, SensorError> {
        let contents = read_file(&self.path).await?;
        Ok(parse_w1_slave(&contents)?)
    }
}

/// One voltage channel of an IIO ADC
#[derive(Debug, Clone)]
pub struct IioChannel {
    raw: PathBuf,
    scale: PathBuf,
}

impl IioChannel {
    /// Channel `channel` of the IIO device at `device_dir`
    /// (e.g. `/sys/bus/iio/devices/iio:device0`)
    ///
    /// Uses the per-channel scale file if the driver provides one.
    pub fn new(device_dir: impl AsRef<Path>, channel: u8) -> Self {
        let dir = device_dir.as_ref();
        let own_scale = dir.join(format!("in_voltage{channel}_scale"));
        let scale = if own_scale.exists() {
            own_scale
        } else {
            dir.join("in_voltage_scale")
        };
        Self {
            raw: dir.join(format!("in_voltage{channel}_raw")),
            scale,
        }
    }

    pub fn raw_path(&self) -> &Path {
        &self.raw
    }
}

#[async_trait]
impl RawReader for IioChannel {
    /// Volts
    async fn read(&mut self) -> Result<f64, SensorError> {
        let raw = parse_number(&self.raw, &read_file(&self.raw).await?)?;
        let scale = parse_number(&self.scale, &read_file(&self.scale).await?)?;
        Ok(raw * scale / 1000.0)
    }
}

/// Battery percentage from the first readable `capacity` file
#[derive(Debug, Clone)]
pub struct PowerSupplyCapacity {
    paths: Vec<PathBuf>,
}

impl PowerSupplyCapacity {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl Default for PowerSupplyCapacity {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_PATHS.iter().map(PathBuf::from).collect())
    }
}

#[async_trait]
impl PowerSource for PowerSupplyCapacity {
    async fn battery_percent(&mut self) -> Option<f64> {
        for path in &self.paths {
            let reading = match read_file(path).await {
                Ok(contents) => parse_number(path, &contents),
                Err(e) => Err(e),
            };
            match reading {
                Ok(percent) if percent.is_finite() => return Some(percent.clamp(0.0, 100.0)),
                Ok(_) => debug!("{}: non-finite capacity", path.display()),
                Err(e) => debug!("{e}"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";

    #[test]
    fn parses_w1_temperature() {
        assert_eq!(parse_w1_slave(GOOD).unwrap(), 23.125);
        let freezing = "ff ff : crc=aa YES\nff ff t=-1500\n";
        assert_eq!(parse_w1_slave(freezing).unwrap(), -1.5);
    }

    #[test]
    fn rejects_bad_crc_and_garbage() {
        let bad_crc = "72 01 : crc=57 NO\n72 01 t=23125\n";
        assert!(matches!(parse_w1_slave(bad_crc), Err(ConnectorError::Device(_))));
        assert!(matches!(parse_w1_slave("x YES\nno temperature\n"), Err(ConnectorError::Parse(_))));
        assert!(parse_w1_slave("").is_err());
    }

    #[tokio::test]
    async fn w1_reader_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w1_slave");
        std::fs::write(&path, GOOD).unwrap();

        let mut probe = W1Thermometer::at(&path);
        assert_eq!(probe.read().await.unwrap(), 23.125);

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(probe.read().await, Err(SensorError::Io(_))));
    }

    #[tokio::test]
    async fn iio_channel_scales_to_volts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in_voltage1_raw"), "16000\n").unwrap();
        std::fs::write(dir.path().join("in_voltage_scale"), "0.125\n").unwrap();

        let mut channel = IioChannel::new(dir.path(), 1);
        assert_eq!(channel.read().await.unwrap(), 2.0);
    }

    #[tokio::test]
    async fn iio_prefers_channel_scale() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in_voltage0_raw"), "1000").unwrap();
        std::fs::write(dir.path().join("in_voltage_scale"), "0.125").unwrap();
        std::fs::write(dir.path().join("in_voltage0_scale"), "2").unwrap();

        let mut channel = IioChannel::new(dir.path(), 0);
        assert_eq!(channel.read().await.unwrap(), 2.0);
    }

    #[tokio::test]
    async fn capacity_uses_first_readable_path_and_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("BAT0/capacity");
        let garbage = dir.path().join("garbage");
        let present = dir.path().join("capacity");
        std::fs::write(&garbage, "unknown").unwrap();
        std::fs::write(&present, "104\n").unwrap();

        let mut power = PowerSupplyCapacity::new(vec![missing.clone(), garbage, present]);
        assert_eq!(power.battery_percent().await, Some(100.0));

        let mut none = PowerSupplyCapacity::new(vec![missing]);
        assert_eq!(none.battery_percent().await, None);
    }
}
