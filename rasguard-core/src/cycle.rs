//! Per-cycle data: filtered readings and the aggregated cycle result

use serde::Serialize;
use thiserror_no_std::Error;

use crate::errors::FilterError;
use crate::filter::trimmed_mean;
use crate::sensor::{SensorId, SensorSpec};
use crate::threshold::{Direction, Evaluation, Violation};
use crate::time::Timestamp;

/// Identifier of the UPS battery level in telemetry, the cycle log and alerts
pub const BATTERY_SENSOR_ID: &str = "ups_battery";

/// Label used in battery alert messages
pub const BATTERY_LABEL: &str = "UPS Battery";

/// One engineering-unit value for one sensor in one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilteredReading {
    pub sensor: SensorId,
    pub value: f64,
    pub unit: String,
    /// Cycle start, ms since the Unix epoch
    pub timestamp: Timestamp,
    /// Raw samples that survived and fed the trimmed mean
    pub samples_used: usize,
}

/// Why a sensor has no reading this cycle
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnavailableReason {
    /// Too many raw reads failed
    #[error("insufficient samples: need {required}, have {available}")]
    InsufficientSamples { required: usize, available: usize },

    /// More samples than the sample buffer holds; SensorSpecBuilder rejects
    /// such counts, so only hand-fed sample sets get here
    #[error("too many samples: {count} exceeds capacity {capacity}")]
    TooManySamples { count: usize, capacity: usize },

    /// A raw sample handed to the filter was NaN or infinite
    #[error("raw sample {index} is not a finite number")]
    NonFiniteSample { index: usize },

    /// The converter produced NaN or infinity
    #[error("conversion produced a non-finite value")]
    InvalidConversion,
}

impl From<FilterError> for UnavailableReason {
    fn from(err: FilterError) -> Self {
        match err {
            FilterError::InsufficientSamples { required, available } => {
                UnavailableReason::InsufficientSamples { required, available }
            }
            FilterError::TooManySamples { count, capacity } => {
                UnavailableReason::TooManySamples { count, capacity }
            }
            FilterError::NonFinite { index } => UnavailableReason::NonFiniteSample { index },
        }
    }
}

/// Reduce the surviving raw samples of one sensor to a reading
///
/// Applies the minimum-viable check, the trimmed mean, conversion and
/// rounding, in that order.
pub fn reduce(
    spec: &SensorSpec,
    samples: &[f64],
    timestamp: Timestamp,
) -> Result<FilteredReading, UnavailableReason> {
    let required = spec.min_viable_samples();
    if samples.len() < required {
        return Err(UnavailableReason::InsufficientSamples {
            required,
            available: samples.len(),
        });
    }

    let filtered = trimmed_mean(samples, spec.discard_count())?;
    let value = spec.convert(filtered);
    if !value.is_finite() {
        return Err(UnavailableReason::InvalidConversion);
    }

    Ok(FilteredReading {
        sensor: spec.id().clone(),
        value,
        unit: spec.unit().to_owned(),
        timestamp,
        samples_used: samples.len(),
    })
}

/// What happened to one sensor this cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReport {
    pub sensor: SensorId,
    pub reading: Option<FilteredReading>,
    pub evaluation: Evaluation,
}

/// Report for the UPS battery level
///
/// The level is a violation at or below `warning_percent`, so a low battery
/// is alerted and suppressed like any sensor. Without a warning level it is
/// always in bounds.
pub fn battery_report(percent: f64, warning_percent: Option<f64>, timestamp: Timestamp) -> SensorReport {
    let sensor = SensorId::new(BATTERY_SENSOR_ID);
    let evaluation = match warning_percent {
        Some(warning) if percent <= warning => Evaluation::Violating(Violation {
            sensor: sensor.clone(),
            label: BATTERY_LABEL.to_owned(),
            value: percent,
            unit: "%".to_owned(),
            bound: warning,
            direction: Direction::Low,
        }),
        _ => Evaluation::InBounds,
    };

    SensorReport {
        sensor: sensor.clone(),
        reading: Some(FilteredReading {
            sensor,
            value: percent,
            unit: "%".to_owned(),
            timestamp,
            samples_used: 1,
        }),
        evaluation,
    }
}

/// Everything one cycle produced, in configured sensor order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleResult {
    /// 1-based cycle counter since process start
    pub index: u64,
    pub started_at: Timestamp,
    pub reports: Vec<SensorReport>,
    /// UPS battery level, `None` when unknown this cycle
    pub battery: Option<SensorReport>,
}

impl CycleResult {
    /// Sensor reports followed by the battery report, if any
    pub fn all_reports(&self) -> impl Iterator<Item = &SensorReport> {
        self.reports.iter().chain(self.battery.as_ref())
    }

    pub fn readings(&self) -> impl Iterator<Item = &FilteredReading> {
        self.all_reports().filter_map(|report| report.reading.as_ref())
    }

    pub fn violations(&self) -> impl Iterator<Item = &Violation> {
        self.all_reports().filter_map(|report| report.evaluation.violation())
    }

    /// Configured sensors without a reading
    pub fn unavailable(&self) -> impl Iterator<Item = &SensorReport> {
        self.reports.iter().filter(|report| report.evaluation.is_unavailable())
    }

    pub fn report(&self, sensor: &str) -> Option<&SensorReport> {
        self.all_reports().find(|report| report.sensor.as_str() == sensor)
    }

    pub fn battery_percent(&self) -> Option<f64> {
        self.battery
            .as_ref()
            .and_then(|report| report.reading.as_ref())
            .map(|reading| reading.value)
    }
}
