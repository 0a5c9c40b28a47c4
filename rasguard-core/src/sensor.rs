//! Per-sensor configuration
//!
//! One uniform record describes every sensor on the tank: how many raw reads
//! to take, how many extremes to discard, how to convert, how to round and
//! which bounds are safe. Temperature probes, pH channels and pump current
//! clamps differ only in the data they carry.
//!
//! Specs are built once at startup through [`SensorSpecBuilder::build`],
//! which rejects any combination the filter could not honor at run time.

use core::fmt;
use std::borrow::Borrow;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::convert::{round_to, Calibration, Convert};
use crate::errors::ConfigError;
use crate::filter::MAX_SAMPLES;
use crate::threshold::ThresholdRule;

/// Default number of raw reads per cycle
pub const DEFAULT_SAMPLE_COUNT: usize = 10;

/// Default number of extremes dropped from each end
pub const DEFAULT_DISCARD_COUNT: usize = 2;

/// Default pause between raw reads, gives ADC and echo sensors time to settle
pub const DEFAULT_SAMPLE_SPACING: Duration = Duration::from_millis(100);

/// Stable sensor identifier, also the telemetry key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(String);

impl SensorId {
    /// Wrap an identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as `&str`
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SensorId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SensorId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for SensorId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Immutable configuration of one sensor
#[derive(Clone)]
pub struct SensorSpec {
    id: SensorId,
    label: String,
    unit: String,
    sample_count: usize,
    discard_count: usize,
    sample_spacing: Duration,
    converter: Arc<dyn Convert>,
    decimals: Option<u32>,
    rule: ThresholdRule,
}

impl fmt::Debug for SensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorSpec")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("unit", &self.unit)
            .field("sample_count", &self.sample_count)
            .field("discard_count", &self.discard_count)
            .field("sample_spacing", &self.sample_spacing)
            .field("decimals", &self.decimals)
            .field("rule", &self.rule)
            .finish_non_exhaustive()
    }
}

impl SensorSpec {
    /// Start building a spec for `id`
    pub fn builder(id: impl Into<SensorId>) -> SensorSpecBuilder {
        SensorSpecBuilder::new(id.into())
    }

    pub fn id(&self) -> &SensorId {
        &self.id
    }

    /// Human-readable name used in alert text
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Raw reads attempted per cycle (N)
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Extremes dropped from each end (K)
    pub fn discard_count(&self) -> usize {
        self.discard_count
    }

    pub fn sample_spacing(&self) -> Duration {
        self.sample_spacing
    }

    pub fn rule(&self) -> &ThresholdRule {
        &self.rule
    }

    /// Fewest successful reads that still yield a reading
    ///
    /// At least `N - 2K` reads must survive, and never fewer than the `2K + 1`
    /// the trim itself needs.
    pub fn min_viable_samples(&self) -> usize {
        let trimmed = self.sample_count - 2 * self.discard_count;
        trimmed.max(2 * self.discard_count + 1)
    }

    /// Convert a filtered raw value and apply the configured rounding
    pub fn convert(&self, filtered: f64) -> f64 {
        let value = self.converter.convert(filtered);
        match self.decimals {
            Some(decimals) => round_to(value, decimals),
            None => value,
        }
    }
}

/// Builder for [`SensorSpec`]
pub struct SensorSpecBuilder {
    id: SensorId,
    label: Option<String>,
    unit: String,
    sample_count: usize,
    discard_count: usize,
    sample_spacing: Duration,
    converter: Arc<dyn Convert>,
    decimals: Option<u32>,
    rule: ThresholdRule,
}

impl SensorSpecBuilder {
    fn new(id: SensorId) -> Self {
        Self {
            id,
            label: None,
            unit: String::new(),
            sample_count: DEFAULT_SAMPLE_COUNT,
            discard_count: DEFAULT_DISCARD_COUNT,
            sample_spacing: DEFAULT_SAMPLE_SPACING,
            converter: Arc::new(Calibration::Identity),
            decimals: None,
            rule: ThresholdRule::default(),
        }
    }

    /// Display name, defaults to the id
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Take `count` reads per cycle and drop `discard` from each end
    pub fn samples(mut self, count: usize, discard: usize) -> Self {
        self.sample_count = count;
        self.discard_count = discard;
        self
    }

    pub fn sample_spacing(mut self, spacing: Duration) -> Self {
        self.sample_spacing = spacing;
        self
    }

    pub fn calibration(mut self, calibration: Calibration) -> Self {
        self.converter = Arc::new(calibration);
        self
    }

    /// Use an arbitrary conversion function
    pub fn converter(mut self, converter: impl Convert + 'static) -> Self {
        self.converter = Arc::new(converter);
        self
    }

    pub fn decimals(mut self, decimals: u32) -> Self {
        self.decimals = Some(decimals);
        self
    }

    pub fn thresholds(mut self, rule: ThresholdRule) -> Self {
        self.rule = rule;
        self
    }

    /// Validate and freeze the spec
    pub fn build(self) -> Result<SensorSpec, ConfigError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ConfigError::EmptySensorId);
        }
        if self.sample_count == 0 || self.sample_count > MAX_SAMPLES {
            return Err(ConfigError::InvalidSampleCount {
                sensor: self.id.to_string(),
                count: self.sample_count,
                max: MAX_SAMPLES,
            });
        }
        if 2 * self.discard_count >= self.sample_count {
            return Err(ConfigError::InvalidDiscardCount {
                sensor: self.id.to_string(),
                count: self.sample_count,
                discard: self.discard_count,
            });
        }
        self.rule.validate(self.id.as_str())?;

        Ok(SensorSpec {
            label: self.label.unwrap_or_else(|| self.id.to_string()),
            id: self.id,
            unit: self.unit,
            sample_count: self.sample_count,
            discard_count: self.discard_count,
            sample_spacing: self.sample_spacing,
            converter: self.converter,
            decimals: self.decimals,
            rule: self.rule,
        })
    }
}

/// Reject configurations where two sensors share an id
pub fn ensure_unique(specs: &[SensorSpec]) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for spec in specs {
        if !seen.insert(spec.id.as_str()) {
            return Err(ConfigError::DuplicateSensor(spec.id.to_string()));
        }
    }
    Ok(())
}
