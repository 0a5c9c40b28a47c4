//! Threshold evaluation
//!
//! A rule is an optional lower and an optional upper bound. Bounds belong to
//! the safe range: a reading exactly at a bound is in bounds, a violation is
//! strictly below `low` or strictly above `high`.
//!
//! ```text
//!          low                 high
//! ──────────┼───────────────────┼──────────
//!  Violating│     InBounds      │Violating
//!   (Low)   ▲                   ▲  (High)
//!           └ in bounds         └ in bounds
//! ```
//!
//! A sensor that produced no reading this cycle evaluates to
//! [`Evaluation::Unavailable`], never to `InBounds`.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::cycle::{FilteredReading, UnavailableReason};
use crate::errors::ConfigError;
use crate::sensor::{SensorId, SensorSpec};

/// Safe operating range for one sensor
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThresholdRule {
    /// Readings below this are violations
    #[serde(default)]
    pub low: Option<f64>,
    /// Readings above this are violations
    #[serde(default)]
    pub high: Option<f64>,
}

impl ThresholdRule {
    /// No bounds, every reading passes
    pub const UNBOUNDED: Self = Self { low: None, high: None };

    /// Closed range `[low, high]`
    pub fn range(low: f64, high: f64) -> Self {
        Self { low: Some(low), high: Some(high) }
    }

    /// Only a lower bound (e.g. pump current proving the pump runs)
    pub fn at_least(low: f64) -> Self {
        Self { low: Some(low), high: None }
    }

    /// Only an upper bound
    pub fn at_most(high: f64) -> Self {
        Self { low: None, high: Some(high) }
    }

    /// Startup check: finite bounds, `low <= high`
    pub fn validate(&self, sensor: &str) -> Result<(), ConfigError> {
        let finite = self.low.map_or(true, f64::is_finite) && self.high.map_or(true, f64::is_finite);
        let ordered = match (self.low, self.high) {
            (Some(low), Some(high)) => low <= high,
            _ => true,
        };

        if finite && ordered {
            Ok(())
        } else {
            Err(ConfigError::InvalidThreshold {
                sensor: sensor.to_owned(),
                low: self.low,
                high: self.high,
            })
        }
    }

    /// Which bound, if any, `value` crosses
    pub fn check(&self, value: f64) -> Option<Breach> {
        if let Some(low) = self.low {
            if value < low {
                return Some(Breach { bound: low, direction: Direction::Low });
            }
        }
        if let Some(high) = self.high {
            if value > high {
                return Some(Breach { bound: high, direction: Direction::High });
            }
        }
        None
    }
}

/// Side of the safe range that was left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Low,
    High,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Low => f.write_str("low"),
            Direction::High => f.write_str("high"),
        }
    }
}

/// A crossed bound
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breach {
    /// The bound that was crossed
    pub bound: f64,
    /// Which side
    pub direction: Direction,
}

/// A reading outside its safe range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub sensor: SensorId,
    pub label: String,
    pub value: f64,
    pub unit: String,
    pub bound: f64,
    pub direction: Direction,
}

impl Violation {
    /// Distance past the bound, always positive
    pub fn excess(&self) -> f64 {
        (self.value - self.bound).abs()
    }
}

impl fmt::Display for Violation {
    /// `Temperature low: 17.5 °C (bound 18)`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.label, self.direction, self.value)?;
        if !self.unit.is_empty() {
            write!(f, " {}", self.unit)?;
        }
        write!(f, " (bound {})", self.bound)
    }
}

/// Outcome of evaluating one sensor for one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Evaluation {
    InBounds,
    Violating(Violation),
    Unavailable { reason: UnavailableReason },
}

impl Evaluation {
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Evaluation::Violating(violation) => Some(violation),
            _ => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Evaluation::Unavailable { .. })
    }
}

/// Evaluate this cycle's outcome for `spec`
pub fn evaluate(spec: &SensorSpec, outcome: &Result<FilteredReading, UnavailableReason>) -> Evaluation {
    let reading = match outcome {
        Ok(reading) => reading,
        Err(reason) => return Evaluation::Unavailable { reason: reason.clone() },
    };

    match spec.rule().check(reading.value) {
        None => Evaluation::InBounds,
        Some(breach) => Evaluation::Violating(Violation {
            sensor: spec.id().clone(),
            label: spec.label().to_owned(),
            value: reading.value,
            unit: spec.unit().to_owned(),
            bound: breach.bound,
            direction: breach.direction,
        }),
    }
}
