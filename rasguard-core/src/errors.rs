//! Error Types for the Monitoring Loop
//!
//! ## Error Categories
//!
//! Errors fall into three groups, each with its own propagation rule:
//!
//! ### Recovered inside the cycle
//! - `SensorError`: one raw read failed or timed out. The sample is dropped
//!   and the sensor's sample set shrinks; nothing propagates.
//! - `FilterError`: too few samples survived to form a trimmed mean. The
//!   sensor is reported unavailable for this cycle.
//!
//! ### Collaborator I/O
//! - `CollaboratorError`: publishing, logging or notifying failed. Logged,
//!   implicitly retried on the next cycle, never fatal.
//!
//! ### Fatal at startup
//! - `ConfigError`: invalid sample counts, thresholds or timings. The process
//!   must refuse to start.
//!
//! Battery-critical shutdown is not an error; it is a
//! [`StopReason`](crate::scheduler::StopReason).
//!
//! ```rust
//! use rasguard_core::errors::{ConfigError, SensorError};
//!
//! fn classify(err: &SensorError) -> &'static str {
//!     match err {
//!         SensorError::Timeout => "device did not answer",
//!         SensorError::InvalidValue => "NaN or infinite sample",
//!         SensorError::Device(_) | SensorError::Io(_) => "driver failure",
//!     }
//! }
//! # let _ = classify(&SensorError::Timeout);
//! # let _ = ConfigError::InvalidCycleInterval;
//! ```

use thiserror_no_std::Error;

/// Failure of a single raw sensor read
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    /// The device did not answer within the read timeout
    #[error("sensor read timed out")]
    Timeout,

    /// The read returned NaN or infinity
    #[error("sensor returned a non-finite value")]
    InvalidValue,

    /// The driver reported a device-level problem (bad CRC, missing echo, ...)
    #[error("device error: {0}")]
    Device(String),

    /// The underlying file or bus handle failed
    #[error("I/O error: {0}")]
    Io(String),
}

/// Trimmed-mean reduction errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterError {
    /// Not enough samples left after discarding the extremes
    #[error("insufficient samples: need {required}, have {available}")]
    InsufficientSamples {
        /// Minimum number of samples the trim needs
        required: usize,
        /// Samples actually provided
        available: usize,
    },

    /// More samples than the fixed sample buffer holds
    #[error("too many samples: {count} exceeds buffer capacity {capacity}")]
    TooManySamples {
        /// Samples provided
        count: usize,
        /// Buffer capacity
        capacity: usize,
    },

    /// A sample is NaN or infinite and cannot be ordered
    #[error("sample {index} is not a finite number")]
    NonFinite {
        /// Position of the first offending sample
        index: usize,
    },
}

/// Failure of an external collaborator (telemetry, log, notifier, state store)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    /// The operation exceeded its timeout
    #[error("operation timed out")]
    Timeout,

    /// Network-level failure (DNS, TLS, connection reset)
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote end answered with a failure status
    #[error("rejected with status {status}: {message}")]
    Rejected {
        /// Status code returned by the service
        status: u16,
        /// Body or reason phrase
        message: String,
    },

    /// Local file-system failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Payload could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The collaborator is missing something it needs (e.g. a device token)
    #[error("not configured: {0}")]
    NotConfigured(String),
}

/// Invalid configuration detected at startup
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Sample count must be at least one and fit the sample buffer
    #[error("sensor {sensor}: sample count {count} outside 1..={max}")]
    InvalidSampleCount {
        /// Offending sensor
        sensor: String,
        /// Configured sample count
        count: usize,
        /// Sample buffer capacity
        max: usize,
    },

    /// Discarding 2K samples must leave at least one
    #[error("sensor {sensor}: discard count {discard} leaves nothing of {count} samples")]
    InvalidDiscardCount {
        /// Offending sensor
        sensor: String,
        /// Configured sample count N
        count: usize,
        /// Configured discard count K
        discard: usize,
    },

    /// Threshold bounds are inverted or not finite
    #[error("sensor {sensor}: invalid thresholds low={low:?} high={high:?}")]
    InvalidThreshold {
        /// Offending sensor
        sensor: String,
        /// Lower bound
        low: Option<f64>,
        /// Upper bound
        high: Option<f64>,
    },

    /// Two sensors share an identifier
    #[error("duplicate sensor id {0}")]
    DuplicateSensor(String),

    /// Sensor identifiers must be non-empty
    #[error("sensor id must not be empty")]
    EmptySensorId,

    /// The cycle interval must be non-zero
    #[error("cycle interval must be greater than zero")]
    InvalidCycleInterval,

    /// Battery percentages must lie in 0..=100
    #[error("battery {name} percent {value} outside 0..=100")]
    InvalidBatteryPercent {
        /// Which setting
        name: &'static str,
        /// Configured value
        value: f64,
    },

    /// Re-notify policy is inconsistent (e.g. zero cycles)
    #[error("invalid re-notify policy: {0}")]
    InvalidReNotify(&'static str),

    /// No sensors configured
    #[error("no sensors configured")]
    NoSensors,
}
