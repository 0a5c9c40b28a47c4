//! Adapters between the monitoring loop and the outside world
//!
//! ## Overview
//!
//! Every adapter implements one of the collaborator traits from
//! `rasguard_core::traits`. The scheduler only ever sees the trait, so a
//! deployment can mix and match: a 1-Wire probe next to an IIO ADC channel,
//! ThingsBoard or nothing for telemetry, Pushover for alerts.
//!
//! | Module | Implements | Backed by |
//! |--------|------------|-----------|
//! | [`sysfs`] | `RawReader`, `PowerSource` | Linux sysfs files |
//! | [`thingsboard`] | `TelemetryPublisher` | ThingsBoard device HTTP API |
//! | [`pushover`] | `Notifier` | Pushover message API |
//! | [`csv_log`] | `CycleLog` | Append-only CSV file plus backup copy |
//! | [`state_file`] | `DispatchStateStore` | JSON file |
//!
//! ## Failure handling
//!
//! Adapters never panic and never retry forever. HTTP adapters retry
//! transport errors, 5xx and 429 a bounded number of times with exponential
//! backoff, then report a `CollaboratorError`. The scheduler's own timeout
//! caps the total time spent either way.
//!
//! ## Example Usage
//!
//! ```no_run
//! use rasguard_connectors::http::{HttpConfig, HttpConnector};
//! use rasguard_connectors::thingsboard::ThingsBoardPublisher;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let http = HttpConnector::new(HttpConfig::new("https://thingsboard.cloud").timeout_secs(10))?;
//! let publisher = ThingsBoardPublisher::new(http).device("temperature", "A1_TEST_TOKEN", "temperature");
//! # let _ = publisher;
//! # Ok(())
//! # }
//! ```

pub mod csv_log;
pub mod state_file;
pub mod sysfs;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub mod pushover;

#[cfg(feature = "http")]
pub mod thingsboard;

// Re-export common types
pub use csv_log::CsvLog;
pub use state_file::JsonStateFile;
pub use sysfs::{IioChannel, PowerSupplyCapacity, W1Thermometer};

#[cfg(feature = "http")]
pub use http::{HttpConfig, HttpConnector, HttpError};
#[cfg(feature = "http")]
pub use pushover::PushoverNotifier;
#[cfg(feature = "http")]
pub use thingsboard::ThingsBoardPublisher;

use rasguard_core::errors::{CollaboratorError, SensorError};
use thiserror::Error;

/// Common connector errors
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConnectorError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        ConnectorError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

impl From<ConnectorError> for SensorError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Io { .. } => SensorError::Io(err.to_string()),
            ConnectorError::Parse(message) | ConnectorError::Device(message) => SensorError::Device(message),
            ConnectorError::Config(message) => SensorError::Device(message),
        }
    }
}

impl From<ConnectorError> for CollaboratorError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Io { .. } => CollaboratorError::Io(err.to_string()),
            ConnectorError::Parse(message) => CollaboratorError::Serialization(message),
            ConnectorError::Device(message) => CollaboratorError::Io(message),
            ConnectorError::Config(message) => CollaboratorError::NotConfigured(message),
        }
    }
}

/// Delivery statistics kept by the network adapters
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConnectionStats {
    /// Requests that succeeded
    pub messages_sent: u64,
    /// Requests that failed after all retries
    pub messages_failed: u64,
    /// Body bytes of successful requests
    pub bytes_sent: u64,
    /// Attempts beyond the first
    pub retries: u32,
    /// Last error message
    pub last_error: Option<String>,
}
