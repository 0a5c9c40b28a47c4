//! Monitoring loop for recirculating aquaculture tanks
//!
//! Samples every configured sensor several times per cycle, reduces the
//! samples with a trimmed mean, converts them to engineering units and checks
//! them against safe ranges. Readings go to a telemetry sink and a local
//! log; violations go to a notifier with suppression so a standing fault
//! does not page on every cycle.
//!
//! Key constraints:
//! - One raw sample buffer per sensor, fixed capacity, no reallocation
//! - A failing sensor or sink never stops the loop
//! - Fixed cadence, no drift, no overlapping cycles
//! - Stops on interrupt or a critical UPS battery, releasing hardware once
//!
//! ```no_run
//! use rasguard_core::{
//!     AlertDispatcher, Collaborators, MainsPower, ReNotify, Scheduler, SchedulerConfig, Sensor,
//!     SensorSpec, ThresholdRule,
//! };
//! # use rasguard_core::traits::{CycleLog, Notifier, RawReader, TelemetryPublisher};
//! # struct Probe;
//! # #[async_trait::async_trait]
//! # impl RawReader for Probe {
//! #     async fn read(&mut self) -> Result<f64, rasguard_core::SensorError> { Ok(21.0) }
//! # }
//! # fn reader() -> Probe { Probe }
//! # fn sinks() -> (Box<dyn TelemetryPublisher>, Box<dyn CycleLog>, Box<dyn Notifier>) { todo!() }
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let temperature = SensorSpec::builder("temperature")
//!     .label("Temperature")
//!     .unit("°C")
//!     .thresholds(ThresholdRule::range(18.0, 28.0))
//!     .build()?;
//!
//! let (publisher, log, notifier) = sinks();
//! let scheduler = Scheduler::new(
//!     SchedulerConfig::default(),
//!     vec![Sensor::new(temperature, reader())],
//!     Collaborators { publisher, log, notifier, power: Box::new(MainsPower), state_store: None },
//!     AlertDispatcher::new(ReNotify::default()),
//! )?;
//!
//! let stop = scheduler.stop_handle();
//! // hand `stop` to a signal handler, then:
//! let reason = scheduler.run().await;
//! # let _ = (stop, reason);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod alert;
pub mod convert;
pub mod cycle;
pub mod errors;
pub mod filter;
pub mod scheduler;
pub mod sensor;
pub mod threshold;
pub mod time;
pub mod traits;

// Public API
pub use alert::{AlertBatch, AlertDispatcher, DispatchState, Notification, Priority, ReNotify};
pub use convert::{Calibration, Convert};
pub use cycle::{CycleResult, FilteredReading, SensorReport, UnavailableReason};
pub use errors::{CollaboratorError, ConfigError, FilterError, SensorError};
pub use filter::{trimmed_mean, MAX_SAMPLES};
pub use scheduler::{
    Collaborators, Scheduler, SchedulerConfig, SchedulerState, Sensor, StopHandle, StopReason, Timeouts,
};
pub use sensor::{SensorId, SensorSpec};
pub use threshold::{Direction, Evaluation, ThresholdRule, Violation};
pub use time::{ManualTime, SystemTime, TimeSource, Timestamp};
pub use traits::{CycleLog, DispatchStateStore, MainsPower, Notifier, PowerSource, RawReader, TelemetryPublisher};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
