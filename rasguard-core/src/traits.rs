//! Collaborator traits
//!
//! The loop talks to the outside world only through these traits. Adapters
//! for real hardware and services live in `rasguard-connectors`; tests plug
//! in mocks.
//!
//! ```text
//!  RawReader ──► Scheduler ──► TelemetryPublisher
//!  PowerSource ─►    │     ──► CycleLog
//!                    │     ──► Notifier
//!                    └───────► DispatchStateStore (optional)
//! ```
//!
//! ## Failure contract
//!
//! Every method may fail or hang. The scheduler wraps each call in a
//! timeout and treats a timeout exactly like an error: the data point is
//! lost for this cycle, the loop goes on.
//!
//! ## Resource release
//!
//! `release()` is called exactly once per collaborator when the scheduler
//! stops, including when it is dropped during a panic. It is synchronous so
//! it can run from `Drop`; close file and bus handles there, don't do I/O
//! that could block for long.

use async_trait::async_trait;

use crate::alert::{DispatchState, Notification};
use crate::cycle::{CycleResult, FilteredReading};
use crate::errors::{CollaboratorError, SensorError};

/// Source of raw samples for one physical quantity
#[async_trait]
pub trait RawReader: Send {
    /// Take one raw sample
    async fn read(&mut self) -> Result<f64, SensorError>;

    /// Close device handles
    fn release(&mut self) {}
}

/// Remote dashboard sink for filtered readings
#[async_trait]
pub trait TelemetryPublisher: Send {
    /// Publish one reading (sensor id, value and timestamp travel together)
    async fn publish(&mut self, reading: &FilteredReading) -> Result<(), CollaboratorError>;

    fn release(&mut self) {}
}

/// Local persistence of cycle results
#[async_trait]
pub trait CycleLog: Send {
    /// Append one cycle
    async fn append(&mut self, result: &CycleResult) -> Result<(), CollaboratorError>;

    /// Copy the log to its secondary location
    ///
    /// Called after every successful append; the default has no backup.
    async fn backup(&mut self) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn release(&mut self) {}
}

/// Push-notification channel
#[async_trait]
pub trait Notifier: Send {
    async fn send(&mut self, notification: &Notification) -> Result<(), CollaboratorError>;

    fn release(&mut self) {}
}

/// Battery / UPS state
#[async_trait]
pub trait PowerSource: Send {
    /// Remaining capacity in percent, `None` when it cannot be determined
    async fn battery_percent(&mut self) -> Option<f64>;

    fn release(&mut self) {}
}

/// Persistence of alert suppression across restarts
#[async_trait]
pub trait DispatchStateStore: Send {
    /// Load previously saved state, `Ok(None)` when nothing was saved yet
    async fn load(&mut self) -> Result<Option<DispatchState>, CollaboratorError>;

    async fn save(&mut self, state: &DispatchState) -> Result<(), CollaboratorError>;
}

/// Power source for hosts without a UPS
#[derive(Debug, Clone, Copy, Default)]
pub struct MainsPower;

#[async_trait]
impl PowerSource for MainsPower {
    async fn battery_percent(&mut self) -> Option<f64> {
        None
    }
}
