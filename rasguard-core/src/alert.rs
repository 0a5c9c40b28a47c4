//! Alert dispatch with suppression
//!
//! Without suppression a pump that stops overnight would page the keeper
//! every ten minutes until morning. The dispatcher remembers which sensors
//! it has already reported and only speaks up again when
//!
//! - the sensor enters violation for the first time,
//! - the re-notify backoff has elapsed while it is still violating, or
//! - it went back in bounds and then violated again.
//!
//! ## Two-phase dispatch
//!
//! [`AlertDispatcher::prepare`] decides what should go out and clears
//! suppression for sensors back in bounds. The caller sends the batch and
//! calls [`AlertDispatcher::confirm`] only if the send succeeded, so a failed
//! notification is simply retried on the next cycle.
//!
//! ```rust
//! use rasguard_core::alert::{AlertDispatcher, ReNotify};
//! # use rasguard_core::cycle::CycleResult;
//! # let result = CycleResult { index: 1, started_at: 0, reports: vec![], battery: None };
//!
//! let mut dispatcher = AlertDispatcher::new(ReNotify::AfterCycles(6));
//! if let Some(batch) = dispatcher.prepare(&result, 0) {
//!     // send batch.notification() ... then on success:
//!     dispatcher.confirm(&batch);
//! }
//! ```
//!
//! Sensors that are unavailable keep their suppression entry: a probe that
//! drops off the bus has not proven the water is back in range.

use std::collections::BTreeMap;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::cycle::CycleResult;
use crate::errors::ConfigError;
use crate::sensor::SensorId;
use crate::threshold::{Evaluation, Violation};
use crate::time::{elapsed_ms, Timestamp};

/// Default heading of alert messages
pub const DEFAULT_ALERT_TITLE: &str = "RAS Alerts";

/// When to repeat a notification for a violation that has not cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReNotify {
    /// Notify once per violation episode
    Never,
    /// Remind every `n` cycles
    AfterCycles(u64),
    /// Remind once this much wall-clock time has passed
    AfterElapsed(Duration),
}

impl Default for ReNotify {
    fn default() -> Self {
        ReNotify::AfterCycles(6)
    }
}

impl ReNotify {
    /// Startup check, zero backoffs would defeat suppression
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ReNotify::AfterCycles(0) => Err(ConfigError::InvalidReNotify("cycle count must be at least 1")),
            ReNotify::AfterElapsed(d) if d.is_zero() => {
                Err(ConfigError::InvalidReNotify("interval must be greater than zero"))
            }
            _ => Ok(()),
        }
    }

    fn is_due(&self, entry: &Suppression, cycle: u64, now: Timestamp) -> bool {
        match self {
            ReNotify::Never => false,
            ReNotify::AfterCycles(n) => cycle.saturating_sub(entry.last_notified_cycle) >= *n,
            ReNotify::AfterElapsed(interval) => {
                elapsed_ms(entry.last_notified_at, now) >= interval.as_millis() as u64
            }
        }
    }
}

/// Suppression bookkeeping for one sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suppression {
    pub first_notified_at: Timestamp,
    pub last_notified_at: Timestamp,
    pub last_notified_cycle: u64,
    pub notifications: u32,
}

/// Which sensors have an outstanding, already-reported violation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchState {
    entries: BTreeMap<SensorId, Suppression>,
}

impl DispatchState {
    pub fn get(&self, sensor: &str) -> Option<&Suppression> {
        self.entries.get(sensor)
    }

    pub fn is_suppressed(&self, sensor: &str) -> bool {
        self.entries.contains_key(sensor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reset cycle counters after a restart
    ///
    /// Cycle indices restart at 1 with the process; counting backoff from
    /// zero keeps restored entries from being suppressed for as long as the
    /// previous run had been going.
    pub fn rebase_cycles(&mut self) {
        for entry in self.entries.values_mut() {
            entry.last_notified_cycle = 0;
        }
    }
}

/// Why an item is in the batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// First notification of this violation episode
    New,
    /// Backoff elapsed, violation still active
    Reminder,
}

/// One violation to notify
#[derive(Debug, Clone, PartialEq)]
pub struct AlertItem {
    pub violation: Violation,
    pub kind: AlertKind,
}

/// Notification urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    /// Must reach a human (battery shutdown)
    Emergency,
}

/// A message for the notifier
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub priority: Priority,
}

/// All violations to notify for one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct AlertBatch {
    cycle: u64,
    created_at: Timestamp,
    title: String,
    items: Vec<AlertItem>,
}

impl AlertBatch {
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn items(&self) -> &[AlertItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Body text, one line per violation
    pub fn message(&self) -> String {
        let mut lines = Vec::with_capacity(self.items.len() + 1);
        lines.push(format!("{}:", self.title));
        for item in &self.items {
            match item.kind {
                AlertKind::New => lines.push(item.violation.to_string()),
                AlertKind::Reminder => lines.push(format!("{} [still active]", item.violation)),
            }
        }
        lines.join("\n")
    }

    pub fn notification(&self) -> Notification {
        Notification {
            title: self.title.clone(),
            message: self.message(),
            priority: Priority::Normal,
        }
    }
}

/// Decides which violations to notify and remembers what was sent
#[derive(Debug)]
pub struct AlertDispatcher {
    policy: ReNotify,
    title: String,
    state: DispatchState,
}

impl AlertDispatcher {
    pub fn new(policy: ReNotify) -> Self {
        Self {
            policy,
            title: DEFAULT_ALERT_TITLE.to_owned(),
            state: DispatchState::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Start from previously persisted suppression state
    pub fn with_state(mut self, state: DispatchState) -> Self {
        self.restore(state);
        self
    }

    /// Replace the current state with one loaded from storage
    pub fn restore(&mut self, mut state: DispatchState) {
        state.rebase_cycles();
        self.state = state;
    }

    pub fn policy(&self) -> ReNotify {
        self.policy
    }

    pub fn state(&self) -> &DispatchState {
        &self.state
    }

    /// Decide what to notify for this cycle
    ///
    /// Clears suppression for every sensor that is back in bounds, even when
    /// nothing is returned.
    pub fn prepare(&mut self, result: &CycleResult, now: Timestamp) -> Option<AlertBatch> {
        let mut items = Vec::new();

        for report in result.all_reports() {
            match &report.evaluation {
                Evaluation::InBounds => {
                    if self.state.entries.remove(&report.sensor).is_some() {
                        info!("{} back in bounds, alert suppression cleared", report.sensor);
                    }
                }
                Evaluation::Violating(violation) => match self.state.entries.get(&report.sensor) {
                    None => items.push(AlertItem {
                        violation: violation.clone(),
                        kind: AlertKind::New,
                    }),
                    Some(entry) if self.policy.is_due(entry, result.index, now) => {
                        items.push(AlertItem {
                            violation: violation.clone(),
                            kind: AlertKind::Reminder,
                        })
                    }
                    Some(_) => debug!("{} still violating, notification suppressed", report.sensor),
                },
                Evaluation::Unavailable { .. } => {}
            }
        }

        if items.is_empty() {
            return None;
        }

        Some(AlertBatch {
            cycle: result.index,
            created_at: now,
            title: self.title.clone(),
            items,
        })
    }

    /// Record a batch as delivered
    pub fn confirm(&mut self, batch: &AlertBatch) {
        for item in &batch.items {
            let entry = self
                .state
                .entries
                .entry(item.violation.sensor.clone())
                .or_insert(Suppression {
                    first_notified_at: batch.created_at,
                    last_notified_at: batch.created_at,
                    last_notified_cycle: batch.cycle,
                    notifications: 0,
                });
            entry.last_notified_at = batch.created_at;
            entry.last_notified_cycle = batch.cycle;
            entry.notifications += 1;
        }
    }
}
