//! Cycle scheduler
//!
//! Drives the monitoring loop as an explicit state machine:
//!
//! ```text
//!        ┌───────────────────────────────────────────────────┐
//!        ▼                                                   │
//! Idle ─► Sampling ─► Evaluating ─► Reporting ─► (battery) ─► Sleeping
//!           │             │             │            │           │
//!           └─────────────┴──────┬──────┴────────────┴───────────┘
//!                                ▼   stop request / battery critical
//!                            Stopping ─► Stopped
//! ```
//!
//! The UPS battery is queried once per cycle at the end of Sampling. Its
//! level travels in the [`CycleResult`] (published, logged and alerted at the
//! warning level) and is checked against the shutdown floor after reporting.
//!
//! ## Checkpoints
//!
//! A stop request is honored between sensors, between states and at once
//! while sleeping. It never interrupts an individual raw read.
//!
//! ## Cadence
//!
//! Cycle N+1 is scheduled one interval after the *scheduled* start of cycle
//! N, so processing time does not accumulate as drift. A cycle that overruns
//! its interval is followed immediately by the next one, which becomes the
//! new reference point; late cycles are never stacked or replayed.
//!
//! ## Failure isolation
//!
//! Every collaborator call runs under its own timeout. Read failures shrink
//! the sample set, publish/log/notify failures are logged and the loop moves
//! on. Only a stop request or a critical battery ends [`Scheduler::run`].

use core::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::time::{timeout, Instant};

use crate::alert::{AlertDispatcher, Notification, Priority};
use crate::cycle::{battery_report, reduce, CycleResult, SensorReport, BATTERY_SENSOR_ID};
use crate::errors::{CollaboratorError, ConfigError, SensorError};
use crate::filter::SampleBuffer;
use crate::sensor::{ensure_unique, SensorSpec};
use crate::threshold::{evaluate, Evaluation};
use crate::time::{SystemTime, TimeSource};
use crate::traits::{CycleLog, DispatchStateStore, Notifier, PowerSource, RawReader, TelemetryPublisher};

/// Default time between cycle starts
pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_secs(600);

/// Default battery level below which the loop shuts down
pub const DEFAULT_BATTERY_SHUTDOWN_PERCENT: f64 = 10.0;

/// Title of the battery shutdown notification
pub const EMERGENCY_TITLE: &str = "RAS EMERGENCY";

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Sampling,
    Evaluating,
    Reporting,
    Sleeping,
    Stopping,
    Stopped,
}

/// Why the loop ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopReason {
    /// Stop requested through a [`StopHandle`] (SIGINT, SIGTERM, ...)
    Interrupted,
    /// Battery fell below the shutdown floor
    BatteryCritical { percent: f64 },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Interrupted => f.write_str("stop requested"),
            StopReason::BatteryCritical { percent } => write!(f, "battery critical at {percent}%"),
        }
    }
}

/// Per-operation timeouts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeouts {
    /// One raw sensor read
    pub read: Duration,
    /// One telemetry publish
    pub publish: Duration,
    /// Cycle log append, and separately the backup copy
    pub log: Duration,
    /// One notification
    pub notify: Duration,
    /// Battery query
    pub power: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(2),
            publish: Duration::from_secs(30),
            log: Duration::from_secs(10),
            notify: Duration::from_secs(30),
            power: Duration::from_secs(5),
        }
    }
}

/// Global loop settings
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub cycle_interval: Duration,
    /// Stop when the battery is strictly below this
    pub battery_shutdown_percent: f64,
    /// Alert at or below this, suppressed like a sensor violation
    pub battery_warning_percent: Option<f64>,
    pub timeouts: Timeouts,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_interval: DEFAULT_CYCLE_INTERVAL,
            battery_shutdown_percent: DEFAULT_BATTERY_SHUTDOWN_PERCENT,
            battery_warning_percent: None,
            timeouts: Timeouts::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_interval.is_zero() {
            return Err(ConfigError::InvalidCycleInterval);
        }
        check_percent("shutdown", self.battery_shutdown_percent)?;
        if let Some(warning) = self.battery_warning_percent {
            check_percent("warning", warning)?;
        }
        Ok(())
    }
}

fn check_percent(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidBatteryPercent { name, value })
    }
}

/// A configured sensor and the reader that samples it
pub struct Sensor {
    spec: SensorSpec,
    reader: Box<dyn RawReader>,
}

impl Sensor {
    pub fn new(spec: SensorSpec, reader: impl RawReader + 'static) -> Self {
        Self {
            spec,
            reader: Box::new(reader),
        }
    }

    pub fn spec(&self) -> &SensorSpec {
        &self.spec
    }
}

/// External collaborators of the loop
pub struct Collaborators {
    pub publisher: Box<dyn TelemetryPublisher>,
    pub log: Box<dyn CycleLog>,
    pub notifier: Box<dyn Notifier>,
    pub power: Box<dyn PowerSource>,
    pub state_store: Option<Box<dyn DispatchStateStore>>,
}

/// Requests a cooperative stop; cheap to clone and send to signal handlers
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Next-start computation anchored on scheduled starts
#[derive(Debug, Clone)]
pub struct Cadence {
    interval: Duration,
    scheduled: Instant,
    overruns: u64,
}

impl Cadence {
    /// `first_start` is the scheduled start of the first cycle
    pub fn new(interval: Duration, first_start: Instant) -> Self {
        Self {
            interval,
            scheduled: first_start,
            overruns: 0,
        }
    }

    /// Start of the next cycle, given that the current one finished at `now`
    pub fn next_start(&mut self, now: Instant) -> Instant {
        let candidate = self.scheduled + self.interval;
        self.scheduled = if candidate >= now {
            candidate
        } else {
            self.overruns += 1;
            now
        };
        self.scheduled
    }

    /// Cycles that ran past their interval so far
    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}

/// The monitoring loop
pub struct Scheduler {
    config: SchedulerConfig,
    sensors: Vec<Sensor>,
    collaborators: Collaborators,
    dispatcher: AlertDispatcher,
    clock: Box<dyn TimeSource>,
    state: SchedulerState,
    cycle: u64,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    released: bool,
}

impl Scheduler {
    /// Validate the configuration and assemble the loop
    pub fn new(
        config: SchedulerConfig,
        sensors: Vec<Sensor>,
        collaborators: Collaborators,
        dispatcher: AlertDispatcher,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        dispatcher.policy().validate()?;
        if sensors.is_empty() {
            return Err(ConfigError::NoSensors);
        }
        let specs: Vec<SensorSpec> = sensors.iter().map(|sensor| sensor.spec.clone()).collect();
        ensure_unique(&specs)?;
        if specs.iter().any(|spec| spec.id().as_str() == BATTERY_SENSOR_ID) {
            return Err(ConfigError::DuplicateSensor(BATTERY_SENSOR_ID.to_owned()));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        Ok(Self {
            config,
            sensors,
            collaborators,
            dispatcher,
            clock: Box::new(SystemTime),
            state: SchedulerState::Idle,
            cycle: 0,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            released: false,
        })
    }

    /// Replace the wall clock used for timestamps and alert backoff
    pub fn with_clock(mut self, clock: impl TimeSource + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: Arc::clone(&self.stop_tx),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Cycles started so far
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    pub fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }

    /// Run until stopped, then release every collaborator
    pub async fn run(mut self) -> StopReason {
        info!(
            "monitoring {} sensors every {:?}, battery shutdown below {}%",
            self.sensors.len(),
            self.config.cycle_interval,
            self.config.battery_shutdown_percent
        );
        self.restore_dispatch_state().await;

        let reason = self.run_cycles().await;
        self.stop(reason).await;
        reason
    }

    async fn run_cycles(&mut self) -> StopReason {
        let mut cadence = Cadence::new(self.config.cycle_interval, Instant::now());

        loop {
            if self.stop_requested() {
                return StopReason::Interrupted;
            }
            let Some(result) = self.run_cycle().await else {
                return StopReason::Interrupted;
            };
            if let Some(reason) = self.check_power(&result) {
                return reason;
            }
            if self.stop_requested() {
                return StopReason::Interrupted;
            }

            self.transition(SchedulerState::Sleeping);
            let now = Instant::now();
            let overruns = cadence.overruns();
            let next = cadence.next_start(now);
            if cadence.overruns() > overruns {
                warn!(
                    "cycle {} overran the {:?} interval, starting the next one immediately",
                    self.cycle, self.config.cycle_interval
                );
            } else {
                debug!("sleeping {:?} until cycle {}", next - now, self.cycle + 1);
            }
            if !self.sleep_until(next).await {
                return StopReason::Interrupted;
            }
        }
    }

    /// Sample, evaluate and report once
    ///
    /// Returns `None` when a stop request arrived before reporting.
    pub async fn run_cycle(&mut self) -> Option<CycleResult> {
        self.cycle += 1;
        let index = self.cycle;
        let started = Instant::now();
        let started_at = self.clock.now();

        self.transition(SchedulerState::Sampling);
        let read_timeout = self.config.timeouts.read;
        let mut sampled = Vec::with_capacity(self.sensors.len());
        for sensor in self.sensors.iter_mut() {
            if is_stopped(&self.stop_rx) {
                info!("stop requested during sampling of cycle {index}");
                return None;
            }
            sampled.push(sample_sensor(sensor, read_timeout).await);
        }

        if self.stop_requested() {
            return None;
        }
        let battery = self.read_battery().await;

        if self.stop_requested() {
            return None;
        }
        self.transition(SchedulerState::Evaluating);
        let mut result = evaluate_cycle(&self.sensors, sampled, index, started_at);
        result.battery = battery.map(|percent| {
            let report = battery_report(percent, self.config.battery_warning_percent, started_at);
            if let Some(violation) = report.evaluation.violation() {
                warn!("battery low: {violation}");
            }
            report
        });

        if self.stop_requested() {
            return None;
        }
        self.transition(SchedulerState::Reporting);
        self.report(&result).await;

        info!(
            "cycle {} complete in {:?}: {}/{} sensors available, {} violations",
            index,
            started.elapsed(),
            result.readings().count(),
            result.reports.len(),
            result.violations().count()
        );
        Some(result)
    }

    async fn report(&mut self, result: &CycleResult) {
        let timeouts = self.config.timeouts;
        let collaborators = &mut self.collaborators;

        let total = result.readings().count();
        let mut published = 0;
        for reading in result.readings() {
            match with_timeout(timeouts.publish, collaborators.publisher.publish(reading)).await {
                Ok(()) => published += 1,
                Err(e) => warn!("publishing {} failed: {}", reading.sensor, e),
            }
        }
        if total > 0 && published == 0 {
            error!("all telemetry publishes failed ({total} readings)");
        } else {
            debug!("published {published}/{total} readings");
        }

        match with_timeout(timeouts.log, collaborators.log.append(result)).await {
            Ok(()) => {
                if let Err(e) = with_timeout(timeouts.log, collaborators.log.backup()).await {
                    warn!("cycle log backup failed: {e}");
                }
            }
            Err(e) => warn!("appending cycle {} to the log failed: {}", result.index, e),
        }

        let state_before = self.dispatcher.state().clone();
        if let Some(batch) = self.dispatcher.prepare(result, self.clock.now()) {
            warn!("notifying {} violation(s)", batch.len());
            match with_timeout(timeouts.notify, collaborators.notifier.send(&batch.notification())).await {
                Ok(()) => self.dispatcher.confirm(&batch),
                Err(e) => warn!("alert notification failed, retrying next cycle: {e}"),
            }
        }

        if *self.dispatcher.state() != state_before {
            if let Some(store) = collaborators.state_store.as_mut() {
                if let Err(e) = with_timeout(timeouts.log, store.save(self.dispatcher.state())).await {
                    warn!("saving alert suppression state failed: {e}");
                }
            }
        }
    }

    /// Battery level for this cycle; unknown on timeout or a non-finite answer
    async fn read_battery(&mut self) -> Option<f64> {
        let percent = timeout(self.config.timeouts.power, self.collaborators.power.battery_percent())
            .await
            .ok()
            .flatten()
            .filter(|percent| percent.is_finite());

        match percent {
            Some(percent) => debug!("battery at {percent}%"),
            None => debug!("battery level unknown"),
        }
        percent
    }

    fn check_power(&self, result: &CycleResult) -> Option<StopReason> {
        let percent = result.battery_percent()?;
        let floor = self.config.battery_shutdown_percent;
        if percent < floor {
            warn!("battery at {percent}% is below the {floor}% shutdown floor");
            return Some(StopReason::BatteryCritical { percent });
        }
        None
    }

    async fn sleep_until(&mut self, deadline: Instant) -> bool {
        if self.stop_requested() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => true,
            _ = wait_for_stop(&mut self.stop_rx) => false,
        }
    }

    /// Move to `Stopping`, release collaborators, end in `Stopped`
    ///
    /// Idempotent; a second call does nothing.
    pub async fn stop(&mut self, reason: StopReason) {
        if self.state == SchedulerState::Stopped {
            return;
        }
        self.transition(SchedulerState::Stopping);
        info!("stopping after {} cycles: {}", self.cycle, reason);

        if let StopReason::BatteryCritical { percent } = reason {
            let notification = Notification {
                title: EMERGENCY_TITLE.to_owned(),
                message: format!(
                    "EMERGENCY: RAS monitoring shutting down due to low UPS battery ({percent}%)"
                ),
                priority: Priority::Emergency,
            };
            if let Err(e) = with_timeout(
                self.config.timeouts.notify,
                self.collaborators.notifier.send(&notification),
            )
            .await
            {
                error!("emergency notification failed: {e}");
            }
        }

        self.release();
        self.transition(SchedulerState::Stopped);
    }

    async fn restore_dispatch_state(&mut self) {
        let Some(store) = self.collaborators.state_store.as_mut() else {
            return;
        };
        match with_timeout(self.config.timeouts.log, store.load()).await {
            Ok(Some(state)) => {
                info!("restored alert suppression for {} sensors", state.len());
                self.dispatcher.restore(state);
            }
            Ok(None) => debug!("no saved alert suppression state"),
            Err(e) => warn!("loading alert suppression state failed, starting fresh: {e}"),
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        for sensor in self.sensors.iter_mut() {
            sensor.reader.release();
        }
        self.collaborators.publisher.release();
        self.collaborators.log.release();
        self.collaborators.notifier.release();
        self.collaborators.power.release();
        debug!("collaborators released");
    }

    fn stop_requested(&self) -> bool {
        is_stopped(&self.stop_rx)
    }

    fn transition(&mut self, next: SchedulerState) {
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.released {
            warn!("scheduler dropped before an orderly stop, releasing collaborators");
            self.release();
        }
    }
}

fn is_stopped(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

async fn wait_for_stop(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            // every sender is gone, nobody can ask us to stop any more
            std::future::pending::<()>().await;
        }
    }
}

async fn with_timeout<T, F>(limit: Duration, operation: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    timeout(limit, operation)
        .await
        .unwrap_or(Err(CollaboratorError::Timeout))
}

/// Attempt `N` reads, keeping only finite successes
async fn sample_sensor(sensor: &mut Sensor, read_timeout: Duration) -> SampleBuffer {
    let spec = &sensor.spec;
    let mut samples = SampleBuffer::new();
    let mut failures = 0usize;

    for attempt in 0..spec.sample_count() {
        if attempt > 0 && !spec.sample_spacing().is_zero() {
            tokio::time::sleep(spec.sample_spacing()).await;
        }

        let error = match timeout(read_timeout, sensor.reader.read()).await {
            Ok(Ok(value)) if value.is_finite() => {
                if samples.push(value).is_err() {
                    break;
                }
                continue;
            }
            Ok(Ok(_)) => SensorError::InvalidValue,
            Ok(Err(e)) => e,
            Err(_) => SensorError::Timeout,
        };
        failures += 1;
        debug!("{} read {} failed: {}", spec.id(), attempt + 1, error);
    }

    if failures > 0 {
        debug!("{}: {} of {} reads failed", spec.id(), failures, spec.sample_count());
    }
    samples
}

fn evaluate_cycle(
    sensors: &[Sensor],
    sampled: Vec<SampleBuffer>,
    index: u64,
    started_at: u64,
) -> CycleResult {
    let reports = sensors
        .iter()
        .zip(sampled)
        .map(|(sensor, samples)| {
            let spec = &sensor.spec;
            let outcome = reduce(spec, &samples, started_at);
            if let Err(reason) = &outcome {
                warn!("{} unavailable this cycle: {}", spec.id(), reason);
            }

            let evaluation = evaluate(spec, &outcome);
            if let Evaluation::Violating(violation) = &evaluation {
                warn!("threshold violation: {violation}");
            }

            SensorReport {
                sensor: spec.id().clone(),
                reading: outcome.ok(),
                evaluation,
            }
        })
        .collect();

    CycleResult {
        index,
        started_at,
        reports,
        battery: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_keeps_fixed_reference() {
        let t0 = Instant::now();
        let mut cadence = Cadence::new(Duration::from_secs(600), t0);

        // cycle took 30s, next start is still t0 + 600
        assert_eq!(cadence.next_start(t0 + Duration::from_secs(30)), t0 + Duration::from_secs(600));
        // second cycle took 45s, no drift accumulates
        assert_eq!(
            cadence.next_start(t0 + Duration::from_secs(645)),
            t0 + Duration::from_secs(1200)
        );
        assert_eq!(cadence.overruns(), 0);
    }

    #[test]
    fn cadence_overrun_starts_immediately_and_reanchors() {
        let t0 = Instant::now();
        let mut cadence = Cadence::new(Duration::from_secs(600), t0);

        let late = t0 + Duration::from_secs(650);
        assert_eq!(cadence.next_start(late), late);
        assert_eq!(cadence.overruns(), 1);

        // quick cycle after the overrun: one interval after the new anchor
        assert_eq!(
            cadence.next_start(late + Duration::from_secs(5)),
            late + Duration::from_secs(600)
        );
    }

    #[test]
    fn finishing_exactly_on_schedule_is_not_an_overrun() {
        let t0 = Instant::now();
        let mut cadence = Cadence::new(Duration::from_secs(600), t0);

        let on_time = t0 + Duration::from_secs(600);
        assert_eq!(cadence.next_start(on_time), on_time);
        assert_eq!(cadence.overruns(), 0);
    }

    #[test]
    fn config_validation() {
        assert!(SchedulerConfig::default().validate().is_ok());

        let zero = SchedulerConfig {
            cycle_interval: Duration::ZERO,
            ..SchedulerConfig::default()
        };
        assert_eq!(zero.validate(), Err(ConfigError::InvalidCycleInterval));

        let bad_battery = SchedulerConfig {
            battery_shutdown_percent: 120.0,
            ..SchedulerConfig::default()
        };
        assert!(bad_battery.validate().is_err());
    }

    #[test]
    fn stop_reason_display() {
        assert_eq!(
            StopReason::BatteryCritical { percent: 9.0 }.to_string(),
            "battery critical at 9%"
        );
    }
}
